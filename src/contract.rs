// 2.0: the contract model. a contract is one time-boxed payoff cell in an orderbook grid.
// 2.1 status machine: Active -> {Exercised | Triggered, Expired, Abandoned}. terminal states never move.
// 2.2 ClientContract is the redacted projection handed to the transport layer.

use crate::types::{ContractId, Price, ProductId, Quote, Timeframe, Timestamp, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractStatus {
    Active,
    /// Range contract resolved in the money.
    Exercised,
    /// Directional contract resolved in the money.
    Triggered,
    /// Lapsed with stakes on it, every stake paid zero.
    Expired,
    /// Lapsed with no stakes. never announced.
    Abandoned,
}

impl ContractStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ContractStatus::Active)
    }

    pub fn is_winning(&self) -> bool {
        matches!(self, ContractStatus::Exercised | ContractStatus::Triggered)
    }

    pub fn can_transition_to(&self, next: ContractStatus) -> bool {
        matches!(self, ContractStatus::Active) && next.is_terminal()
    }
}

// Up pays when price finishes at or above the strike, Down at or below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn offset(&self) -> u64 {
        match self {
            Direction::Up => 0,
            Direction::Down => 2,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContractShape {
    Band { lower: Price, upper: Price },
    Strike { strike: Price, direction: Direction },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridPosition {
    /// Absolute column index since bootstrap.
    pub column: u64,
    pub row: usize,
}

/// Half-open `[start, end)` interval in which ticks can resolve the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExerciseWindow {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl ExerciseWindow {
    pub fn new(start: Timestamp, timeframe: Timeframe) -> Self {
        Self {
            start,
            end: start.plus_millis(timeframe.as_millis()),
        }
    }

    pub fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.start && ts < self.end
    }

    pub fn has_started(&self, ts: Timestamp) -> bool {
        ts >= self.start
    }

    pub fn has_lapsed(&self, ts: Timestamp) -> bool {
        ts >= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    pub user_id: UserId,
    pub amount: Quote,
    pub timestamp: Timestamp,
    pub contract_id: ContractId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MakerQuote {
    pub maker_id: UserId,
    pub return_multiplier: Decimal,
    pub collateral_per_unit: Decimal,
}

/// One line of a resolution payload. expired contracts carry zero payouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub user_id: UserId,
    pub amount: Quote,
    pub payout: Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub id: ContractId,
    pub product: ProductId,
    pub timeframe: Timeframe,
    pub grid: GridPosition,
    pub shape: ContractShape,
    pub window: ExerciseWindow,
    pub status: ContractStatus,
    pub total_volume: Quote,
    pub fills: BTreeMap<UserId, Vec<Fill>>,
    /// Deterministic multiplier from the blueprint, used until a maker quote lands.
    pub base_multiplier: Decimal,
    pub maker_quote: Option<MakerQuote>,
}

impl Contract {
    pub fn new(
        product: ProductId,
        timeframe: Timeframe,
        grid: GridPosition,
        shape: ContractShape,
        window: ExerciseWindow,
        base_multiplier: Decimal,
    ) -> Self {
        Self {
            id: ContractId::for_slot(&product, timeframe, grid.column, grid.row),
            product,
            timeframe,
            grid,
            shape,
            window,
            status: ContractStatus::Active,
            total_volume: Quote::zero(),
            fills: BTreeMap::new(),
            base_multiplier,
            maker_quote: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ContractStatus::Active
    }

    pub fn has_volume(&self) -> bool {
        self.total_volume.is_positive()
    }

    pub fn is_quoted(&self) -> bool {
        self.maker_quote.is_some()
    }

    pub fn is_quoted_by(&self, maker_id: &UserId) -> bool {
        self.maker_quote
            .as_ref()
            .map(|q| &q.maker_id == maker_id)
            .unwrap_or(false)
    }

    // stakes close the moment the window opens
    pub fn accepts_stake_at(&self, ts: Timestamp) -> bool {
        self.is_active() && ts < self.window.start
    }

    pub fn effective_multiplier(&self) -> Decimal {
        self.maker_quote
            .as_ref()
            .map(|q| q.return_multiplier)
            .unwrap_or(self.base_multiplier)
    }

    /// Volume after staking `amount`, if both it and its payout stay representable.
    pub fn volume_after(&self, amount: Quote) -> Option<Quote> {
        let volume = self.total_volume.checked_add(amount)?;
        volume.checked_mul(self.effective_multiplier())?;
        Some(volume)
    }

    // callers admit the stake through volume_after first
    pub fn add_fill(&mut self, user_id: UserId, amount: Quote, timestamp: Timestamp) -> Fill {
        let fill = Fill {
            user_id: user_id.clone(),
            amount,
            timestamp,
            contract_id: self.id.clone(),
        };
        self.fills.entry(user_id).or_default().push(fill.clone());
        self.total_volume = self.total_volume.saturating_add(amount);
        fill
    }

    pub fn fills_iter(&self) -> impl Iterator<Item = &Fill> {
        self.fills.values().flatten()
    }

    pub fn fill_count(&self) -> usize {
        self.fills.values().map(Vec::len).sum()
    }

    pub fn transition(&mut self, next: ContractStatus) -> Result<(), ContractError> {
        if !self.status.can_transition_to(next) {
            return Err(ContractError::IllegalTransition {
                id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn settlements(&self, multiplier: Decimal) -> Vec<Settlement> {
        self.fills_iter()
            .map(|f| Settlement {
                user_id: f.user_id.clone(),
                amount: f.amount,
                payout: f.amount.saturating_mul(multiplier),
            })
            .collect()
    }

    pub fn zero_settlements(&self) -> Vec<Settlement> {
        self.settlements(Decimal::ZERO)
    }
}

// 2.2: what clients get to see. no fills, no other users' stakes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContract {
    pub contract_id: ContractId,
    pub product: ProductId,
    pub timeframe: Timeframe,
    pub column: u64,
    pub row: usize,
    pub return_multiplier: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lower_price: Option<Price>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upper_price: Option<Price>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strike_price: Option<Price>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    pub window_start: Timestamp,
    pub window_end: Timestamp,
    pub is_active: bool,
    pub total_volume: Quote,
    pub maker_id: Option<UserId>,
    pub collateral_per_unit: Option<Decimal>,
}

impl ClientContract {
    pub fn project(contract: &Contract, return_multiplier: Decimal) -> Self {
        let (lower_price, upper_price, strike_price, direction) = match contract.shape {
            ContractShape::Band { lower, upper } => (Some(lower), Some(upper), None, None),
            ContractShape::Strike { strike, direction } => (None, None, Some(strike), Some(direction)),
        };

        Self {
            contract_id: contract.id.clone(),
            product: contract.product.clone(),
            timeframe: contract.timeframe,
            column: contract.grid.column,
            row: contract.grid.row,
            return_multiplier,
            lower_price,
            upper_price,
            strike_price,
            direction,
            window_start: contract.window.start,
            window_end: contract.window.end,
            is_active: contract.is_active(),
            total_volume: contract.total_volume,
            maker_id: contract.maker_quote.as_ref().map(|q| q.maker_id.clone()),
            collateral_per_unit: contract.maker_quote.as_ref().map(|q| q.collateral_per_unit),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ContractError {
    #[error("Contract {id} cannot move from {from:?} to {to:?}")]
    IllegalTransition {
        id: ContractId,
        from: ContractStatus,
        to: ContractStatus,
    },
}
