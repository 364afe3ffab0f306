// 4.0: position ledger. one record per accepted order, opened at placement and settled
// exactly once when its contract resolves. payout is zero for expired contracts.

use crate::events::PositionEvent;
use crate::types::{ContractId, PositionId, ProductId, Quote, Timeframe, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    Settled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub position_id: PositionId,
    pub user_id: UserId,
    pub contract_id: ContractId,
    pub amount: Quote,
    pub collateral: Quote,
    pub product: ProductId,
    pub timeframe: Timeframe,
    pub opened_at: Timestamp,
    pub status: PositionStatus,
    pub payout: Option<Quote>,
    pub closed_at: Option<Timestamp>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    // 4.1: payout minus collateral. None while open.
    pub fn realized_pnl(&self) -> Option<Quote> {
        self.payout.map(|p| p.sub(self.collateral))
    }
}

#[derive(Debug, Clone)]
pub struct OpenPositionParams {
    pub user_id: UserId,
    pub contract_id: ContractId,
    pub amount: Quote,
    pub collateral: Quote,
    pub product: ProductId,
    pub timeframe: Timeframe,
    pub opened_at: Timestamp,
}

#[derive(Debug, Default)]
pub struct PositionLedger {
    positions: HashMap<PositionId, Position>,
    by_contract: HashMap<ContractId, Vec<PositionId>>,
    by_user: HashMap<UserId, Vec<PositionId>>,
    pending: Vec<PositionEvent>,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_position(&mut self, params: OpenPositionParams) -> Position {
        let position = Position {
            position_id: PositionId::generate(),
            user_id: params.user_id,
            contract_id: params.contract_id,
            amount: params.amount,
            collateral: params.collateral,
            product: params.product,
            timeframe: params.timeframe,
            opened_at: params.opened_at,
            status: PositionStatus::Open,
            payout: None,
            closed_at: None,
        };

        let id = position.position_id;
        self.by_contract
            .entry(position.contract_id.clone())
            .or_default()
            .push(id);
        self.by_user
            .entry(position.user_id.clone())
            .or_default()
            .push(id);
        self.positions.insert(id, position.clone());
        self.pending.push(PositionEvent::Opened(position.clone()));

        position
    }

    pub fn settle_position(
        &mut self,
        position_id: PositionId,
        payout: Quote,
        closed_at: Timestamp,
    ) -> Result<Position, PositionError> {
        let position = self
            .positions
            .get_mut(&position_id)
            .ok_or(PositionError::NotFound(position_id))?;

        if !position.is_open() {
            return Err(PositionError::AlreadySettled(position_id));
        }

        position.status = PositionStatus::Settled;
        position.payout = Some(payout);
        position.closed_at = Some(closed_at);

        let settled = position.clone();
        self.pending.push(PositionEvent::Settled(settled.clone()));
        Ok(settled)
    }

    /// Settles every open position on `contract_id`, returning the settled records.
    pub fn settle_positions_by_contract<F>(
        &mut self,
        contract_id: &ContractId,
        closed_at: Timestamp,
        compute_payout: F,
    ) -> Vec<Position>
    where
        F: Fn(&Position) -> Quote,
    {
        let ids = self.by_contract.get(contract_id).cloned().unwrap_or_default();
        let mut settled = Vec::with_capacity(ids.len());

        for id in ids {
            let payout = match self.positions.get(&id) {
                Some(p) if p.is_open() => compute_payout(p),
                _ => continue,
            };
            if let Ok(position) = self.settle_position(id, payout, closed_at) {
                settled.push(position);
            }
        }

        settled
    }

    pub fn get(&self, position_id: PositionId) -> Option<&Position> {
        self.positions.get(&position_id)
    }

    pub fn positions_for_user(&self, user_id: &UserId) -> Vec<&Position> {
        self.by_user
            .get(user_id)
            .map(|ids| ids.iter().filter_map(|id| self.positions.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn open_positions_for_contract(&self, contract_id: &ContractId) -> Vec<&Position> {
        self.by_contract
            .get(contract_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.positions.get(id))
                    .filter(|p| p.is_open())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values().filter(|p| p.is_open())
    }

    pub fn open_count(&self) -> usize {
        self.positions.values().filter(|p| p.is_open()).count()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn drain_events(&mut self) -> Vec<PositionEvent> {
        std::mem::take(&mut self.pending)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PositionError {
    #[error("Position {0} not found")]
    NotFound(PositionId),

    #[error("Position {0} already settled")]
    AlreadySettled(PositionId),
}
