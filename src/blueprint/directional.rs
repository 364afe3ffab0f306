// 3.2: directional contracts. two strikes per column, one above and one below the
// reference. the gap widens with the timeframe since longer windows see bigger moves.

use super::{ColumnContext, ProductBlueprint};
use crate::contract::{Contract, ContractShape, ContractStatus, Direction, GridPosition};
use crate::types::{Price, PricePoint, ProductId, Timeframe};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GapFraction {
    pub timeframe: Timeframe,
    pub fraction: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectionalParams {
    pub total_columns: usize,
    pub gap_fractions: Vec<GapFraction>,
    /// Used for timeframes missing from `gap_fractions`.
    pub default_gap_fraction: Decimal,
    pub multiplier_base: Decimal,
    pub multiplier_step: Decimal,
}

impl Default for DirectionalParams {
    fn default() -> Self {
        let table = [
            (1_000, dec!(0.0002)),
            (2_000, dec!(0.0004)),
            (5_000, dec!(0.0008)),
            (10_000, dec!(0.0012)),
            (30_000, dec!(0.002)),
            (60_000, dec!(0.003)),
        ];

        Self {
            total_columns: 10,
            gap_fractions: table
                .into_iter()
                .map(|(ms, fraction)| GapFraction {
                    timeframe: Timeframe(ms),
                    fraction,
                })
                .collect(),
            default_gap_fraction: dec!(0.001),
            multiplier_base: dec!(1.6),
            multiplier_step: dec!(0.1),
        }
    }
}

impl DirectionalParams {
    pub fn gap_fraction_for(&self, timeframe: Timeframe) -> Decimal {
        self.gap_fractions
            .iter()
            .find(|g| g.timeframe == timeframe)
            .map(|g| g.fraction)
            .unwrap_or(self.default_gap_fraction)
    }
}

const ROW_UP: usize = 0;
const ROW_DOWN: usize = 1;

#[derive(Debug, Clone)]
pub struct DirectionalBlueprint {
    product: ProductId,
    timeframe: Timeframe,
    gap_fraction: Decimal,
    params: DirectionalParams,
}

impl DirectionalBlueprint {
    pub fn new(product: ProductId, timeframe: Timeframe, params: DirectionalParams) -> Self {
        Self {
            product,
            timeframe,
            gap_fraction: params.gap_fraction_for(timeframe),
            params,
        }
    }

    pub fn gap_fraction(&self) -> Decimal {
        self.gap_fraction
    }

    pub fn multiplier_for(&self, column: u64, direction: Direction) -> Decimal {
        let level = (column + direction.offset()) % 5;
        self.params.multiplier_base + self.params.multiplier_step * Decimal::from(level)
    }

    fn strike_contract(&self, ctx: &ColumnContext, direction: Direction, strike: Price) -> Contract {
        let row = match direction {
            Direction::Up => ROW_UP,
            Direction::Down => ROW_DOWN,
        };

        Contract::new(
            self.product.clone(),
            self.timeframe,
            GridPosition {
                column: ctx.column,
                row,
            },
            ContractShape::Strike { strike, direction },
            ctx.window,
            self.multiplier_for(ctx.column, direction),
        )
    }
}

impl ProductBlueprint for DirectionalBlueprint {
    fn product(&self) -> &ProductId {
        &self.product
    }

    fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    fn total_columns(&self) -> usize {
        self.params.total_columns
    }

    fn rows_per_column(&self) -> usize {
        2
    }

    fn winning_status(&self) -> ContractStatus {
        ContractStatus::Triggered
    }

    fn generate_column(&self, ctx: &ColumnContext) -> Vec<Contract> {
        let reference = ctx.reference_price.value();
        let gap = reference * self.gap_fraction;

        let mut contracts = Vec::with_capacity(2);
        if let Some(up) = Price::new(reference + gap) {
            contracts.push(self.strike_contract(ctx, Direction::Up, up));
        }
        if let Some(down) = Price::new(reference - gap) {
            contracts.push(self.strike_contract(ctx, Direction::Down, down));
        }
        contracts
    }

    fn is_winning_price(&self, contract: &Contract, point: &PricePoint) -> bool {
        match contract.shape {
            ContractShape::Strike {
                strike,
                direction: Direction::Up,
            } => point.price >= strike,
            ContractShape::Strike {
                strike,
                direction: Direction::Down,
            } => point.price <= strike,
            ContractShape::Band { .. } => false,
        }
    }

    fn create_maker_quote(&self, contract: &Contract) -> Decimal {
        match contract.shape {
            ContractShape::Strike { direction, .. } => {
                self.multiplier_for(contract.grid.column, direction)
            }
            ContractShape::Band { .. } => contract.base_multiplier,
        }
    }

    fn describe_settlement(&self, contract: &Contract, point: &PricePoint) -> String {
        match contract.shape {
            ContractShape::Strike { strike, direction } => format!(
                "price {} crossed {:?} strike {} at {}",
                point.price, direction, strike, point.timestamp
            ),
            ContractShape::Band { .. } => format!("price {} settled {}", point.price, contract.id),
        }
    }

    fn describe_expiry(&self, contract: &Contract) -> String {
        match contract.shape {
            ContractShape::Strike { strike, direction } => format!(
                "{:?} strike {} not reached before {}",
                direction, strike, contract.window.end
            ),
            ContractShape::Band { .. } => format!("{} expired", contract.id),
        }
    }
}
