// 3.1: range contracts. each column is a vertical stack of price bands around a
// grid-aligned reference. a band wins if any tick inside its window lands in [lower, upper].

use super::{ColumnContext, ProductBlueprint};
use crate::contract::{Contract, ContractShape, ContractStatus, GridPosition};
use crate::types::{Price, PricePoint, ProductId, Timeframe};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeParams {
    pub total_columns: usize,
    pub rows_above: usize,
    pub rows_below: usize,
    /// Band height in price units. also the grid the reference snaps to.
    pub price_spread: Decimal,
    pub multiplier_min: Decimal,
    pub multiplier_max: Decimal,
    /// Number of distinct multiplier levels cycled through the grid.
    pub multiplier_steps: u64,
}

impl Default for RangeParams {
    fn default() -> Self {
        Self {
            total_columns: 10,
            rows_above: 5,
            rows_below: 5,
            price_spread: dec!(1),
            multiplier_min: dec!(1.5),
            multiplier_max: dec!(5),
            multiplier_steps: 7,
        }
    }
}

impl RangeParams {
    pub fn total_rows(&self) -> usize {
        self.rows_above + self.rows_below + 1
    }
}

#[derive(Debug, Clone)]
pub struct RangeBlueprint {
    product: ProductId,
    timeframe: Timeframe,
    params: RangeParams,
}

impl RangeBlueprint {
    pub fn new(product: ProductId, timeframe: Timeframe, params: RangeParams) -> Self {
        Self {
            product,
            timeframe,
            params,
        }
    }

    pub fn params(&self) -> &RangeParams {
        &self.params
    }

    fn aligned_reference(&self, price: Price) -> Decimal {
        let spread = self.params.price_spread;
        (price.value() / spread).floor() * spread
    }

    // (column * rows + row) mod N, spread evenly over [min, max]
    pub fn multiplier_for(&self, column: u64, row: usize) -> Decimal {
        let steps = self.params.multiplier_steps;
        let (min, max) = (self.params.multiplier_min, self.params.multiplier_max);
        if steps <= 1 {
            return min;
        }

        let cell = column * self.params.total_rows() as u64 + row as u64;
        let level = Decimal::from(cell % steps);
        let span = Decimal::from(steps - 1);
        (min + (max - min) * level / span).round_dp(2)
    }
}

impl ProductBlueprint for RangeBlueprint {
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
        self.params.total_rows()
    }

    fn winning_status(&self) -> ContractStatus {
        ContractStatus::Exercised
    }

    fn generate_column(&self, ctx: &ColumnContext) -> Vec<Contract> {
        let spread = self.params.price_spread;
        let aligned = self.aligned_reference(ctx.reference_price);
        let mut contracts = Vec::with_capacity(self.params.total_rows());

        // row 0 is the top band
        for row in 0..self.params.total_rows() {
            let level = self.params.rows_above as i64 - row as i64;
            let lower = aligned + Decimal::from(level) * spread;
            let upper = lower + spread;

            // bands under zero cannot exist, the slot stays vacant
            let (Some(lower), Some(upper)) = (Price::new(lower), Price::new(upper)) else {
                continue;
            };

            contracts.push(Contract::new(
                self.product.clone(),
                self.timeframe,
                GridPosition {
                    column: ctx.column,
                    row,
                },
                ContractShape::Band { lower, upper },
                ctx.window,
                self.multiplier_for(ctx.column, row),
            ));
        }

        contracts
    }

    fn is_winning_price(&self, contract: &Contract, point: &PricePoint) -> bool {
        match contract.shape {
            ContractShape::Band { lower, upper } => point.price >= lower && point.price <= upper,
            ContractShape::Strike { .. } => false,
        }
    }

    fn create_maker_quote(&self, contract: &Contract) -> Decimal {
        self.multiplier_for(contract.grid.column, contract.grid.row)
    }

    fn describe_settlement(&self, contract: &Contract, point: &PricePoint) -> String {
        match contract.shape {
            ContractShape::Band { lower, upper } => format!(
                "price {} hit band [{}, {}] at {}",
                point.price, lower, upper, point.timestamp
            ),
            ContractShape::Strike { .. } => format!("price {} settled {}", point.price, contract.id),
        }
    }

    fn describe_expiry(&self, contract: &Contract) -> String {
        match contract.shape {
            ContractShape::Band { lower, upper } => format!(
                "band [{}, {}] not touched before {}",
                lower, upper, contract.window.end
            ),
            ContractShape::Strike { .. } => format!("{} expired", contract.id),
        }
    }
}
