// 3.0: product blueprints. a blueprint is the pure strategy for one (product, timeframe):
// what a column of contracts looks like, when a contract wins, what it pays.
// the orderbook never looks at product types. everything product specific goes through here.
//
//   3.1 range.rs: band payoff, many rows per column
//   3.2 directional.rs: up/down strike payoff, two rows per column
//   3.3 registry.rs: blueprint lookup by (product, timeframe)

mod directional;
mod range;
mod registry;

pub use directional::{DirectionalBlueprint, DirectionalParams, GapFraction};
pub use range::{RangeBlueprint, RangeParams};
pub use registry::{ProductRegistry, RegistryError};

use crate::contract::{ClientContract, Contract, ContractStatus, ExerciseWindow, MakerQuote};
use crate::types::{Price, PricePoint, ProductId, Quote, Timeframe};
use rust_decimal::Decimal;
use std::fmt;

/// Inputs for generating one column of contracts.
#[derive(Debug, Clone, Copy)]
pub struct ColumnContext {
    /// Absolute column index since bootstrap.
    pub column: u64,
    pub window: ExerciseWindow,
    pub reference_price: Price,
}

pub trait ProductBlueprint: fmt::Debug + Send + Sync {
    fn product(&self) -> &ProductId;

    fn timeframe(&self) -> Timeframe;

    /// Width of the sliding window.
    fn total_columns(&self) -> usize;

    /// Slot count per column. generated contracts use rows in `0..rows_per_column()`.
    fn rows_per_column(&self) -> usize;

    /// Terminal status for an in-the-money resolution.
    fn winning_status(&self) -> ContractStatus;

    fn generate_column(&self, ctx: &ColumnContext) -> Vec<Contract>;

    fn is_winning_price(&self, contract: &Contract, point: &PricePoint) -> bool;

    fn clone_contract(&self, contract: &Contract) -> Contract {
        contract.clone()
    }

    fn to_client_contract(&self, contract: &Contract) -> ClientContract {
        ClientContract::project(contract, self.return_multiplier(contract))
    }

    fn return_multiplier(&self, contract: &Contract) -> Decimal {
        contract.effective_multiplier()
    }

    /// Deterministic multiplier a maker starts from when quoting this contract.
    fn create_maker_quote(&self, contract: &Contract) -> Decimal;

    /// None when the collateral does not fit in a `Decimal`.
    fn required_collateral(&self, amount: Quote, quote: &MakerQuote) -> Option<Quote> {
        amount.checked_mul(quote.collateral_per_unit)
    }

    fn describe_settlement(&self, contract: &Contract, point: &PricePoint) -> String;

    fn describe_expiry(&self, contract: &Contract) -> String;
}
