// 8.0.2: result types and errors for engine operations.

use crate::api::ErrorCode;
use crate::config::ConfigError;
use crate::contract::ClientContract;
use crate::ledger::LedgerError;
use crate::network::NetworkError;
use crate::orderbook::TickOutcome;
use crate::position::Position;
use crate::types::{ContractId, Price, ProductId, Quote, Timeframe, Timestamp, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub user_id: UserId,
    pub product: ProductId,
    pub timeframe: Timeframe,
    pub balance: Quote, // after the collateral debit
    pub contract: ClientContract,
    pub position: Position,
    pub collateral: Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickResult {
    pub price: Price,
    pub timestamp: Timestamp,
    pub columns_advanced: u64,
    pub contracts_settled: usize,
    pub contracts_expired: usize,
    pub contracts_abandoned: usize,
    pub positions_settled: usize,
    pub total_paid: Quote,
}

impl TickResult {
    pub(super) fn new(price: Price, timestamp: Timestamp, outcome: &TickOutcome) -> Self {
        Self {
            price,
            timestamp,
            columns_advanced: outcome.columns_advanced,
            contracts_settled: outcome.settled,
            contracts_expired: outcome.expired,
            contracts_abandoned: outcome.abandoned,
            positions_settled: 0,
            total_paid: Quote::zero(),
        }
    }
}

/// Why an order was turned away. Display strings are what clients see.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    #[error("{0}")]
    Validation(String),

    #[error("Contract not available")]
    Unavailable { contract_id: ContractId, reason: String },

    #[error("No maker liquidity available")]
    Liquidity { contract_id: ContractId },

    #[error("Margin check failed")]
    Margin { required: Quote, available: Quote },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrderError {
    pub fn code(&self) -> ErrorCode {
        match self {
            OrderError::Validation(_) => ErrorCode::ValidationError,
            OrderError::Unavailable { .. } => ErrorCode::UnavailableError,
            OrderError::Liquidity { .. } => ErrorCode::LiquidityError,
            OrderError::Margin { .. } => ErrorCode::MarginError,
            OrderError::Internal(_) => ErrorCode::InternalError,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("Exchange not bootstrapped")]
    NotBootstrapped,

    #[error("Exchange already bootstrapped")]
    AlreadyBootstrapped,

    #[error("No market maker attached")]
    NoMarketMaker,

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}
