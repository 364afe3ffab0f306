// 12.0: the transport-facing surface. request/response shapes a socket or http layer
// serializes, and the read-only queries it can issue. everything here is plain data.

use crate::contract::ClientContract;
use crate::engine::{DebugSnapshot, OrderError, OrderReceipt};
use crate::events::Event;
use crate::position::Position;
use crate::types::{ContractId, ProductId, Quote, Timeframe, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub user_id: UserId,
    pub contract_id: ContractId,
    pub amount: Quote,
    pub timeframe: Timeframe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    UnavailableError,
    LiquidityError,
    MarginError,
    InternalError,
}

/// Flat order result for clients. `success == false` always carries `error` and `error_code`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<Quote>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract: Option<ClientContract>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collateral: Option<Quote>,
}

impl OrderResponse {
    pub fn accepted(receipt: &OrderReceipt) -> Self {
        Self {
            success: true,
            error: None,
            error_code: None,
            balance: Some(receipt.balance),
            contract: Some(receipt.contract.clone()),
            position: Some(receipt.position.clone()),
            collateral: Some(receipt.collateral),
        }
    }

    pub fn rejected(error: &OrderError) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            error_code: Some(error.code()),
            balance: None,
            contract: None,
            position: None,
            collateral: None,
        }
    }
}

impl From<&Result<OrderReceipt, OrderError>> for OrderResponse {
    fn from(result: &Result<OrderReceipt, OrderError>) -> Self {
        match result {
            Ok(receipt) => Self::accepted(receipt),
            Err(e) => Self::rejected(e),
        }
    }
}

impl From<Result<OrderReceipt, OrderError>> for OrderResponse {
    fn from(result: Result<OrderReceipt, OrderError>) -> Self {
        Self::from(&result)
    }
}

// 12.1: read-only queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "query", rename_all = "snake_case")]
pub enum EngineQuery {
    Contracts { product: ProductId, timeframe: Timeframe },
    Balance { user_id: UserId },
    Positions { user_id: UserId },
    RecentEvents { count: usize },
    Snapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", content = "data", rename_all = "snake_case")]
pub enum QueryResponse {
    Contracts(Vec<ClientContract>),
    Balance(Option<Quote>),
    Positions(Vec<Position>),
    Events(Vec<Event>),
    Snapshot(Box<DebugSnapshot>),
    Error { code: ErrorCode, message: String },
}
