// 8.0: the exchange. ties the registry, orderbook network, ledgers and market maker
// together behind one &mut self owner. order placement, ticks and maker rounds are
// the only entry points that mutate. deterministic, no I/O, no clock of its own.

mod config;
mod core;
mod liquidity;
mod orders;
mod pricing;
mod results;

pub use config::EngineConfig;
pub use core::{DebugSnapshot, Exchange};
pub use results::{EngineError, OrderError, OrderReceipt, TickResult};
