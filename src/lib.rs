// ephemeral-clearing: clearing engine for short-lived, time-boxed contracts.
// every contract has one exercise window and is settled at most once.
// the engine core is synchronous and deterministic. async lives in service.rs only.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: ProductId, ContractId, Timeframe, Price, Quote, Timestamp
//   2.x  contract.rs: contract, exercise window, status lifecycle, client view
//   3.x  blueprint/: per-product column generation and payoff (range, directional)
//   4.x  position.rs: user stakes and their settlement
//   5.x  orderbook.rs: ring buffer of columns, advance and settlement scan
//   6.x  network.rs: one orderbook per (product, timeframe)
//   7.x  config.rs: engine, ledger, feed, maker and product settings, env presets
//   8.x  engine/: the exchange: orders, ticks, maker rounds, queries
//   9.x  price_feed.rs: price sources (random walk, scripted)
//   9.3  liquidity.rs: automated market maker
//   10.x ledger.rs: user balances and the house account
//   11.x events.rs: event payloads and the event bus
//   12.x api.rs: request/response shapes for clients
//   13.x service.rs: tokio actor, timers, shutdown

// core clearing modules
pub mod blueprint;
pub mod contract;
pub mod engine;
pub mod events;
pub mod ledger;
pub mod network;
pub mod orderbook;
pub mod position;
pub mod types;

// integration modules
pub mod api;
pub mod config;
pub mod liquidity;
pub mod price_feed;
pub mod service;

// re exports for convenience
pub use blueprint::*;
pub use contract::*;
pub use engine::*;
pub use events::*;
pub use ledger::*;
pub use network::*;
pub use orderbook::*;
pub use position::*;
pub use types::*;
pub use api::{EngineQuery, ErrorCode, OrderRequest, OrderResponse, QueryResponse};
pub use config::{ClearingConfig, ConfigError, Environment};
pub use liquidity::{MakerParams, MakerRound, MarketMaker};
pub use price_feed::{PriceFeedError, PriceFeedParams, PriceSource, RandomWalkOracle, ScriptedPrices};
pub use service::{ClearingService, ServiceClient, ServiceClock, ServiceError, ServiceHandle, ServiceTimers};
