// 8.0 engine/core.rs: the exchange root. owns every component and the event bus.

use super::config::EngineConfig;
use super::results::EngineError;
use crate::api::{EngineQuery, ErrorCode, QueryResponse};
use crate::blueprint::ProductRegistry;
use crate::config::{ClearingConfig, ConfigError};
use crate::contract::ClientContract;
use crate::events::{Event, EventBus, EventPayload};
use crate::ledger::{BalanceLedger, LedgerParams, LedgerSnapshot};
use crate::liquidity::MarketMaker;
use crate::network::OrderbookNetwork;
use crate::orderbook::BookSnapshot;
use crate::position::{Position, PositionLedger};
use crate::types::{ContractId, Price, ProductId, Quote, Timeframe, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/** 8.1: main exchange struct. all state lives here */
#[derive(Debug)]
pub struct Exchange {
    pub(super) config: EngineConfig,
    pub(super) registry: ProductRegistry,
    pub(super) network: OrderbookNetwork,
    pub(super) ledger: BalanceLedger,
    pub(super) positions: PositionLedger,
    pub(super) maker: Option<MarketMaker>,
    pub(super) bus: EventBus,
    pub(super) current_time: Timestamp,
    pub(super) last_price: Option<Price>,
    pub(super) bootstrapped: bool,
}

/// Read-only view of the whole exchange, for debugging and tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugSnapshot {
    pub time: Timestamp,
    pub last_price: Option<Price>,
    pub books: Vec<BookSnapshot>,
    pub ledger: LedgerSnapshot,
    pub open_positions: Vec<Position>,
    pub total_positions: usize,
    pub maker_quoted: usize,
    pub events_retained: usize,
}

impl Exchange {
    pub fn new(config: EngineConfig, registry: ProductRegistry, ledger: LedgerParams) -> Self {
        let bus = EventBus::new(config.max_events, config.event_capacity);
        Self {
            config,
            registry,
            network: OrderbookNetwork::new(),
            ledger: BalanceLedger::new(ledger),
            positions: PositionLedger::new(),
            maker: None,
            bus,
            current_time: Timestamp::from_millis(0),
            last_price: None,
            bootstrapped: false,
        }
    }

    /// Builds the exchange from a full config, attaching the maker if enabled.
    pub fn from_config(config: &ClearingConfig) -> Result<Self, EngineError> {
        config.validate()?;

        let mut exchange = Self::new(config.engine.clone(), config.registry(), config.ledger.clone());
        if exchange.registry.is_empty() {
            return Err(EngineError::Config(ConfigError::InvalidProduct {
                reason: "registry is empty".to_string(),
            }));
        }
        if config.maker.enabled {
            exchange.attach_market_maker(MarketMaker::new(config.maker.clone()))?;
        }
        Ok(exchange)
    }

    /// Starts the maker against the ledger and keeps it for later rounds.
    pub fn attach_market_maker(&mut self, mut maker: MarketMaker) -> Result<(), EngineError> {
        maker.start(&mut self.ledger)?;
        self.maker = Some(maker);
        self.flush_ledger();
        Ok(())
    }

    pub fn bootstrap(&mut self, price: Price, now: Timestamp) -> Result<usize, EngineError> {
        if self.bootstrapped {
            return Err(EngineError::AlreadyBootstrapped);
        }

        self.current_time = now;
        let books = self.network.bootstrap(&self.registry, price, now)?;
        self.last_price = Some(price);
        self.bootstrapped = true;
        self.flush_network();

        Ok(books)
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped
    }

    pub fn set_time(&mut self, timestamp: Timestamp) {
        self.current_time = timestamp;
    }

    pub fn time(&self) -> Timestamp {
        self.current_time
    }

    pub fn advance_time(&mut self, millis: i64) {
        self.current_time = self.current_time.plus_millis(millis);
    }

    pub fn last_price(&self) -> Option<Price> {
        self.last_price
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &ProductRegistry {
        &self.registry
    }

    pub fn network(&self) -> &OrderbookNetwork {
        &self.network
    }

    pub fn ledger(&self) -> &BalanceLedger {
        &self.ledger
    }

    pub fn positions(&self) -> &PositionLedger {
        &self.positions
    }

    pub fn market_maker(&self) -> Option<&MarketMaker> {
        self.maker.as_ref()
    }

    // seeds once, false if the user already existed
    pub fn initialize_user(&mut self, user_id: &UserId) -> bool {
        let created = self.ledger.initialize_user(user_id);
        self.flush_ledger();
        created
    }

    pub fn balance(&self, user_id: &UserId) -> Option<Quote> {
        self.ledger.balance(user_id)
    }

    pub fn house_balance(&self) -> Quote {
        self.ledger.house_balance()
    }

    pub fn positions_for_user(&self, user_id: &UserId) -> Vec<Position> {
        self.positions
            .positions_for_user(user_id)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn contracts(&self, product: &ProductId, timeframe: Timeframe) -> Result<Vec<ClientContract>, EngineError> {
        Ok(self.network.contracts(product, timeframe)?)
    }

    pub fn contract(
        &self,
        product: &ProductId,
        timeframe: Timeframe,
        contract_id: &ContractId,
    ) -> Option<ClientContract> {
        let blueprint = self.registry.get_blueprint(product, timeframe).ok()?;
        self.network
            .contract_by_id(product, timeframe, contract_id)
            .map(|c| blueprint.to_client_contract(c))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Ends every open subscription. the retained log is kept.
    pub fn detach_subscribers(&mut self) {
        self.bus.detach_subscribers();
    }

    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.bus.events()
    }

    pub fn recent_events(&self, count: usize) -> Vec<Event> {
        self.bus.recent(count)
    }

    pub fn debug_snapshot(&self) -> DebugSnapshot {
        let mut open_positions: Vec<Position> = self.positions.open_positions().cloned().collect();
        open_positions.sort_by_key(|p| p.opened_at);

        DebugSnapshot {
            time: self.current_time,
            last_price: self.last_price,
            books: self.network.snapshot(),
            ledger: self.ledger.snapshot(),
            open_positions,
            total_positions: self.positions.len(),
            maker_quoted: self.maker.as_ref().map(MarketMaker::quoted_count).unwrap_or(0),
            events_retained: self.bus.len(),
        }
    }

    pub fn query(&self, query: &EngineQuery) -> QueryResponse {
        match query {
            EngineQuery::Contracts { product, timeframe } => match self.contracts(product, *timeframe) {
                Ok(contracts) => QueryResponse::Contracts(contracts),
                Err(e) => QueryResponse::Error {
                    code: ErrorCode::ValidationError,
                    message: e.to_string(),
                },
            },
            EngineQuery::Balance { user_id } => QueryResponse::Balance(self.balance(user_id)),
            EngineQuery::Positions { user_id } => QueryResponse::Positions(self.positions_for_user(user_id)),
            EngineQuery::RecentEvents { count } => QueryResponse::Events(self.recent_events(*count)),
            EngineQuery::Snapshot => QueryResponse::Snapshot(Box::new(self.debug_snapshot())),
        }
    }

    pub(super) fn publish(&mut self, payload: EventPayload) {
        self.bus.publish(self.current_time, payload);
    }

    pub(super) fn flush_network(&mut self) {
        for event in self.network.drain_events() {
            self.publish(EventPayload::Network(event));
        }
    }

    pub(super) fn flush_ledger(&mut self) {
        for event in self.ledger.drain_events() {
            self.publish(EventPayload::BalanceChanged(event));
        }
    }

    pub(super) fn flush_positions(&mut self) {
        for event in self.positions.drain_events() {
            self.publish(EventPayload::Position(event));
        }
    }
}
