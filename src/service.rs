// 13.0 service.rs: async shell around the exchange.
//
// one task owns the Exchange and drains a FIFO command channel, so ticks,
// orders, maker rounds and queries are applied one at a time in arrival order.
// the price feed and the maker loop are interval tasks that only enqueue
// commands. shutdown: stop timers, join them, stop the actor, detach subscribers.

use std::ops::Deref;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::api::{EngineQuery, ErrorCode, OrderRequest, QueryResponse};
use crate::config::ClearingConfig;
use crate::contract::ClientContract;
use crate::engine::{EngineError, Exchange, OrderError, OrderReceipt, TickResult};
use crate::events::Event;
use crate::liquidity::MakerRound;
use crate::price_feed::{PriceFeedError, PriceSource, RandomWalkOracle};
use crate::types::{Price, ProductId, Quote, Timeframe, Timestamp, UserId};

const COMMAND_BUFFER: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Clearing service stopped")]
    Stopped,

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Price feed error: {0}")]
    Feed(#[from] PriceFeedError),

    #[error("Task failed: {0}")]
    Join(String),

    #[error("Query failed ({code:?}): {message}")]
    Query { code: ErrorCode, message: String },
}

impl ServiceError {
    fn from_response(response: QueryResponse) -> Self {
        match response {
            QueryResponse::Error { code, message } => Self::Query { code, message },
            _ => Self::Query {
                code: ErrorCode::InternalError,
                message: "unexpected query response".to_string(),
            },
        }
    }
}

/// Wall time for the service: a fixed base plus tokio's monotonic elapsed time.
/// Under a paused test runtime this advances only with virtual time.
#[derive(Debug, Clone, Copy)]
pub struct ServiceClock {
    base: Timestamp,
    started: Instant,
}

impl ServiceClock {
    pub fn start(base: Timestamp) -> Self {
        Self {
            base,
            started: Instant::now(),
        }
    }

    pub fn now(&self) -> Timestamp {
        let elapsed = i64::try_from(self.started.elapsed().as_millis()).unwrap_or(i64::MAX);
        self.base.plus_millis(elapsed)
    }
}

/// Timer periods. `None` disables the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceTimers {
    pub price_interval: Option<Duration>,
    pub maker_interval: Option<Duration>,
}

impl ServiceTimers {
    pub fn from_config(config: &ClearingConfig) -> Self {
        Self {
            price_interval: Some(Duration::from_millis(config.price_feed.interval_ms)),
            maker_interval: config
                .maker
                .enabled
                .then(|| Duration::from_millis(config.maker.interval_ms)),
        }
    }

    pub fn disabled() -> Self {
        Self {
            price_interval: None,
            maker_interval: None,
        }
    }
}

enum Command {
    FeedTick,
    MakerTick,
    Tick {
        price: Price,
        timestamp: Timestamp,
        reply: oneshot::Sender<Result<TickResult, EngineError>>,
    },
    RunMaker {
        reply: oneshot::Sender<Result<MakerRound, EngineError>>,
    },
    PlaceOrder {
        product: ProductId,
        request: OrderRequest,
        reply: oneshot::Sender<Result<OrderReceipt, OrderError>>,
    },
    InitializeUser {
        user_id: UserId,
        reply: oneshot::Sender<bool>,
    },
    Query {
        query: EngineQuery,
        reply: oneshot::Sender<QueryResponse>,
    },
    Subscribe {
        reply: oneshot::Sender<broadcast::Receiver<Event>>,
    },
    Stop,
}

/// Cheap, cloneable sender side of the service.
#[derive(Clone)]
pub struct ServiceClient {
    commands: mpsc::Sender<Command>,
}

impl ServiceClient {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, ServiceError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| ServiceError::Stopped)?;
        rx.await.map_err(|_| ServiceError::Stopped)
    }

    /// Places an order. a stopped service reports as an internal error.
    pub async fn place_order(&self, product: ProductId, request: OrderRequest) -> Result<OrderReceipt, OrderError> {
        self.request(|reply| Command::PlaceOrder {
            product,
            request,
            reply,
        })
        .await
        .unwrap_or_else(|e| Err(OrderError::Internal(e.to_string())))
    }

    pub async fn initialize_user(&self, user_id: UserId) -> Result<bool, ServiceError> {
        self.request(|reply| Command::InitializeUser { user_id, reply }).await
    }

    pub async fn tick(&self, price: Price, timestamp: Timestamp) -> Result<TickResult, ServiceError> {
        Ok(self
            .request(|reply| Command::Tick {
                price,
                timestamp,
                reply,
            })
            .await??)
    }

    pub async fn run_market_maker(&self) -> Result<MakerRound, ServiceError> {
        Ok(self.request(|reply| Command::RunMaker { reply }).await??)
    }

    pub async fn query(&self, query: EngineQuery) -> Result<QueryResponse, ServiceError> {
        self.request(|reply| Command::Query { query, reply }).await
    }

    pub async fn contracts(&self, product: ProductId, timeframe: Timeframe) -> Result<Vec<ClientContract>, ServiceError> {
        match self.query(EngineQuery::Contracts { product, timeframe }).await? {
            QueryResponse::Contracts(contracts) => Ok(contracts),
            other => Err(ServiceError::from_response(other)),
        }
    }

    pub async fn balance(&self, user_id: UserId) -> Result<Option<Quote>, ServiceError> {
        match self.query(EngineQuery::Balance { user_id }).await? {
            QueryResponse::Balance(balance) => Ok(balance),
            other => Err(ServiceError::from_response(other)),
        }
    }

    /// Live event stream. closes when the service shuts down.
    pub async fn subscribe(&self) -> Result<broadcast::Receiver<Event>, ServiceError> {
        self.request(|reply| Command::Subscribe { reply }).await
    }
}

/// Owner handle: everything a client can do, plus shutdown.
pub struct ServiceHandle {
    client: ServiceClient,
    timer_stop: watch::Sender<bool>,
    timers: Vec<JoinHandle<()>>,
    actor: JoinHandle<Exchange>,
}

impl Deref for ServiceHandle {
    type Target = ServiceClient;

    fn deref(&self) -> &ServiceClient {
        &self.client
    }
}

impl ServiceHandle {
    pub fn client(&self) -> ServiceClient {
        self.client.clone()
    }

    /// Stops the timers, lets queued commands finish, and hands back the exchange.
    pub async fn shutdown(self) -> Result<Exchange, ServiceError> {
        let _ = self.timer_stop.send(true);
        for timer in self.timers {
            timer.await.map_err(|e| ServiceError::Join(e.to_string()))?;
        }

        // the actor may already be gone if every sender dropped
        let _ = self.client.commands.send(Command::Stop).await;
        let exchange = self.actor.await.map_err(|e| ServiceError::Join(e.to_string()))?;

        tracing::info!("clearing service stopped");
        Ok(exchange)
    }
}

pub struct ClearingService;

impl ClearingService {
    /// Spawns the actor and its timers on the current runtime. bootstraps the
    /// exchange from the source's current price if that has not happened yet.
    pub fn spawn(
        mut exchange: Exchange,
        source: Box<dyn PriceSource>,
        timers: ServiceTimers,
        base: Timestamp,
    ) -> Result<ServiceHandle, ServiceError> {
        let clock = ServiceClock::start(base);
        if !exchange.is_bootstrapped() {
            let books = exchange.bootstrap(source.current(), clock.now())?;
            tracing::info!(books, price = %source.current(), "exchange bootstrapped");
        }

        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let (timer_stop, stop_rx) = watch::channel(false);

        let mut handles = Vec::new();
        if let Some(period) = timers.price_interval {
            handles.push(tokio::spawn(run_timer(period, tx.clone(), stop_rx.clone(), || {
                Command::FeedTick
            })));
        }
        if let Some(period) = timers.maker_interval {
            handles.push(tokio::spawn(run_timer(period, tx.clone(), stop_rx, || Command::MakerTick)));
        }

        let actor = tokio::spawn(run_actor(exchange, source, clock, rx));
        tracing::info!(timers = handles.len(), "clearing service started");

        Ok(ServiceHandle {
            client: ServiceClient { commands: tx },
            timer_stop,
            timers: handles,
            actor,
        })
    }

    /// Builds the exchange and the random walk feed from config, then spawns.
    pub fn from_config(config: &ClearingConfig) -> Result<ServiceHandle, ServiceError> {
        let exchange = Exchange::from_config(config)?;
        let oracle = RandomWalkOracle::new(config.price_feed.clone())?;
        Self::spawn(
            exchange,
            Box::new(oracle),
            ServiceTimers::from_config(config),
            Timestamp::now(),
        )
    }
}

async fn run_timer(
    period: Duration,
    commands: mpsc::Sender<Command>,
    mut stop: watch::Receiver<bool>,
    make: fn() -> Command,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if commands.send(make()).await.is_err() {
                    break;
                }
            }
            _ = stop.changed() => break,
        }
    }
}

async fn run_actor(
    mut exchange: Exchange,
    mut source: Box<dyn PriceSource>,
    clock: ServiceClock,
    mut commands: mpsc::Receiver<Command>,
) -> Exchange {
    while let Some(command) = commands.recv().await {
        exchange.set_time(clock.now());

        match command {
            Command::FeedTick => {
                let point = source.next_tick(clock.now());
                if let Err(e) = exchange.tick(point.price, point.timestamp) {
                    tracing::warn!(error = %e, "feed tick failed");
                }
            }
            Command::MakerTick => match exchange.run_market_maker() {
                Ok(round) if round.quotes_applied > 0 => {
                    tracing::debug!(quotes = round.quotes_applied, "maker round");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "maker round failed"),
            },
            Command::Tick {
                price,
                timestamp,
                reply,
            } => {
                let _ = reply.send(exchange.tick(price, timestamp));
            }
            Command::RunMaker { reply } => {
                let _ = reply.send(exchange.run_market_maker());
            }
            Command::PlaceOrder {
                product,
                request,
                reply,
            } => {
                let _ = reply.send(exchange.place_order(&product, &request));
            }
            Command::InitializeUser { user_id, reply } => {
                let _ = reply.send(exchange.initialize_user(&user_id));
            }
            Command::Query { query, reply } => {
                let _ = reply.send(exchange.query(&query));
            }
            Command::Subscribe { reply } => {
                let _ = reply.send(exchange.subscribe());
            }
            Command::Stop => break,
        }
    }

    exchange.detach_subscribers();
    exchange
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::{ProductRegistry, RangeParams};
    use crate::engine::EngineConfig;
    use crate::ledger::LedgerParams;
    use crate::liquidity::{MakerParams, MarketMaker};
    use crate::price_feed::ScriptedPrices;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use tokio::sync::broadcast::error::RecvError;

    const TF: Timeframe = Timeframe(2000);

    fn exchange() -> Exchange {
        let mut registry = ProductRegistry::new();
        registry.register_range(
            &[TF],
            RangeParams {
                total_columns: 4,
                rows_above: 2,
                rows_below: 2,
                multiplier_min: dec!(2),
                multiplier_max: dec!(2),
                multiplier_steps: 1,
                ..Default::default()
            },
        );
        let mut ex = Exchange::new(
            EngineConfig::default(),
            registry,
            LedgerParams {
                starting_balance: dec!(100),
                house_initial: dec!(1_000_000),
            },
        );
        ex.attach_market_maker(MarketMaker::new(MakerParams {
            seed: Some(9),
            ..Default::default()
        }))
        .unwrap();
        ex
    }

    fn script(prices: Vec<Decimal>) -> Box<dyn PriceSource> {
        Box::new(ScriptedPrices::new(prices).unwrap())
    }

    fn alice() -> UserId {
        UserId::new("alice")
    }

    #[tokio::test(start_paused = true)]
    async fn clock_follows_virtual_time() {
        let clock = ServiceClock::start(Timestamp::from_millis(1_000));
        tokio::time::sleep(Duration::from_millis(750)).await;
        assert_eq!(clock.now(), Timestamp::from_millis(1_750));
    }

    #[tokio::test(start_paused = true)]
    async fn manual_commands_without_timers() {
        let handle = ClearingService::spawn(
            exchange(),
            script(vec![dec!(100)]),
            ServiceTimers::disabled(),
            Timestamp::from_millis(0),
        )
        .unwrap();

        assert!(handle.initialize_user(alice()).await.unwrap());
        assert!(!handle.initialize_user(alice()).await.unwrap());
        assert_eq!(handle.balance(alice()).await.unwrap().unwrap().value(), dec!(100));

        let round = handle.run_market_maker().await.unwrap();
        assert_eq!(round.quotes_applied, 20);

        let contracts = handle.contracts(ProductId::range(), TF).await.unwrap();
        assert_eq!(contracts.len(), 20);
        assert!(contracts.iter().all(|c| c.maker_id.is_some()));

        let result = handle
            .tick(Price::new_unchecked(dec!(100)), Timestamp::from_millis(100))
            .await
            .unwrap();
        assert_eq!(result.columns_advanced, 0);

        let exchange = handle.shutdown().await.unwrap();
        assert!(exchange.ledger().is_conserved());
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_pair_is_an_error_not_an_empty_book() {
        let handle = ClearingService::spawn(
            exchange(),
            script(vec![dec!(100)]),
            ServiceTimers::disabled(),
            Timestamp::from_millis(0),
        )
        .unwrap();

        for (product, timeframe) in [(ProductId::directional(), TF), (ProductId::range(), Timeframe(7000))] {
            let err = handle.contracts(product, timeframe).await.unwrap_err();
            assert!(matches!(
                err,
                ServiceError::Query {
                    code: ErrorCode::ValidationError,
                    ..
                }
            ));
        }

        // a registered pair still answers normally
        assert_eq!(handle.contracts(ProductId::range(), TF).await.unwrap().len(), 20);
        assert_eq!(handle.balance(alice()).await.unwrap(), None);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_order_does_not_stop_the_service() {
        let handle = ClearingService::spawn(
            exchange(),
            script(vec![dec!(100)]),
            ServiceTimers::disabled(),
            Timestamp::from_millis(0),
        )
        .unwrap();
        handle.initialize_user(alice()).await.unwrap();
        handle.run_market_maker().await.unwrap();

        let target = handle
            .contracts(ProductId::range(), TF)
            .await
            .unwrap()
            .into_iter()
            .find(|c| c.column == 1)
            .unwrap();
        let order = |amount: Decimal| OrderRequest {
            user_id: alice(),
            contract_id: target.contract_id.clone(),
            amount: Quote::new(amount),
            timeframe: TF,
        };

        let err = handle.place_order(ProductId::range(), order(Decimal::MAX)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
        assert_eq!(handle.balance(alice()).await.unwrap().unwrap().value(), dec!(100));

        let receipt = handle.place_order(ProductId::range(), order(dec!(5))).await.unwrap();
        assert!(receipt.position.is_open());

        let exchange = handle.shutdown().await.unwrap();
        assert!(exchange.ledger().is_conserved());
    }

    #[tokio::test(start_paused = true)]
    async fn timers_drive_settlement() {
        // the feed holds 102 until the order window opens at 2000ms, then prints 100.5
        let mut prices = vec![dec!(102); 9];
        prices.push(dec!(100.5));
        let handle = ClearingService::spawn(
            exchange(),
            script(prices),
            ServiceTimers {
                price_interval: Some(Duration::from_millis(250)),
                maker_interval: Some(Duration::from_millis(100)),
            },
            Timestamp::from_millis(0),
        )
        .unwrap();

        handle.initialize_user(alice()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let target = handle
            .contracts(ProductId::range(), TF)
            .await
            .unwrap()
            .into_iter()
            .find(|c| c.column == 1 && c.lower_price.map(|p| p.value()) == Some(dec!(100)))
            .unwrap();
        assert!(target.maker_id.is_some());

        let receipt = handle
            .place_order(
                ProductId::range(),
                OrderRequest {
                    user_id: alice(),
                    contract_id: target.contract_id.clone(),
                    amount: Quote::new(dec!(10)),
                    timeframe: TF,
                },
            )
            .await
            .unwrap();
        assert_eq!(receipt.balance.value(), dec!(90));

        tokio::time::sleep(Duration::from_millis(3_000)).await;
        assert_eq!(handle.balance(alice()).await.unwrap().unwrap().value(), dec!(110));

        let exchange = handle.shutdown().await.unwrap();
        assert!(exchange.ledger().is_conserved());
        assert_eq!(exchange.positions().open_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_subscriptions() {
        let handle = ClearingService::spawn(
            exchange(),
            script(vec![dec!(100)]),
            ServiceTimers {
                price_interval: Some(Duration::from_millis(250)),
                maker_interval: None,
            },
            Timestamp::from_millis(0),
        )
        .unwrap();

        let mut events = handle.subscribe().await.unwrap();
        let client = handle.client();
        handle.initialize_user(alice()).await.unwrap();
        handle.shutdown().await.unwrap();

        let mut seen = 0;
        loop {
            match events.recv().await {
                Ok(_) => seen += 1,
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
        assert!(seen >= 1);

        assert!(matches!(client.balance(alice()).await, Err(ServiceError::Stopped)));
        let err = client
            .place_order(
                ProductId::range(),
                OrderRequest {
                    user_id: alice(),
                    contract_id: crate::types::ContractId::new("x"),
                    amount: Quote::new(dec!(1)),
                    timeframe: TF,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::api::ErrorCode::InternalError);
    }
}
