//! Clearing engine simulation.
//!
//! Starts the clearing service with a random walk feed and the market maker,
//! then lets a handful of synthetic users stake on whatever is quoted until the
//! run time is up or ctrl-c arrives. Prints a JSON summary at the end.
//!
//! Environment:
//!   CLEARING_ENV       development | staging | production (default development)
//!   CLEARING_CONFIG    path to a JSON config, overrides CLEARING_ENV
//!   CLEARING_SIM_SECS  run time in seconds (default 20)
//!   RUST_LOG           tracing filter (default info)

use std::time::Duration;

use anyhow::Context;
use ephemeral_clearing::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

const USERS: [&str; 4] = ["alice", "bob", "carol", "dave"];
const ORDER_INTERVAL: Duration = Duration::from_millis(400);

#[derive(Debug, Default, Serialize)]
struct OrderTally {
    accepted: usize,
    validation: usize,
    unavailable: usize,
    liquidity: usize,
    margin: usize,
    internal: usize,
}

impl OrderTally {
    fn record(&mut self, result: &Result<OrderReceipt, OrderError>) {
        match result.as_ref().map_err(OrderError::code) {
            Ok(_) => self.accepted += 1,
            Err(ErrorCode::ValidationError) => self.validation += 1,
            Err(ErrorCode::UnavailableError) => self.unavailable += 1,
            Err(ErrorCode::LiquidityError) => self.liquidity += 1,
            Err(ErrorCode::MarginError) => self.margin += 1,
            Err(ErrorCode::InternalError) => self.internal += 1,
        }
    }
}

#[derive(Debug, Default, Serialize)]
struct EventTally {
    settled: usize,
    expired: usize,
    lagged: u64,
}

#[derive(Debug, Serialize)]
struct Summary {
    orders: OrderTally,
    events: EventTally,
    balances: Vec<(String, Option<Quote>)>,
    house: Quote,
    conserved: bool,
    open_positions: usize,
    total_positions: usize,
    last_price: Option<Price>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_config()?;
    let run_for = std::env::var("CLEARING_SIM_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(20));

    let handle = ClearingService::from_config(&config).context("failed to start clearing service")?;

    let mut events = handle.subscribe().await?;
    let watcher = tokio::spawn(async move {
        let mut tally = EventTally::default();
        loop {
            match events.recv().await {
                Ok(event) => match event.payload {
                    EventPayload::Network(NetworkEvent::Book {
                        event: BookEvent::ContractSettled(_),
                        ..
                    }) => tally.settled += 1,
                    EventPayload::Network(NetworkEvent::Book {
                        event: BookEvent::ContractExpired(_),
                        ..
                    }) => tally.expired += 1,
                    _ => {}
                },
                Err(RecvError::Lagged(n)) => tally.lagged += n,
                Err(RecvError::Closed) => break,
            }
        }
        tally
    });

    let users: Vec<UserId> = USERS.iter().map(|u| UserId::new(*u)).collect();
    for user in &users {
        handle.initialize_user(user.clone()).await?;
    }

    let pairs = config.registry().pairs();
    let mut rng = match config.price_feed.seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(1)),
        None => StdRng::from_entropy(),
    };
    let mut orders = OrderTally::default();

    tracing::info!(secs = run_for.as_secs(), users = users.len(), "simulation running");
    let deadline = tokio::time::sleep(run_for);
    tokio::pin!(deadline);
    let mut pace = tokio::time::interval(ORDER_INTERVAL);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
            _ = pace.tick() => {
                for user in &users {
                    let Some((product, timeframe)) = pairs.choose(&mut rng).cloned() else {
                        continue;
                    };
                    let quoted: Vec<ClientContract> = handle
                        .contracts(product.clone(), timeframe)
                        .await?
                        .into_iter()
                        .filter(|c| c.maker_id.is_some())
                        .collect();
                    let Some(contract) = quoted.choose(&mut rng) else {
                        continue;
                    };

                    let request = OrderRequest {
                        user_id: user.clone(),
                        contract_id: contract.contract_id.clone(),
                        amount: Quote::new(Decimal::from(rng.gen_range(1..=25))),
                        timeframe,
                    };
                    let result = handle.place_order(product, request).await;
                    tracing::debug!(response = %serde_json::to_string(&OrderResponse::from(&result))?, "order");
                    orders.record(&result);
                }
            }
        }
    }

    let exchange = handle.shutdown().await?;
    let events = watcher.await.context("event watcher panicked")?;

    let summary = Summary {
        orders,
        events,
        balances: users
            .iter()
            .map(|u| (u.to_string(), exchange.balance(u)))
            .collect(),
        house: exchange.house_balance(),
        conserved: exchange.ledger().is_conserved(),
        open_positions: exchange.positions().open_count(),
        total_positions: exchange.positions().len(),
        last_price: exchange.last_price(),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    anyhow::ensure!(summary.conserved, "ledger is not conserved");
    Ok(())
}

fn load_config() -> anyhow::Result<ClearingConfig> {
    if let Ok(path) = std::env::var("CLEARING_CONFIG") {
        return ClearingConfig::from_json_file(&path).with_context(|| format!("loading {path}"));
    }

    let name = std::env::var("CLEARING_ENV").unwrap_or_else(|_| "development".to_string());
    let env = Environment::from_name(&name).with_context(|| format!("unknown environment {name}"))?;
    let config = env.config();
    config.validate()?;
    Ok(config)
}
