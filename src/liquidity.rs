// 9.0 liquidity.rs: the market maker. contracts take no stakes until somebody quotes them,
// and this is that somebody. each round walks every book, quotes whatever it has not
// quoted yet, and forgets contracts that have left the active set.

use crate::blueprint::ProductRegistry;
use crate::contract::MakerQuote;
use crate::events::BalanceReason;
use crate::ledger::{BalanceLedger, LedgerError};
use crate::network::OrderbookNetwork;
use crate::types::{ContractId, Quote, UserId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MakerParams {
    pub enabled: bool,
    pub maker_id: UserId,
    // Quoting interval in milliseconds
    pub interval_ms: u64,
    // Balance the maker is topped up to on start
    pub balance_floor: Decimal,
    pub collateral_per_unit_min: Decimal,
    pub collateral_per_unit_max: Decimal,
    pub seed: Option<u64>,
}

impl Default for MakerParams {
    fn default() -> Self {
        Self {
            enabled: true,
            maker_id: UserId::new("market-maker"),
            interval_ms: 500,
            balance_floor: dec!(100_000),
            collateral_per_unit_min: dec!(1),
            collateral_per_unit_max: dec!(1),
            seed: None,
        }
    }
}

/// What one quoting round did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MakerRound {
    pub pairs_scanned: usize,
    pub quotes_applied: usize,
    pub forgotten: usize,
    pub failures: usize,
}

#[derive(Debug)]
pub struct MarketMaker {
    params: MakerParams,
    rng: StdRng,
    quoted: HashSet<ContractId>,
    started: bool,
}

impl MarketMaker {
    pub fn new(params: MakerParams) -> Self {
        let rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            params,
            rng,
            quoted: HashSet::new(),
            started: false,
        }
    }

    pub fn maker_id(&self) -> &UserId {
        &self.params.maker_id
    }

    pub fn params(&self) -> &MakerParams {
        &self.params
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn quoted_count(&self) -> usize {
        self.quoted.len()
    }

    /// Registers the maker with the ledger and tops it up to the floor.
    pub fn start(&mut self, ledger: &mut BalanceLedger) -> Result<(), LedgerError> {
        let maker_id = self.params.maker_id.clone();
        ledger.initialize_user(&maker_id);

        let balance = ledger
            .balance(&maker_id)
            .ok_or_else(|| LedgerError::UserNotFound(maker_id.clone()))?;
        let floor = Quote::new(self.params.balance_floor);
        if balance < floor {
            ledger.credit(&maker_id, floor.sub(balance), BalanceReason::MakerFloor)?;
        }

        self.started = true;
        tracing::info!(maker = %maker_id, floor = %floor, "market maker started");
        Ok(())
    }

    pub fn run_round(&mut self, registry: &ProductRegistry, network: &mut OrderbookNetwork) -> MakerRound {
        let mut round = MakerRound::default();
        let mut live = HashSet::new();

        for (product, timeframe) in network.pairs() {
            round.pairs_scanned += 1;

            let blueprint = match registry.get_blueprint(&product, timeframe) {
                Ok(bp) => bp,
                Err(e) => {
                    tracing::warn!(error = %e, "no blueprint for book, skipping");
                    continue;
                }
            };
            let Ok(active) = network.active_contracts(&product, timeframe) else {
                continue;
            };

            for (contract_id, contract) in active {
                live.insert(contract_id.clone());
                if self.quoted.contains(&contract_id) || contract.is_quoted_by(&self.params.maker_id) {
                    continue;
                }

                let quote = MakerQuote {
                    maker_id: self.params.maker_id.clone(),
                    return_multiplier: blueprint.create_maker_quote(&contract),
                    collateral_per_unit: self.collateral_per_unit(),
                };

                match network.apply_maker_quote(&product, timeframe, &contract_id, quote) {
                    Ok(_) => {
                        self.quoted.insert(contract_id);
                        round.quotes_applied += 1;
                    }
                    Err(e) => {
                        tracing::warn!(contract = %contract_id, error = %e, "quote rejected");
                        round.failures += 1;
                    }
                }
            }
        }

        let before = self.quoted.len();
        self.quoted.retain(|id| live.contains(id));
        round.forgotten = before - self.quoted.len();

        tracing::debug!(
            applied = round.quotes_applied,
            forgotten = round.forgotten,
            tracked = self.quoted.len(),
            "maker round"
        );
        round
    }

    // uniform in [min, max], 4 dp
    fn collateral_per_unit(&mut self) -> Decimal {
        let (min, max) = (
            self.params.collateral_per_unit_min,
            self.params.collateral_per_unit_max,
        );
        if max <= min {
            return min;
        }
        let fraction = Decimal::new(self.rng.gen_range(0..=10_000), 4);
        (min + (max - min) * fraction).round_dp(4)
    }
}
