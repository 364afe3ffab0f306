// Price Feed
//
// The engine only sees `(price, timestamp)` ticks. Where they come from is behind
// `PriceSource`: the random walk used by the simulation, or a fixed script for
// replaying a known path. The clearing service polls its source on a timer.

use crate::types::{Price, PricePoint, Timestamp};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

pub trait PriceSource: Send {
    /// Last price handed out, or the starting price before the first step.
    fn current(&self) -> Price;

    /// Moves the source one step and returns the new observation.
    fn next_tick(&mut self, timestamp: Timestamp) -> PricePoint;
}

/// Configuration for the synthetic feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceFeedParams {
    pub initial_price: Decimal,
    /// Max relative move per step (e.g. 0.001 = 0.1%)
    pub volatility: Decimal,
    /// Floor the walk can never cross
    pub min_price: Decimal,
    /// Tick interval in milliseconds
    pub interval_ms: u64,
    /// Fixed seed for reproducible runs. None draws from entropy.
    pub seed: Option<u64>,
}

impl Default for PriceFeedParams {
    fn default() -> Self {
        Self {
            initial_price: dec!(100),
            volatility: dec!(0.002),
            min_price: dec!(0.01),
            interval_ms: 250,
            seed: None,
        }
    }
}

impl PriceFeedParams {
    pub fn validate(&self) -> Result<(), PriceFeedError> {
        if self.min_price <= Decimal::ZERO {
            return Err(PriceFeedError::InvalidMinPrice(self.min_price));
        }
        if self.initial_price < self.min_price {
            return Err(PriceFeedError::InvalidInitialPrice(self.initial_price));
        }
        if self.volatility < Decimal::ZERO || self.volatility >= Decimal::ONE {
            return Err(PriceFeedError::InvalidVolatility(self.volatility));
        }
        if self.interval_ms == 0 {
            return Err(PriceFeedError::ZeroInterval);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PriceFeedError {
    #[error("Initial price {0} must be at or above the floor")]
    InvalidInitialPrice(Decimal),

    #[error("Min price {0} must be positive")]
    InvalidMinPrice(Decimal),

    #[error("Volatility {0} must be in [0, 1)")]
    InvalidVolatility(Decimal),

    #[error("Tick interval must be non-zero")]
    ZeroInterval,

    #[error("Price script is empty or holds a non-positive price")]
    InvalidScript,
}

/// Bounded random walk. each step scales the price by `1 + u`, `u` uniform in
/// `[-volatility, volatility]`, then floors and rounds to cents.
#[derive(Debug)]
pub struct RandomWalkOracle {
    params: PriceFeedParams,
    price: Price,
    floor: Price,
    rng: StdRng,
}

impl RandomWalkOracle {
    pub fn new(params: PriceFeedParams) -> Result<Self, PriceFeedError> {
        params.validate()?;

        let floor = Price::new(params.min_price).ok_or(PriceFeedError::InvalidMinPrice(params.min_price))?;
        let price =
            Price::new(params.initial_price).ok_or(PriceFeedError::InvalidInitialPrice(params.initial_price))?;
        let rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            params,
            price,
            floor,
            rng,
        })
    }

    pub fn params(&self) -> &PriceFeedParams {
        &self.params
    }

    fn step(&mut self) -> Price {
        let draw = self.rng.gen_range(-10_000i64..=10_000);
        let shock = Decimal::new(draw, 4) * self.params.volatility;
        let next = (self.price.value() * (Decimal::ONE + shock)).round_dp(2);

        Price::new(next)
            .filter(|p| *p >= self.floor)
            .unwrap_or(self.floor)
    }
}

impl PriceSource for RandomWalkOracle {
    fn current(&self) -> Price {
        self.price
    }

    fn next_tick(&mut self, timestamp: Timestamp) -> PricePoint {
        self.price = self.step();
        PricePoint::new(self.price, timestamp)
    }
}

/// Replays a fixed list of prices, holding the last one once exhausted.
#[derive(Debug, Clone)]
pub struct ScriptedPrices {
    prices: Vec<Price>,
    cursor: usize,
    last: Price,
}

impl ScriptedPrices {
    pub fn new(prices: Vec<Decimal>) -> Result<Self, PriceFeedError> {
        let prices = prices
            .into_iter()
            .map(Price::new)
            .collect::<Option<Vec<_>>>()
            .filter(|p| !p.is_empty())
            .ok_or(PriceFeedError::InvalidScript)?;
        let last = prices[0];
        Ok(Self {
            prices,
            cursor: 0,
            last,
        })
    }

    pub fn remaining(&self) -> usize {
        self.prices.len() - self.cursor
    }
}

impl PriceSource for ScriptedPrices {
    fn current(&self) -> Price {
        self.last
    }

    fn next_tick(&mut self, timestamp: Timestamp) -> PricePoint {
        if let Some(price) = self.prices.get(self.cursor) {
            self.last = *price;
            self.cursor += 1;
        }
        PricePoint::new(self.last, timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(seed: u64) -> RandomWalkOracle {
        RandomWalkOracle::new(PriceFeedParams {
            seed: Some(seed),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn same_seed_same_path() {
        let mut a = seeded(7);
        let mut b = seeded(7);
        for i in 0..50 {
            let ts = Timestamp::from_millis(i * 250);
            assert_eq!(a.next_tick(ts), b.next_tick(ts));
        }
    }

    #[test]
    fn steps_stay_within_volatility() {
        let mut oracle = seeded(11);
        let mut last = oracle.current().value();
        for i in 0..500 {
            let next = oracle.next_tick(Timestamp::from_millis(i)).price.value();
            // one cent of slack for rounding
            let bound = last * dec!(0.002) + dec!(0.01);
            assert!((next - last).abs() <= bound, "{last} -> {next}");
            assert_eq!(next, next.round_dp(2));
            last = next;
        }
    }

    #[test]
    fn walk_never_crosses_floor() {
        let mut oracle = RandomWalkOracle::new(PriceFeedParams {
            initial_price: dec!(0.02),
            volatility: dec!(0.9),
            min_price: dec!(0.01),
            seed: Some(3),
            ..Default::default()
        })
        .unwrap();
        for i in 0..200 {
            assert!(oracle.next_tick(Timestamp::from_millis(i)).price.value() >= dec!(0.01));
        }
    }

    #[test]
    fn invalid_params_are_rejected() {
        let params = PriceFeedParams {
            min_price: dec!(0),
            ..Default::default()
        };
        assert!(matches!(
            RandomWalkOracle::new(params),
            Err(PriceFeedError::InvalidMinPrice(_))
        ));

        let params = PriceFeedParams {
            volatility: dec!(1.5),
            ..Default::default()
        };
        assert_eq!(params.validate(), Err(PriceFeedError::InvalidVolatility(dec!(1.5))));
    }

    #[test]
    fn script_replays_then_holds() {
        let mut script = ScriptedPrices::new(vec![dec!(100), dec!(99.5), dec!(105)]).unwrap();
        let prices: Vec<Decimal> = (0..5)
            .map(|i| script.next_tick(Timestamp::from_millis(i)).price.value())
            .collect();
        assert_eq!(prices, vec![dec!(100), dec!(99.5), dec!(105), dec!(105), dec!(105)]);
        assert_eq!(script.remaining(), 0);
        assert_eq!(script.current().value(), dec!(105));
        assert!(ScriptedPrices::new(vec![]).is_err());
        assert!(ScriptedPrices::new(vec![dec!(-1)]).is_err());
    }
}
