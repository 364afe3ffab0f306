// 7.0 config.rs: all settings in one place. engine, ledger, price feed, maker, products.
// 7.1 presets per Environment, validate() before anything is built from it.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::blueprint::{DirectionalParams, ProductRegistry, RangeParams};
use crate::engine::EngineConfig;
use crate::ledger::LedgerParams;
use crate::liquidity::MakerParams;
use crate::price_feed::{PriceFeedError, PriceFeedParams};
use crate::types::Timeframe;

// Range product section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeSection {
    pub enabled: bool,
    pub timeframes: Vec<Timeframe>,
    pub params: RangeParams,
}

impl Default for RangeSection {
    fn default() -> Self {
        Self {
            enabled: true,
            timeframes: vec![
                Timeframe(1000),
                Timeframe(2000),
                Timeframe(5000),
                Timeframe(10_000),
            ],
            params: RangeParams::default(),
        }
    }
}

// Directional product section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectionalSection {
    pub enabled: bool,
    pub timeframes: Vec<Timeframe>,
    pub params: DirectionalParams,
}

impl Default for DirectionalSection {
    fn default() -> Self {
        Self {
            enabled: true,
            timeframes: vec![
                Timeframe(5000),
                Timeframe(10_000),
                Timeframe(30_000),
                Timeframe(60_000),
            ],
            params: DirectionalParams::default(),
        }
    }
}

// The complete clearing configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClearingConfig {
    pub engine: EngineConfig,
    pub ledger: LedgerParams,
    pub price_feed: PriceFeedParams,
    pub maker: MakerParams,
    pub range: RangeSection,
    pub directional: DirectionalSection,
}

impl ClearingConfig {
    // Fast columns and a fixed seed. for local runs and tests
    pub fn development() -> Self {
        let mut config = Self::default();
        config.price_feed.seed = Some(7);
        config.price_feed.interval_ms = 100;
        config.maker.seed = Some(11);
        config.maker.interval_ms = 200;
        config.range.timeframes = vec![Timeframe(1000), Timeframe(2000)];
        config.directional.timeframes = vec![Timeframe(2000), Timeframe(5000)];
        config
    }

    // Smaller books, slower feed, randomized maker collateral
    pub fn staging() -> Self {
        let mut config = Self::default();
        config.engine.max_events = 50_000;
        config.price_feed.interval_ms = 500;
        config.maker.collateral_per_unit_min = Decimal::new(8, 1); // 0.8
        config.maker.collateral_per_unit_max = Decimal::new(12, 1); // 1.2
        config.range.params.total_columns = 8;
        config.directional.params.total_columns = 8;
        config
    }

    pub fn production() -> Self {
        let mut config = Self::default();
        config.engine.max_events = 200_000;
        config.engine.event_capacity = 16_384;
        config.ledger.house_initial = Decimal::new(10_000_000, 0);
        config.maker.balance_floor = Decimal::new(1_000_000, 0);
        config
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json_str(&raw)
    }

    // Validate the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        // engine checks
        if self.engine.max_events == 0 || self.engine.event_capacity == 0 {
            return Err(ConfigError::InvalidEngine {
                reason: "Event log and channel need non-zero capacity".to_string(),
            });
        }

        // ledger checks
        if self.ledger.starting_balance < Decimal::ZERO || self.ledger.house_initial < Decimal::ZERO {
            return Err(ConfigError::InvalidLedger {
                reason: "Balances cannot start negative".to_string(),
            });
        }

        self.price_feed.validate()?;

        // maker checks
        let maker = &self.maker;
        if maker.collateral_per_unit_min <= Decimal::ZERO
            || maker.collateral_per_unit_min > maker.collateral_per_unit_max
        {
            return Err(ConfigError::InvalidMaker {
                reason: "Collateral per unit range must be positive and ordered".to_string(),
            });
        }
        if maker.enabled && maker.interval_ms == 0 {
            return Err(ConfigError::InvalidMaker {
                reason: "Quoting interval must be non-zero".to_string(),
            });
        }

        // product checks
        if !self.range.enabled && !self.directional.enabled {
            return Err(ConfigError::InvalidProduct {
                reason: "At least one product must be enabled".to_string(),
            });
        }
        if self.range.enabled {
            check_timeframes("range", &self.range.timeframes)?;
            let p = &self.range.params;
            if p.total_columns == 0 || p.price_spread <= Decimal::ZERO {
                return Err(ConfigError::InvalidProduct {
                    reason: "range needs columns and a positive spread".to_string(),
                });
            }
            if p.multiplier_min <= Decimal::ZERO || p.multiplier_min > p.multiplier_max {
                return Err(ConfigError::InvalidProduct {
                    reason: "range multiplier bounds must be positive and ordered".to_string(),
                });
            }
        }
        if self.directional.enabled {
            check_timeframes("directional", &self.directional.timeframes)?;
            let p = &self.directional.params;
            if p.total_columns == 0 || p.multiplier_base <= Decimal::ZERO {
                return Err(ConfigError::InvalidProduct {
                    reason: "directional needs columns and a positive base multiplier".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Registry with every enabled product for its configured timeframes.
    pub fn registry(&self) -> ProductRegistry {
        let mut registry = ProductRegistry::new();
        if self.range.enabled {
            registry.register_range(&self.range.timeframes, self.range.params.clone());
        }
        if self.directional.enabled {
            registry.register_directional(&self.directional.timeframes, self.directional.params.clone());
        }
        registry
    }
}

fn check_timeframes(product: &str, timeframes: &[Timeframe]) -> Result<(), ConfigError> {
    if timeframes.is_empty() {
        return Err(ConfigError::InvalidProduct {
            reason: format!("{product} has no timeframes"),
        });
    }
    if let Some(tf) = timeframes.iter().find(|tf| tf.as_millis() <= 0) {
        return Err(ConfigError::InvalidProduct {
            reason: format!("{product} timeframe {tf} must be positive"),
        });
    }
    Ok(())
}

// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid engine config: {reason}")]
    InvalidEngine { reason: String },

    #[error("Invalid ledger config: {reason}")]
    InvalidLedger { reason: String },

    #[error("Invalid price feed config: {0}")]
    InvalidPriceFeed(#[from] PriceFeedError),

    #[error("Invalid maker config: {reason}")]
    InvalidMaker { reason: String },

    #[error("Invalid product config: {reason}")]
    InvalidProduct { reason: String },

    #[error("Config parse error: {0}")]
    Parse(String),

    #[error("Cannot read config {path}: {reason}")]
    Io { path: String, reason: String },
}

// Environment presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn config(&self) -> ClearingConfig {
        match self {
            Environment::Development => ClearingConfig::development(),
            Environment::Staging => ClearingConfig::staging(),
            Environment::Production => ClearingConfig::production(),
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(Environment::Development),
            "staging" => Some(Environment::Staging),
            "production" | "prod" => Some(Environment::Production),
            _ => None,
        }
    }
}
