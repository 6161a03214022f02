//! Application configuration

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use settle_commission::RateTable;
use settle_core::{Currency, FixedRates, MinorUnits};
use settle_ledger::LedgerConfig;
use settle_payout::PayoutConfig;
use settle_retention::RetentionConfig;
use std::path::{Path, PathBuf};

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "SETTLE_CONFIG";

/// Processor quote used when a sale arrives without the processor's fee
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeQuote {
    #[serde(default = "default_fee_percent")]
    pub percent: Decimal,
    #[serde(default = "default_fee_fixed")]
    pub fixed: MinorUnits,
}

fn default_fee_percent() -> Decimal {
    Decimal::new(29, 3)
}

fn default_fee_fixed() -> MinorUnits {
    MinorUnits::new(30).unwrap_or(MinorUnits::ZERO)
}

impl Default for FeeQuote {
    fn default() -> Self {
        Self {
            percent: default_fee_percent(),
            fixed: default_fee_fixed(),
        }
    }
}

/// One configured exchange rate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FxRate {
    pub from: Currency,
    pub to: Currency,
    pub rate: Decimal,
}

/// Everything the `settle` binary needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub rates: RateTable,

    #[serde(default)]
    pub ledger: LedgerConfig,

    #[serde(default)]
    pub payout: PayoutConfig,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub processor_fee: FeeQuote,

    #[serde(default)]
    pub exchange_rates: Vec<FxRate>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            rates: RateTable::default(),
            ledger: LedgerConfig::default(),
            payout: PayoutConfig::default(),
            retention: RetentionConfig::default(),
            processor_fee: FeeQuote::default(),
            exchange_rates: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Defaults rooted at a data directory
    pub fn for_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Load config from a JSON file and validate the rate table
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        config.rates.validate()?;
        Ok(config)
    }

    /// Load from `SETTLE_CONFIG` when set, defaults otherwise
    pub fn from_env() -> anyhow::Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::from_file(Path::new(&path)),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn exchange_rates(&self) -> FixedRates {
        self.exchange_rates
            .iter()
            .fold(FixedRates::new(), |fx, r| {
                fx.with_rate(r.from.clone(), r.to.clone(), r.rate)
            })
    }
}
