//! Ledger configuration

use serde::{Deserialize, Serialize};
use settle_core::{Currency, RetryPolicy};
use std::time::Duration;

/// Configuration for the sales ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Number of single-writer shards. Changing it re-homes templates, so it
    /// is fixed for the lifetime of a data directory.
    #[serde(default = "default_shard_count")]
    pub shard_count: usize,

    /// Per-shard read timeout for scatter-gather queries
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Retry budget for writes to an unavailable shard
    #[serde(default)]
    pub write_retry: RetryPolicy,

    /// Currency balances are reported in
    #[serde(default = "default_reporting_currency")]
    pub reporting_currency: Currency,
}

fn default_shard_count() -> usize {
    16
}

fn default_read_timeout_ms() -> u64 {
    250
}

fn default_reporting_currency() -> Currency {
    Currency::Usd
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            shard_count: default_shard_count(),
            read_timeout_ms: default_read_timeout_ms(),
            write_retry: RetryPolicy::default(),
            reporting_currency: default_reporting_currency(),
        }
    }
}

impl LedgerConfig {
    /// Get read timeout as Duration
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}
