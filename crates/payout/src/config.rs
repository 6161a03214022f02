//! Payout engine configuration

use chrono::Duration;
use serde::{Deserialize, Serialize};
use settle_core::{MinorUnits, RetryPolicy};

/// Configuration for batch formation and processor calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutConfig {
    /// Refund-eligibility window a sale must age past before it is batchable
    #[serde(default = "default_holding_window_days")]
    pub holding_window_days: i64,

    /// Smallest batch amount worth paying out, in minor units
    #[serde(default = "default_minimum_payout")]
    pub minimum_payout: MinorUnits,

    /// Longest a batch may stay `submitted` before manual reconciliation
    #[serde(default = "default_max_submitted_wait_hours")]
    pub max_submitted_wait_hours: i64,

    /// Retry budget for transient processor errors
    #[serde(default)]
    pub processor_retry: RetryPolicy,
}

fn default_holding_window_days() -> i64 {
    30
}

fn default_minimum_payout() -> MinorUnits {
    MinorUnits::new(5_000).unwrap_or(MinorUnits::ZERO)
}

fn default_max_submitted_wait_hours() -> i64 {
    72
}

impl Default for PayoutConfig {
    fn default() -> Self {
        Self {
            holding_window_days: default_holding_window_days(),
            minimum_payout: default_minimum_payout(),
            max_submitted_wait_hours: default_max_submitted_wait_hours(),
            processor_retry: RetryPolicy::default(),
        }
    }
}

impl PayoutConfig {
    pub fn holding_window(&self) -> Duration {
        Duration::days(self.holding_window_days)
    }

    pub fn max_submitted_wait(&self) -> Duration {
        Duration::hours(self.max_submitted_wait_hours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PayoutConfig::default();
        assert_eq!(config.holding_window(), Duration::days(30));
        assert_eq!(config.minimum_payout.value(), 5_000);
        assert_eq!(config.max_submitted_wait(), Duration::hours(72));
    }

    #[test]
    fn test_partial_json() {
        let config: PayoutConfig =
            serde_json::from_str(r#"{ "minimum_payout": 100, "holding_window_days": 7 }"#).unwrap();
        assert_eq!(config.minimum_payout.value(), 100);
        assert_eq!(config.holding_window_days, 7);
        assert_eq!(config.processor_retry, RetryPolicy::default());
    }
}
