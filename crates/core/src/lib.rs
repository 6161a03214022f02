//! Settle Core - Domain types
//!
//! This crate contains the fundamental types shared by the settlement and
//! retention crates:
//! - `MinorUnits`: Non-negative integer amount in minor currency units
//! - `Currency`: Type-safe currency codes
//! - `CreatorTier` / `Category`: Inputs to the commission rate table
//! - `RetryPolicy`: Bounded exponential backoff for transient failures
//! - `ExchangeRates`: Injected FX lookup

pub mod amount;
pub mod catalog;
pub mod currency;
pub mod fx;
pub mod retry;

pub use amount::{AmountError, MinorUnits};
pub use catalog::{Category, CreatorTier};
pub use currency::{Currency, CurrencyError};
pub use fx::{ExchangeRates, FixedRates, FxError};
pub use retry::RetryPolicy;
