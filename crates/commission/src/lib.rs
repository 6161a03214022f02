//! Settle Commission - revenue split between platform and creator
//!
//! `compute` is a pure, total function: the same sale inputs and the same
//! `RateTable` always produce the same `CommissionBreakdown`. The rate table
//! is injected at call time so different table versions can be evaluated
//! side by side.

pub mod breakdown;
pub mod calculator;
pub mod error;
pub mod rates;

pub use breakdown::CommissionBreakdown;
pub use calculator::{compute, quote_processor_fee};
pub use error::CommissionError;
pub use rates::RateTable;
