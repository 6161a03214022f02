//! Settle RPC - collaborator API and CLI orchestrator
//!
//! This crate wires the ledger, payout engine, retention scheduler and audit
//! log over one data directory and exposes them through `SettlementService`.

pub mod config;
pub mod context;
pub mod service;

pub use config::{AppConfig, FeeQuote, FxRate};
pub use context::{AppContext, LoggingNotifier, LoggingPurger};
pub use service::{ServiceError, ServiceResult, SettlementService};
