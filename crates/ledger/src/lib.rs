//! Settle Ledger - exactly-once sale accumulation
//!
//! The source of truth for "what was sold and what is owed".
//!
//! # Key Types
//! - `SaleEvent`: Purchase notification from the marketplace (at-least-once)
//! - `SaleRecord`: Immutable, commission-split record of one sale
//! - `SalesLedger`: Partition map of single-writer shards keyed by a stable
//!   hash of the template id
//! - `CreatorBalance`: Scatter-gather balance across every shard
//!
//! ```text
//! SaleEvent ──► shard_for(template_id) ──► Shard (RwLock, JSONL log)
//!                                               │
//! get_balance(creator) ◄── join + timeout ◄─────┴── one read per shard
//! ```

pub mod balance;
pub mod config;
pub mod error;
pub mod ledger;
pub mod log;
pub mod partition;
pub mod sale;

pub use balance::CreatorBalance;
pub use config::LedgerConfig;
pub use error::{LedgerError, LedgerResult};
pub use ledger::{SalesLedger, SalesSnapshot};
pub use log::{ShardLog, ShardLogEntry};
pub use sale::{RecordOutcome, SaleEvent, SaleRecord};
