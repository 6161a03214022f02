//! Settle Retention - scheduled deletion with legal-hold override
//!
//! # Key Types
//! - `RetentionPolicy`: Supplied by the form owner with each submission
//! - `ScheduledDeletion`: Durable per-submission schedule (`delete_at` may be
//!   `None` for records that never auto-delete)
//! - `LegalHoldRegistry`: Holds that suspend deletion, by id or glob pattern
//! - `RetentionScheduler`: Periodic sweep; check-then-act against the registry
//!
//! ```text
//! SubmissionStored ──► compute_schedule ──► scheduled_deletions
//!                                                │ tick(now)
//!                       notify_at ──► DeletionNotifier
//!                       delete_at ──► active hold? ──► held
//!                                          └─ no ──► RecordPurger ──► executed
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod holds;
pub mod policy;
pub mod purger;
pub mod schedule;
pub mod scheduler;
pub mod store;

pub use config::RetentionConfig;
pub use error::{RetentionError, RetentionResult};
pub use event::{ErasureOutcome, ErasureRequest, SubmissionStored, SweepReport};
pub use holds::{HoldApplied, HoldStore, HoldTarget, LegalHold, LegalHoldRegistry};
pub use policy::{compute_schedule, Industry, LegalBasis, RetentionPolicy, Schedule, SubmissionKind};
pub use purger::{
    DeletionNotifier, NotifyError, PurgeError, RecordPurger, RecordingNotifier, RecordingPurger,
};
pub use schedule::{DeletionState, ScheduledDeletion};
pub use scheduler::RetentionScheduler;
pub use store::DeletionStore;
