//! Collaborator seams: physical deletion and owner notification

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

use crate::schedule::ScheduledDeletion;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct PurgeError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct NotifyError(pub String);

/// Removes a submission's stored data.
///
/// One call is one atomic removal; it either deletes everything for the
/// submission or nothing.
#[async_trait]
pub trait RecordPurger: Send + Sync {
    async fn purge(&self, submission_id: &str) -> Result<(), PurgeError>;
}

/// External email collaborator warning the form owner of an upcoming deletion
#[async_trait]
pub trait DeletionNotifier: Send + Sync {
    async fn notify(&self, deletion: &ScheduledDeletion) -> Result<(), NotifyError>;
}

#[derive(Default)]
struct Recorded {
    calls: Vec<String>,
    failing: HashSet<String>,
    fail_all: bool,
}

fn guard(state: &Mutex<Recorded>) -> MutexGuard<'_, Recorded> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Purger that records what it deleted
#[derive(Default)]
pub struct RecordingPurger {
    state: Mutex<Recorded>,
}

impl RecordingPurger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make purges of one submission fail
    pub fn fail_for(&self, submission_id: &str) {
        guard(&self.state).failing.insert(submission_id.to_string());
    }

    pub fn recover(&self, submission_id: &str) {
        guard(&self.state).failing.remove(submission_id);
    }

    pub fn purged(&self) -> Vec<String> {
        guard(&self.state).calls.clone()
    }
}

#[async_trait]
impl RecordPurger for RecordingPurger {
    async fn purge(&self, submission_id: &str) -> Result<(), PurgeError> {
        let mut state = guard(&self.state);
        if state.fail_all || state.failing.contains(submission_id) {
            return Err(PurgeError(format!("storage refused delete of {}", submission_id)));
        }
        state.calls.push(submission_id.to_string());
        Ok(())
    }
}

/// Notifier that records the notices it sent
#[derive(Default)]
pub struct RecordingNotifier {
    state: Mutex<Recorded>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every notice fail
    pub fn fail_all(&self) {
        guard(&self.state).fail_all = true;
    }

    pub fn notified(&self) -> Vec<String> {
        guard(&self.state).calls.clone()
    }
}

#[async_trait]
impl DeletionNotifier for RecordingNotifier {
    async fn notify(&self, deletion: &ScheduledDeletion) -> Result<(), NotifyError> {
        let mut state = guard(&self.state);
        if state.fail_all || state.failing.contains(&deletion.submission_id) {
            return Err(NotifyError("mail relay rejected message".to_string()));
        }
        state.calls.push(deletion.submission_id.clone());
        Ok(())
    }
}
