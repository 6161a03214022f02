//! Sandbox processor for testing and local runs
//!
//! Transfers succeed by default. Outcomes for the next submissions can be
//! scripted to exercise rejection, ambiguity and outages.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use crate::processor::{
    PaymentProcessor, PayoutRequest, ProcessorError, ProcessorReceipt, ProcessorStatus,
};

/// Scripted result of one `submit` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxOutcome {
    Accept,
    Reject(String),
    /// The caller sees a timeout; `completed` says whether the transfer
    /// actually went through
    Ambiguous { completed: bool },
    Unavailable,
}

#[derive(Default)]
struct SandboxState {
    script: VecDeque<SandboxOutcome>,
    lookups_failing: usize,
    transfers: HashMap<String, ProcessorStatus>,
    submissions: Vec<PayoutRequest>,
    next_reference: u64,
}

impl SandboxState {
    fn complete(&mut self, key: &str) -> String {
        self.next_reference += 1;
        let reference = format!("SBX-{:06}", self.next_reference);
        self.transfers.insert(
            key.to_string(),
            ProcessorStatus::Paid {
                external_reference: reference.clone(),
            },
        );
        reference
    }
}

/// In-process payment processor
#[derive(Default)]
pub struct SandboxProcessor {
    state: Mutex<SandboxState>,
}

impl SandboxProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SandboxState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue the outcome of the next `submit` call
    pub fn script(&self, outcome: SandboxOutcome) {
        self.state().script.push_back(outcome);
    }

    /// Make the next `n` lookups fail as unavailable
    pub fn fail_lookups(&self, n: usize) {
        self.state().lookups_failing = n;
    }

    /// Settle a pending transfer out of band
    pub fn complete_transfer(&self, idempotency_key: &str) -> String {
        self.state().complete(idempotency_key)
    }

    /// Number of real transfers made
    pub fn transfer_count(&self) -> usize {
        self.state()
            .transfers
            .values()
            .filter(|s| matches!(s, ProcessorStatus::Paid { .. }))
            .count()
    }

    /// Every `submit` call received, in order
    pub fn submissions(&self) -> Vec<PayoutRequest> {
        self.state().submissions.clone()
    }
}

#[async_trait]
impl PaymentProcessor for SandboxProcessor {
    async fn submit(&self, request: &PayoutRequest) -> Result<ProcessorReceipt, ProcessorError> {
        let mut state = self.state();
        state.submissions.push(request.clone());

        // Replayed key: answer with the original transfer
        if let Some(ProcessorStatus::Paid { external_reference }) =
            state.transfers.get(&request.idempotency_key)
        {
            return Ok(ProcessorReceipt {
                external_reference: external_reference.clone(),
            });
        }

        match state.script.pop_front().unwrap_or(SandboxOutcome::Accept) {
            SandboxOutcome::Accept => Ok(ProcessorReceipt {
                external_reference: state.complete(&request.idempotency_key),
            }),
            SandboxOutcome::Reject(reason) => {
                state.transfers.insert(
                    request.idempotency_key.clone(),
                    ProcessorStatus::Rejected {
                        reason: reason.clone(),
                    },
                );
                Err(ProcessorError::Rejected(reason))
            }
            SandboxOutcome::Ambiguous { completed } => {
                if completed {
                    state.complete(&request.idempotency_key);
                } else {
                    state
                        .transfers
                        .insert(request.idempotency_key.clone(), ProcessorStatus::Pending);
                }
                Err(ProcessorError::Ambiguous("gateway timeout".to_string()))
            }
            SandboxOutcome::Unavailable => {
                Err(ProcessorError::Unavailable("connection refused".to_string()))
            }
        }
    }

    async fn lookup(&self, idempotency_key: &str) -> Result<Option<ProcessorStatus>, ProcessorError> {
        let mut state = self.state();
        if state.lookups_failing > 0 {
            state.lookups_failing -= 1;
            return Err(ProcessorError::Unavailable("status endpoint down".to_string()));
        }
        Ok(state.transfers.get(idempotency_key).cloned())
    }

    fn name(&self) -> &str {
        "sandbox"
    }
}
