//! Cancellation and Usage Settlement
//!
//! Cancellation is decided outside the orchestrator. A collaborator may mark
//! a conversation thread cancelled at any time, but the loop never looks at
//! it. Once a call has finished, the caller settles the result exactly once:
//! a cancelled thread suppresses delivery and accounting, otherwise the result
//! is delivered and usage is counted only for a clean answer.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tracing::debug;

use crate::agent::OrchestrationResult;

/// Source of out-of-band cancellation marks
pub trait CancellationRegistry: Send + Sync {
    /// Whether the thread has been cancelled
    fn is_cancelled(&self, thread_id: &str) -> bool;
}

/// Per-user usage counter
pub trait UsageLedger: Send + Sync {
    /// Count one answered question for the user
    fn record_answer(&self, user_id: &str);
}

/// What the caller should do with a finished result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Settlement {
    /// The thread was cancelled: do not persist, do not count
    Suppressed,
    /// Deliver the result; `counted` tells whether usage was recorded
    Deliver { counted: bool },
}

/// Settle a finished orchestration call
///
/// The registry is consulted exactly once. Usage is recorded only for a
/// non-cancelled call that ended with a clean answer.
pub fn settle(
    result: &OrchestrationResult,
    thread_id: &str,
    user_id: &str,
    cancellations: &dyn CancellationRegistry,
    ledger: &dyn UsageLedger,
) -> Settlement {
    if cancellations.is_cancelled(thread_id) {
        debug!(thread_id, "Thread cancelled; suppressing result");
        return Settlement::Suppressed;
    }

    let counted = result.error_tag.is_none();
    if counted {
        ledger.record_answer(user_id);
    }
    Settlement::Deliver { counted }
}

/// In-process cancellation registry
#[derive(Debug, Default)]
pub struct InMemoryCancellations {
    cancelled: Mutex<HashSet<String>>,
}

impl InMemoryCancellations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a thread cancelled
    pub fn cancel(&self, thread_id: impl Into<String>) {
        self.cancelled.lock().unwrap_or_else(PoisonError::into_inner).insert(thread_id.into());
    }

    /// Remove a cancellation mark
    pub fn clear(&self, thread_id: &str) {
        self.cancelled.lock().unwrap_or_else(PoisonError::into_inner).remove(thread_id);
    }
}

impl CancellationRegistry for InMemoryCancellations {
    fn is_cancelled(&self, thread_id: &str) -> bool {
        self.cancelled.lock().unwrap_or_else(PoisonError::into_inner).contains(thread_id)
    }
}

/// In-process usage ledger
#[derive(Debug, Default)]
pub struct InMemoryUsage {
    counts: Mutex<HashMap<String, u64>>,
}

impl InMemoryUsage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers recorded for a user
    pub fn count(&self, user_id: &str) -> u64 {
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .copied()
            .unwrap_or(0)
    }
}

impl UsageLedger for InMemoryUsage {
    fn record_answer(&self, user_id: &str) {
        *self
            .counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(user_id.to_string())
            .or_insert(0) += 1;
    }
}
