//! The contract every optimization implements, plus the built-in `clean-temp` mutation.
//!
//! Mutations are trait objects holding only their own resource descriptors. The engine owns
//! everything else: it captures the declared resources before `apply`, restores them before
//! calling `revert`, and serializes transactions per id.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::types::{BackupRecord, MutationDescriptor, OperationResult, Resource};

pub mod temp_cleanup;

pub use temp_cleanup::TempCleanup;

/// Cooperative cancellation flag shared between the orchestrator and a running mutation.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

pub trait Mutation: Send + Sync {
    fn descriptor(&self) -> &MutationDescriptor;

    /// Every resource `apply` may touch. Captured in full before `apply` runs.
    fn resources(&self) -> &[Resource];

    /// Process names that must not be running while this mutation applies or reverts,
    /// in addition to the policy list.
    fn conflicting_processes(&self) -> &[&str] {
        &[]
    }

    fn check_compatibility(&self) -> bool {
        true
    }

    /// Preview the change without touching anything.
    fn simulate(&self) -> OperationResult;

    /// Perform the change. A `success == false` result triggers rollback.
    /// Long-running work should poll `cancel` and stop early once it is set.
    fn apply(&self, cancel: &CancellationToken) -> OperationResult;

    /// Reconcile after the engine has restored the captured payloads of `record`
    /// (e.g. restart a service). Must be idempotent.
    fn revert(&self, record: &BackupRecord) -> OperationResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_shared_between_clones() {
        let t = CancellationToken::new();
        let seen_by_worker = t.clone();
        assert!(!seen_by_worker.is_cancelled());
        t.cancel();
        assert!(seen_by_worker.is_cancelled());
    }
}
