pub mod file;

use crate::types::errors::Result;

/// Held for as long as the lock must stay taken; dropping it releases the lock.
pub trait LockGuard: Send + Sync {}

pub trait LockManager: Send + Sync {
    /// Acquire the application-root lock, waiting at most `timeout_ms`.
    /// # Errors
    /// Returns `ErrorKind::Policy` if the lock cannot be acquired within the timeout period.
    fn acquire_process_lock(&self, timeout_ms: u64) -> Result<Box<dyn LockGuard>>;
}
