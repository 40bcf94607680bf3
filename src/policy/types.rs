use serde::Deserialize;

use crate::constants::{
    DEFAULT_CANCEL_GRACE_MS, DEFAULT_CRITICAL_PROCESSES, DEFAULT_MAX_IN_FLIGHT,
    DEFAULT_RESERVE_BYTES, DEFAULT_TIMEOUT_MS,
};
use crate::types::ResourceKind;

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Concurrency {
    /// Global cap on simultaneously in-flight apply/revert transactions.
    pub max_in_flight: usize,
    /// Deadline for mutations that do not declare their own.
    pub default_timeout_ms: u64,
    /// How long a timed-out worker may keep running before rollback starts.
    pub cancel_grace_ms: u64,
}

impl Default for Concurrency {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            cancel_grace_ms: DEFAULT_CANCEL_GRACE_MS,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Preflight {
    /// Resource kinds that can only be captured and restored with elevation.
    pub require_elevation_for: Vec<ResourceKind>,
    /// Process names that block every apply and revert (case-insensitive substring).
    pub critical_processes: Vec<String>,
    /// Free space kept back on the backup volume on top of the capture estimate.
    pub reserve_bytes: u64,
    pub check_disk_space: bool,
    /// Let a transaction through when free space or the process list cannot be read.
    pub allow_unmeasured: bool,
}

impl Default for Preflight {
    fn default() -> Self {
        Self {
            require_elevation_for: vec![
                ResourceKind::Registry,
                ResourceKind::Service,
                ResourceKind::PowerPlan,
            ],
            critical_processes: DEFAULT_CRITICAL_PROCESSES
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            reserve_bytes: DEFAULT_RESERVE_BYTES,
            check_disk_space: true,
            allow_unmeasured: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackupPolicy {
    /// Capture the live state again before a revert so a failed revert can be undone.
    pub capture_restore_snapshot: bool,
    /// Verify checksums of every Applied mutation's record when the engine starts.
    pub verify_on_startup: bool,
}

impl Default for BackupPolicy {
    fn default() -> Self {
        Self {
            capture_restore_snapshot: false,
            verify_on_startup: true,
        }
    }
}
