use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::RECOVERY_GUIDANCE;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("insufficient privilege: {0}")]
    Privilege(String),
    #[error("insufficient disk space: need {needed} bytes, {available} available")]
    InsufficientSpace { needed: u64, available: u64 },
    #[error("critical process running: {0}")]
    CriticalProcessConflict(String),
    #[error("conflicting resource: {0}")]
    ConflictingResource(String),
    #[error("transaction already in progress for '{0}'")]
    TransactionInProgress(String),
    #[error("backup capture failed: {0}")]
    BackupCapture(String),
    #[error("apply failed: {0}")]
    Apply(String),
    #[error("backup is corrupt: {0}")]
    CorruptBackup(String),
    #[error("deadline exceeded: {0}")]
    Timeout(String),
    #[error("rollback failed: {0}. {RECOVERY_GUIDANCE}")]
    RollbackFailed(String),
    #[error("backup missing: {0}")]
    BackupMissing(String),
    #[error("resource busy: {0}")]
    ResourceBusy(String),
    #[error("restore failed: {0}")]
    RestoreFailed(String),
    #[error("not compatible with this system: {0}")]
    Incompatible(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("backup in use: {0}")]
    BackupInUse(String),
    #[error("unknown mutation '{0}'")]
    UnknownMutation(String),
    #[error("cancelled before any change was made")]
    Cancelled,
    #[error("locking timeout: {0}")]
    LockingTimeout(String),
    #[error("filesystem error: {0}")]
    Filesystem(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl ApiError {
    #[must_use]
    pub const fn id(&self) -> ErrorId {
        match self {
            ApiError::Privilege(_) => ErrorId::E_PRIVILEGE,
            ApiError::InsufficientSpace { .. } => ErrorId::E_INSUFFICIENT_SPACE,
            ApiError::CriticalProcessConflict(_) => ErrorId::E_CRITICAL_PROCESS,
            ApiError::ConflictingResource(_) => ErrorId::E_CONFLICTING_RESOURCE,
            ApiError::TransactionInProgress(_) => ErrorId::E_TXN_IN_PROGRESS,
            ApiError::BackupCapture(_) => ErrorId::E_BACKUP_CAPTURE,
            ApiError::Apply(_) => ErrorId::E_APPLY,
            ApiError::CorruptBackup(_) => ErrorId::E_CORRUPT_BACKUP,
            ApiError::Timeout(_) => ErrorId::E_TIMEOUT,
            ApiError::RollbackFailed(_) => ErrorId::E_ROLLBACK_FAILED,
            ApiError::BackupMissing(_) => ErrorId::E_BACKUP_MISSING,
            ApiError::ResourceBusy(_) => ErrorId::E_RESOURCE_BUSY,
            ApiError::RestoreFailed(_) => ErrorId::E_RESTORE_FAILED,
            ApiError::Incompatible(_) => ErrorId::E_INCOMPATIBLE,
            ApiError::InvalidState(_) => ErrorId::E_INVALID_STATE,
            ApiError::BackupInUse(_) => ErrorId::E_BACKUP_IN_USE,
            ApiError::UnknownMutation(_) => ErrorId::E_UNKNOWN_MUTATION,
            ApiError::Cancelled => ErrorId::E_CANCELLED,
            ApiError::LockingTimeout(_) => ErrorId::E_LOCKING,
            ApiError::Filesystem(_) => ErrorId::E_GENERIC,
            ApiError::Config(_) => ErrorId::E_CONFIG,
        }
    }

    /// Validation and capture failures happen before any resource is touched.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(
            self,
            ApiError::Privilege(_)
                | ApiError::InsufficientSpace { .. }
                | ApiError::CriticalProcessConflict(_)
                | ApiError::ConflictingResource(_)
                | ApiError::TransactionInProgress(_)
                | ApiError::BackupCapture(_)
                | ApiError::Incompatible(_)
                | ApiError::Cancelled
        )
    }
}

impl From<crate::types::errors::Error> for ApiError {
    fn from(e: crate::types::errors::Error) -> Self {
        use crate::types::errors::ErrorKind::{Integrity, InvalidLocator, Io, NotFound, Policy};
        match e.kind {
            InvalidLocator | Io => ApiError::Filesystem(e.msg),
            Policy => ApiError::Config(e.msg),
            Integrity => ApiError::CorruptBackup(e.msg),
            NotFound => ApiError::BackupMissing(e.msg),
        }
    }
}

// Stable identifiers written into audit facts and results.
#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorId {
    E_PRIVILEGE,
    E_INSUFFICIENT_SPACE,
    E_CRITICAL_PROCESS,
    E_CONFLICTING_RESOURCE,
    E_TXN_IN_PROGRESS,
    E_BACKUP_CAPTURE,
    E_APPLY,
    E_CORRUPT_BACKUP,
    E_TIMEOUT,
    E_ROLLBACK_FAILED,
    E_BACKUP_MISSING,
    E_RESOURCE_BUSY,
    E_RESTORE_FAILED,
    E_INCOMPATIBLE,
    E_INVALID_STATE,
    E_BACKUP_IN_USE,
    E_UNKNOWN_MUTATION,
    E_CANCELLED,
    E_LOCKING,
    E_CONFIG,
    E_GENERIC,
}

#[must_use]
pub const fn id_str(id: ErrorId) -> &'static str {
    match id {
        ErrorId::E_PRIVILEGE => "E_PRIVILEGE",
        ErrorId::E_INSUFFICIENT_SPACE => "E_INSUFFICIENT_SPACE",
        ErrorId::E_CRITICAL_PROCESS => "E_CRITICAL_PROCESS",
        ErrorId::E_CONFLICTING_RESOURCE => "E_CONFLICTING_RESOURCE",
        ErrorId::E_TXN_IN_PROGRESS => "E_TXN_IN_PROGRESS",
        ErrorId::E_BACKUP_CAPTURE => "E_BACKUP_CAPTURE",
        ErrorId::E_APPLY => "E_APPLY",
        ErrorId::E_CORRUPT_BACKUP => "E_CORRUPT_BACKUP",
        ErrorId::E_TIMEOUT => "E_TIMEOUT",
        ErrorId::E_ROLLBACK_FAILED => "E_ROLLBACK_FAILED",
        ErrorId::E_BACKUP_MISSING => "E_BACKUP_MISSING",
        ErrorId::E_RESOURCE_BUSY => "E_RESOURCE_BUSY",
        ErrorId::E_RESTORE_FAILED => "E_RESTORE_FAILED",
        ErrorId::E_INCOMPATIBLE => "E_INCOMPATIBLE",
        ErrorId::E_INVALID_STATE => "E_INVALID_STATE",
        ErrorId::E_BACKUP_IN_USE => "E_BACKUP_IN_USE",
        ErrorId::E_UNKNOWN_MUTATION => "E_UNKNOWN_MUTATION",
        ErrorId::E_CANCELLED => "E_CANCELLED",
        ErrorId::E_LOCKING => "E_LOCKING",
        ErrorId::E_CONFIG => "E_CONFIG",
        ErrorId::E_GENERIC => "E_GENERIC",
    }
}

#[must_use]
pub const fn exit_code_for(id: ErrorId) -> i32 {
    match id {
        ErrorId::E_PRIVILEGE => 10,
        ErrorId::E_INSUFFICIENT_SPACE => 11,
        ErrorId::E_CRITICAL_PROCESS => 12,
        ErrorId::E_INCOMPATIBLE => 13,
        ErrorId::E_CONFLICTING_RESOURCE => 20,
        ErrorId::E_CONFIG => 21,
        ErrorId::E_TXN_IN_PROGRESS => 30,
        ErrorId::E_LOCKING => 31,
        ErrorId::E_INVALID_STATE => 32,
        ErrorId::E_UNKNOWN_MUTATION => 33,
        ErrorId::E_CANCELLED => 34,
        ErrorId::E_BACKUP_CAPTURE => 40,
        ErrorId::E_BACKUP_MISSING => 41,
        ErrorId::E_BACKUP_IN_USE => 42,
        ErrorId::E_APPLY => 50,
        ErrorId::E_TIMEOUT => 51,
        ErrorId::E_CORRUPT_BACKUP => 60,
        ErrorId::E_RESTORE_FAILED => 61,
        ErrorId::E_RESOURCE_BUSY => 62,
        ErrorId::E_ROLLBACK_FAILED => 90,
        ErrorId::E_GENERIC => 1,
    }
}

/// Map an I/O failure raised while restoring a live resource to a stable `ErrorId`.
///
/// Sharing/lock violations (Windows) and `EBUSY` (Unix) mean another process holds
/// the resource; a missing payload means the backup is gone.
#[must_use]
pub fn map_restore_io_error(e: &std::io::Error) -> ErrorId {
    if e.kind() == std::io::ErrorKind::WouldBlock {
        return ErrorId::E_RESOURCE_BUSY;
    }
    match e.raw_os_error() {
        #[cfg(windows)]
        Some(32 | 33) => ErrorId::E_RESOURCE_BUSY,
        #[cfg(unix)]
        Some(16 | 26) => ErrorId::E_RESOURCE_BUSY,
        _ => match e.kind() {
            std::io::ErrorKind::NotFound => ErrorId::E_BACKUP_MISSING,
            _ => ErrorId::E_RESTORE_FAILED,
        },
    }
}

impl ApiError {
    /// Wrap an I/O failure raised while restoring `what`.
    #[must_use]
    pub fn from_restore_io(e: &std::io::Error, what: &str) -> Self {
        let msg = format!("{what}: {e}");
        match map_restore_io_error(e) {
            ErrorId::E_RESOURCE_BUSY => ApiError::ResourceBusy(msg),
            ErrorId::E_BACKUP_MISSING => ApiError::BackupMissing(msg),
            _ => ApiError::RestoreFailed(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollback_failure_message_carries_recovery_guidance() {
        let e = ApiError::RollbackFailed("registry import exited with 1".into());
        assert_eq!(e.id(), ErrorId::E_ROLLBACK_FAILED);
        assert!(e.to_string().contains("restore point"));
    }

    #[test]
    fn local_errors_never_require_rollback() {
        assert!(ApiError::Privilege("x".into()).is_local());
        assert!(ApiError::BackupCapture("x".into()).is_local());
        assert!(!ApiError::Apply("x".into()).is_local());
        assert!(!ApiError::Timeout("x".into()).is_local());
    }

    #[test]
    fn would_block_maps_to_resource_busy() {
        let e = std::io::Error::new(std::io::ErrorKind::WouldBlock, "locked");
        assert_eq!(map_restore_io_error(&e), ErrorId::E_RESOURCE_BUSY);
        let e = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(map_restore_io_error(&e), ErrorId::E_RESTORE_FAILED);
        let e = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(ApiError::from_restore_io(&e, "payload").id(), ErrorId::E_BACKUP_MISSING);
    }

    #[test]
    fn exit_codes_are_distinct() {
        let ids = [
            ErrorId::E_PRIVILEGE,
            ErrorId::E_INSUFFICIENT_SPACE,
            ErrorId::E_CRITICAL_PROCESS,
            ErrorId::E_CONFLICTING_RESOURCE,
            ErrorId::E_TXN_IN_PROGRESS,
            ErrorId::E_BACKUP_CAPTURE,
            ErrorId::E_APPLY,
            ErrorId::E_CORRUPT_BACKUP,
            ErrorId::E_TIMEOUT,
            ErrorId::E_ROLLBACK_FAILED,
        ];
        let mut seen = std::collections::HashSet::new();
        for id in ids {
            assert!(seen.insert(exit_code_for(id)), "duplicate exit code for {}", id_str(id));
        }
    }
}
