//! Identifier helpers for backups and transactions.
//!
//! Backup ids are random UUIDv4 strings so concurrent captures never collide in the store.
//! Transaction ids tie together every audit fact emitted for one apply/revert/simulate call.
use uuid::Uuid;

/// Fresh id for a backup capture.
#[must_use]
pub fn new_backup_id() -> String {
    Uuid::new_v4().to_string()
}

/// Fresh id for a transaction.
#[must_use]
pub fn new_txn_id() -> Uuid {
    Uuid::new_v4()
}

/// Ids end up as path components in the store; reject anything that could escape a directory.
#[must_use]
pub fn is_safe_component(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
