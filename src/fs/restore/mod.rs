//! Restore subsystem: integrity verification, idempotence checks and the restore engine.

pub mod engine;
pub mod idempotence;
pub mod integrity;

pub use engine::{restore_record, RestoreSummary};
pub use integrity::{verify_payload_hash_ok, verify_record};
