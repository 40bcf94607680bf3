//! Backup subsystem: the on-disk store, capture/restore manager and retention.

pub mod manager;
pub mod prune;
pub mod store;

pub use manager::BackupManager;
pub use prune::prune_records;
pub use store::BackupStore;
