pub mod atomic;
pub mod backup;
pub mod meta;
pub mod restore;

pub use atomic::{fsync_parent_dir, remove_any, replace_file_from, write_atomic};
pub use backup::{BackupManager, BackupStore};
pub use meta::{digest_path, sha256_hex_of, tree_digest, tree_size};
pub use restore::{restore_record, verify_record};
