//! Shared crate-wide constants for Tweakyard.
//!
//! Centralizes magic values and default labels used across modules.

/// Directory name used under the platform's local data directory when no root is given.
pub const APP_DIR_NAME: &str = "Tweakyard";

/// Temporary filename suffix used for atomic replace staging within a directory.
/// The temporary name is constructed as `.{fname}.{pid}.{ctr}{TMP_SUFFIX}`.
pub const TMP_SUFFIX: &str = ".tweakyard.tmp";

/// Name of the staging subtree inside the backup root. Captures are written here first
/// and promoted once every resource of the mutation has been captured.
pub const STAGING_DIR: &str = ".staging";

/// Name of the manifest subtree inside the backup root.
pub const MANIFEST_DIR: &str = "manifests";

/// Schema tag written into every backup manifest.
pub const MANIFEST_SCHEMA: &str = "backup_manifest.v1";

/// Schema tag written into the persisted state ledger.
pub const LEDGER_SCHEMA: &str = "state_ledger.v1";

/// Poll interval in milliseconds for the file-backed lock manager (see `adapters/lock/file.rs`).
pub const LOCK_POLL_MS: u64 = 25;

/// Default lock timeout used when building an engine unless the policy overrides it.
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;

/// Default deadline for a single apply or revert call.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Grace period granted to a cancelled worker before rollback starts.
pub const DEFAULT_CANCEL_GRACE_MS: u64 = 2_000;

/// Default cap on simultaneously in-flight transactions.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;

/// Free space kept in reserve on the backup volume, on top of the capture estimate.
pub const DEFAULT_RESERVE_BYTES: u64 = 1024 * 1024 * 1024;

/// Size assumed for snapshots whose payload cannot be estimated up front
/// (registry exports, service and power state dumps).
pub const OPAQUE_CAPTURE_ESTIMATE: u64 = 64 * 1024;

/// Process names that block every apply by default. Matching is a case-insensitive substring test.
pub const DEFAULT_CRITICAL_PROCESSES: &[&str] = &["msiexec", "trustedinstaller", "wbengine"];

/// Shown with every `E_ROLLBACK_FAILED` result.
pub const RECOVERY_GUIDANCE: &str = "System state may be inconsistent. Restore from an OS restore point \
or boot into safe mode to repair the affected settings manually.";
