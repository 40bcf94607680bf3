use std::path::Path;

use crate::fs::meta::digest_path;
use crate::types::errors::{Error, ErrorKind, Result};
use crate::types::BackupRecord;

/// Verify that the payload at `payload` hashes to `expected`.
/// A payload that cannot be read counts as a mismatch.
#[must_use]
pub fn verify_payload_hash_ok(payload: &Path, expected: &str) -> bool {
    digest_path(payload).is_ok_and(|actual| actual == expected)
}

/// Check every entry of `record` against the payloads under `backup_root`.
///
/// # Errors
///
/// Returns `ErrorKind::Integrity` naming the first entry whose payload is missing or
/// whose checksum differs.
pub fn verify_record(backup_root: &Path, record: &BackupRecord) -> Result<()> {
    for entry in &record.entries {
        let payload = backup_root.join(&entry.payload);
        if !payload.exists() {
            return Err(Error::new(
                ErrorKind::Integrity,
                format!(
                    "backup {}: payload for {} is missing",
                    record.id,
                    entry.resource()
                ),
            ));
        }
        if !verify_payload_hash_ok(&payload, &entry.checksum) {
            return Err(Error::new(
                ErrorKind::Integrity,
                format!(
                    "backup {}: checksum mismatch for {}",
                    record.id,
                    entry.resource()
                ),
            ));
        }
    }
    Ok(())
}
