use crate::adapters::snapshot::SnapshotRegistry;
use crate::api::errors::ApiError;
use crate::fs::backup::store::BackupStore;
use crate::mutation::CancellationToken;
use crate::types::BackupRecord;

use super::idempotence::already_restored;
use super::integrity::verify_record;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    pub restored: usize,
    pub unchanged: usize,
}

/// Re-apply every payload of `record` to its live resource.
///
/// Every checksum is verified before the first resource is touched. Entries are restored in
/// reverse capture order; `cancel` is polled between entries.
///
/// # Errors
///
/// `CorruptBackup` if verification fails, `Cancelled` if `cancel` fired part-way, and
/// `ResourceBusy`/`BackupMissing`/`RestoreFailed` for snapshotter failures.
pub fn restore_record(
    store: &BackupStore,
    snapshots: &SnapshotRegistry,
    record: &BackupRecord,
    cancel: &CancellationToken,
) -> Result<RestoreSummary, ApiError> {
    verify_record(store.root(), record).map_err(|e| ApiError::CorruptBackup(e.msg))?;
    let mut summary = RestoreSummary::default();
    for entry in record.entries.iter().rev() {
        if cancel.is_cancelled() {
            return Err(ApiError::Cancelled);
        }
        let payload = store.root().join(&entry.payload);
        if already_restored(entry, &payload) {
            summary.unchanged += 1;
            continue;
        }
        let resource = entry.resource();
        let snap = snapshots
            .require(entry.kind)
            .map_err(|e| ApiError::RestoreFailed(e.to_string()))?;
        snap.restore(&resource, &payload, entry.prior)
            .map_err(|e| ApiError::from_restore_io(&e, &resource.to_string()))?;
        log::debug!("restored {resource} from backup {}", record.id);
        summary.restored += 1;
    }
    Ok(summary)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::api::errors::ErrorId;
    use crate::fs::backup::manager::BackupManager;
    use crate::mutation::TempCleanup;
    use crate::types::Phase;

    #[test]
    fn tampered_payload_stops_before_any_restore() {
        let live = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        std::fs::write(live.path().join("keep"), b"v1").unwrap();
        let store = BackupStore::new(root.path());
        let snaps = SnapshotRegistry::with_defaults();
        let m = TempCleanup::new(vec![live.path().to_path_buf()]);
        let rec = BackupManager::new(&store, &snaps)
            .capture(&m, Phase::Apply)
            .unwrap();

        std::fs::write(live.path().join("keep"), b"v2").unwrap();
        let data = root.path().join(&rec.entries[0].payload).join("data/keep");
        std::fs::write(&data, b"evil").unwrap();

        let err = restore_record(&store, &snaps, &rec, &CancellationToken::new()).unwrap_err();
        assert_eq!(err.id(), ErrorId::E_CORRUPT_BACKUP);
        assert_eq!(std::fs::read(live.path().join("keep")).unwrap(), b"v2");
    }

    #[test]
    fn second_restore_is_unchanged() {
        let live = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        std::fs::write(live.path().join("f"), b"v1").unwrap();
        let store = BackupStore::new(root.path());
        let snaps = SnapshotRegistry::with_defaults();
        let m = TempCleanup::new(vec![live.path().to_path_buf()]);
        let rec = BackupManager::new(&store, &snaps)
            .capture(&m, Phase::Apply)
            .unwrap();
        std::fs::remove_file(live.path().join("f")).unwrap();

        let tok = CancellationToken::new();
        let first = restore_record(&store, &snaps, &rec, &tok).unwrap();
        assert_eq!(first.restored, 1);
        let second = restore_record(&store, &snaps, &rec, &tok).unwrap();
        assert_eq!(second, RestoreSummary { restored: 0, unchanged: 1 });
    }
}
