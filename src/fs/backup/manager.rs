//! Capture and restoration of a mutation's declared resources.
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::adapters::snapshot::SnapshotRegistry;
use crate::api::errors::{ApiError, ErrorId};
use crate::constants::MANIFEST_SCHEMA;
use crate::fs::meta::{digest_path, tree_size};
use crate::fs::restore::{restore_record, verify_record};
use crate::logging::redact::{now_iso, now_ms};
use crate::mutation::{CancellationToken, Mutation};
use crate::types::ids::new_backup_id;
use crate::types::{
    BackupPreview, BackupRecord, ManifestEntry, OperationResult, Phase, Resource,
};

use super::store::BackupStore;

pub struct BackupManager<'a> {
    store: &'a BackupStore,
    snapshots: &'a SnapshotRegistry,
}

impl<'a> BackupManager<'a> {
    #[must_use]
    pub const fn new(store: &'a BackupStore, snapshots: &'a SnapshotRegistry) -> Self {
        Self { store, snapshots }
    }

    /// Bytes a capture of `resources` is expected to need.
    #[must_use]
    pub fn estimate(&self, resources: &[Resource]) -> u64 {
        resources
            .iter()
            .filter_map(|r| self.snapshots.get(r.kind).map(|s| s.estimate_size(r)))
            .sum()
    }

    /// Capture every declared resource of `mutation` into a new committed record.
    ///
    /// Payloads are written under the staging directory, checksummed, promoted, and the
    /// manifest is written last. On any failure nothing of the capture remains.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::BackupCapture` describing the first resource that failed.
    pub fn capture(&self, mutation: &dyn Mutation, phase: Phase) -> Result<BackupRecord, ApiError> {
        let mutation_id = mutation.descriptor().id;
        let backup_id = new_backup_id();
        let created_at = now_iso();
        let created_ms = now_ms();
        let staging = self
            .store
            .begin_staging(&backup_id)
            .map_err(|e| ApiError::BackupCapture(format!("staging: {e}")))?;

        let mut entries = Vec::new();
        let mut staged: Vec<(PathBuf, PathBuf)> = Vec::new();
        for (n, resource) in mutation.resources().iter().enumerate() {
            let res = (|| {
                let snap = self.snapshots.require(resource.kind)?;
                let staged_path = staging.join(n.to_string());
                let prior = snap.capture(resource, &staged_path)?;
                let checksum = digest_path(&staged_path)?;
                Ok::<_, std::io::Error>((staged_path, prior, checksum))
            })();
            let (staged_path, prior, checksum) = match res {
                Ok(v) => v,
                Err(e) => {
                    self.store.discard(&backup_id, &[]);
                    return Err(ApiError::BackupCapture(format!("{resource}: {e}")));
                }
            };
            let rel = BackupStore::payload_rel(resource.kind, mutation_id, &backup_id, n);
            entries.push(ManifestEntry {
                kind: resource.kind,
                locator: resource.locator.clone(),
                prior,
                payload: rel.clone(),
                checksum,
                size_bytes: tree_size(&staged_path),
            });
            staged.push((staged_path, rel));
        }

        let record = BackupRecord {
            schema: MANIFEST_SCHEMA.to_string(),
            id: backup_id.clone(),
            mutation_id: mutation_id.to_string(),
            phase,
            created_at,
            created_ms,
            entries,
        };
        let rels: Vec<PathBuf> = staged.iter().map(|(_, rel)| rel.clone()).collect();
        if let Err(e) = self
            .store
            .promote(&staged)
            .and_then(|()| self.store.commit(&record))
        {
            self.store.discard(&backup_id, &rels);
            return Err(ApiError::BackupCapture(format!("commit: {e}")));
        }
        self.store.discard(&backup_id, &[]);
        log::info!(
            "captured backup {} for {} ({} resources, {} bytes)",
            record.id,
            mutation_id,
            record.entries.len(),
            record.total_bytes()
        );
        Ok(record)
    }

    /// # Errors
    ///
    /// Returns `ApiError::CorruptBackup` if any payload is missing or differs from its checksum.
    pub fn verify(&self, record: &BackupRecord) -> Result<(), ApiError> {
        verify_record(self.store.root(), record).map_err(|e| ApiError::CorruptBackup(e.msg))
    }

    /// Restore every payload of `record`, then let the mutation reconcile.
    pub fn restore(
        &self,
        record: &BackupRecord,
        mutation: &dyn Mutation,
        cancel: &CancellationToken,
    ) -> OperationResult {
        let summary = match restore_record(self.store, self.snapshots, record, cancel) {
            Ok(s) => s,
            Err(e) => return OperationResult::from_error(&e).with_detail("backup_id", record.id.as_str()),
        };
        let mut r = mutation.revert(record);
        if !r.success && r.error == Some(ErrorId::E_APPLY) {
            r.error = Some(ErrorId::E_RESTORE_FAILED);
        }
        r.with_detail("backup_id", record.id.as_str())
            .with_detail("restored", summary.restored)
            .with_detail("unchanged", summary.unchanged)
    }

    /// Delete `record` from the store.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Filesystem` if the manifest cannot be removed.
    pub fn purge(&self, record: &BackupRecord) -> Result<(), ApiError> {
        self.store
            .delete(record)
            .map_err(|e| ApiError::Filesystem(format!("purge {}: {e}", record.id)))
    }

    #[must_use]
    pub fn preview(&self, record: &BackupRecord) -> BackupPreview {
        let mut entries_by_kind = BTreeMap::new();
        for e in &record.entries {
            *entries_by_kind.entry(e.kind).or_insert(0) += 1;
        }
        BackupPreview {
            backup_id: record.id.clone(),
            mutation_id: record.mutation_id.clone(),
            created_at: record.created_at.clone(),
            entries_by_kind,
            total_bytes: record.total_bytes(),
            locators: record.entries.iter().map(|e| e.resource().to_string()).collect(),
        }
    }
}
