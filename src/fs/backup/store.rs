//! On-disk repository of backup records, keyed by backup id.
//!
//! Layout under the backup root:
//! - `<kind-dir>/<mutationId>/<backupId>/<n>/` for file payloads
//! - `<kind-dir>/<mutationId>/<backupId>.<n>.<ext>` for opaque payloads
//! - `manifests/<mutationId>/<backupId>.json`: the commit point of a record
//! - `.staging/<backupId>/`: captures in progress
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::constants::{MANIFEST_DIR, STAGING_DIR};
use crate::fs::atomic::{fsync_parent_dir, remove_any, write_atomic};
use crate::types::errors::{Error, ErrorKind, Result};
use crate::types::ids::is_safe_component;
use crate::types::{BackupRecord, Phase, ResourceKind};

#[derive(Clone, Debug)]
pub struct BackupStore {
    root: PathBuf,
}

impl BackupStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final payload location of the `index`-th resource of a capture, relative to the root.
    #[must_use]
    pub fn payload_rel(
        kind: ResourceKind,
        mutation_id: &str,
        backup_id: &str,
        index: usize,
    ) -> PathBuf {
        let base = Path::new(kind.store_dir()).join(mutation_id);
        match kind.payload_ext() {
            Some(ext) => base.join(format!("{backup_id}.{index}.{ext}")),
            None => base.join(backup_id).join(index.to_string()),
        }
    }

    #[must_use]
    pub fn staging_dir(&self, backup_id: &str) -> PathBuf {
        self.root.join(STAGING_DIR).join(backup_id)
    }

    fn manifests_dir(&self) -> PathBuf {
        self.root.join(MANIFEST_DIR)
    }

    #[must_use]
    pub fn manifest_path(&self, mutation_id: &str, backup_id: &str) -> PathBuf {
        self.manifests_dir()
            .join(mutation_id)
            .join(format!("{backup_id}.json"))
    }

    /// Create a fresh, empty staging directory for `backup_id`.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the directory cannot be created.
    pub fn begin_staging(&self, backup_id: &str) -> io::Result<PathBuf> {
        let dir = self.staging_dir(backup_id);
        remove_any(&dir)?;
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Move staged payloads into their final locations. Stops at the first failure;
    /// the caller discards whatever was promoted.
    ///
    /// # Errors
    ///
    /// Returns an IO error if a parent directory cannot be created or a rename fails.
    pub fn promote(&self, staged: &[(PathBuf, PathBuf)]) -> io::Result<()> {
        for (from, rel) in staged {
            let to = self.root.join(rel);
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(from, &to)?;
            let _ = fsync_parent_dir(&to);
        }
        Ok(())
    }

    /// Write the manifest for `record`. Once this returns the record exists.
    ///
    /// # Errors
    ///
    /// Returns an IO error if serialization or the atomic write fails.
    pub fn commit(&self, record: &BackupRecord) -> io::Result<()> {
        let bytes = serde_json::to_vec_pretty(record).map_err(io::Error::other)?;
        write_atomic(&self.manifest_path(&record.mutation_id, &record.id), &bytes)
    }

    /// Remove a staging directory and any payloads already promoted from it.
    pub fn discard(&self, backup_id: &str, promoted: &[PathBuf]) {
        for rel in promoted {
            let _ = remove_any(&self.root.join(rel));
        }
        let _ = remove_any(&self.staging_dir(backup_id));
    }

    /// Delete every leftover staging directory (interrupted captures). Returns the count.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the staging root exists but cannot be listed.
    pub fn sweep_staging(&self) -> io::Result<usize> {
        let dir = self.root.join(STAGING_DIR);
        let rd = match fs::read_dir(&dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };
        let mut n = 0;
        for entry in rd.flatten() {
            if remove_any(&entry.path()).is_ok() {
                n += 1;
            }
        }
        Ok(n)
    }

    fn find_manifest(&self, backup_id: &str) -> Option<PathBuf> {
        if !is_safe_component(backup_id) {
            return None;
        }
        let rd = fs::read_dir(self.manifests_dir()).ok()?;
        rd.flatten()
            .map(|e| e.path().join(format!("{backup_id}.json")))
            .find(|p| p.is_file())
    }

    /// Whether a committed manifest exists for `backup_id`.
    #[must_use]
    pub fn is_present(&self, backup_id: &str) -> bool {
        self.find_manifest(backup_id).is_some()
    }

    /// Load the record for `backup_id`.
    ///
    /// # Errors
    ///
    /// `ErrorKind::NotFound` if no manifest exists, `ErrorKind::Integrity` if it does not parse.
    pub fn read_record(&self, backup_id: &str) -> Result<BackupRecord> {
        let path = self.find_manifest(backup_id).ok_or_else(|| {
            Error::new(ErrorKind::NotFound, format!("no manifest for backup {backup_id}"))
        })?;
        read_manifest(&path)
    }

    /// Every readable record of `mutation_id`, oldest first.
    #[must_use]
    pub fn list(&self, mutation_id: &str) -> Vec<BackupRecord> {
        let dir = self.manifests_dir().join(mutation_id);
        let mut out: Vec<BackupRecord> = fs::read_dir(dir)
            .map(|rd| {
                rd.flatten()
                    .filter(|e| e.path().extension().is_some_and(|x| x == "json"))
                    .filter_map(|e| match read_manifest(&e.path()) {
                        Ok(r) => Some(r),
                        Err(err) => {
                            log::warn!("skipping manifest {}: {}", e.path().display(), err.msg);
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by(|a, b| a.created_ms.cmp(&b.created_ms).then(a.id.cmp(&b.id)));
        out
    }

    /// Newest record of `mutation_id` captured in `phase`.
    #[must_use]
    pub fn latest(&self, mutation_id: &str, phase: Phase) -> Option<BackupRecord> {
        self.list(mutation_id)
            .into_iter()
            .rev()
            .find(|r| r.phase == phase)
    }

    /// Delete a record: the manifest first (so the record stops existing), then its payloads.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the manifest cannot be removed. Payload removal is best-effort.
    pub fn delete(&self, record: &BackupRecord) -> io::Result<()> {
        let manifest = self.manifest_path(&record.mutation_id, &record.id);
        match fs::remove_file(&manifest) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        let _ = fsync_parent_dir(&manifest);
        for entry in &record.entries {
            let payload = self.root.join(&entry.payload);
            if let Err(e) = remove_any(&payload) {
                log::warn!("failed to remove payload {}: {e}", payload.display());
            }
        }
        // File payloads sit in a per-backup directory.
        let _ = remove_any(
            &self
                .root
                .join(ResourceKind::File.store_dir())
                .join(&record.mutation_id)
                .join(&record.id),
        );
        Ok(())
    }
}

fn read_manifest(path: &Path) -> Result<BackupRecord> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| {
        Error::new(
            ErrorKind::Integrity,
            format!("unreadable manifest {}: {e}", path.display()),
        )
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::constants::MANIFEST_SCHEMA;

    fn record(mid: &str, id: &str, ms: u64, phase: Phase) -> BackupRecord {
        BackupRecord {
            schema: MANIFEST_SCHEMA.to_string(),
            id: id.to_string(),
            mutation_id: mid.to_string(),
            phase,
            created_at: String::new(),
            created_ms: ms,
            entries: Vec::new(),
        }
    }

    #[test]
    fn payload_layout_by_kind() {
        assert_eq!(
            BackupStore::payload_rel(ResourceKind::Registry, "m", "b", 0),
            Path::new("registry/m/b.0.reg-export")
        );
        assert_eq!(
            BackupStore::payload_rel(ResourceKind::File, "m", "b", 2),
            Path::new("files/m/b/2")
        );
        assert_eq!(
            BackupStore::payload_rel(ResourceKind::PowerPlan, "m", "b", 1),
            Path::new("power/m/b.1.pwr-scheme")
        );
    }

    #[test]
    fn commit_makes_record_visible_and_delete_removes_it() {
        let td = tempfile::tempdir().unwrap();
        let store = BackupStore::new(td.path());
        assert!(!store.is_present("b1"));
        store.commit(&record("m", "b1", 2, Phase::Apply)).unwrap();
        store.commit(&record("m", "b0", 1, Phase::Apply)).unwrap();
        store.commit(&record("m", "b2", 3, Phase::Revert)).unwrap();
        assert!(store.is_present("b1"));
        let ids: Vec<_> = store.list("m").into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["b0", "b1", "b2"]);
        assert_eq!(store.latest("m", Phase::Apply).unwrap().id, "b1");
        store.delete(&store.read_record("b1").unwrap()).unwrap();
        assert!(!store.is_present("b1"));
        assert_eq!(store.read_record("b1").unwrap_err().kind, ErrorKind::NotFound);
    }

    #[test]
    fn corrupt_manifest_reads_as_integrity_error() {
        let td = tempfile::tempdir().unwrap();
        let store = BackupStore::new(td.path());
        let p = store.manifest_path("m", "bad");
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(&p, b"{ nope").unwrap();
        assert_eq!(store.read_record("bad").unwrap_err().kind, ErrorKind::Integrity);
        assert!(store.list("m").is_empty());
    }

    #[test]
    fn sweep_removes_interrupted_staging() {
        let td = tempfile::tempdir().unwrap();
        let store = BackupStore::new(td.path());
        let s = store.begin_staging("x").unwrap();
        fs::write(s.join("0"), b"partial").unwrap();
        assert_eq!(store.sweep_staging().unwrap(), 1);
        assert!(!s.exists());
        assert!(!store.is_present("../etc"));
    }
}
