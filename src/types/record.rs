//! Backup records as persisted in the store's manifest files.
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::mutation::{Resource, ResourceKind};
use super::result::Phase;

/// What existed at the resource locator when it was captured.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorState {
    /// Nothing existed; restore removes whatever is there.
    Absent,
    /// A regular file; the payload directory holds its bytes as `data`.
    File,
    /// A directory tree; the payload directory holds it as `data/`.
    Dir,
    /// Opaque snapshot written by a command-backed or custom snapshotter.
    Captured,
}

/// One captured resource inside a record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub kind: ResourceKind,
    pub locator: String,
    pub prior: PriorState,
    /// Payload location relative to the backup root.
    pub payload: PathBuf,
    /// SHA-256 over the payload (file bytes, or a deterministic walk of a payload tree).
    pub checksum: String,
    pub size_bytes: u64,
}

impl ManifestEntry {
    #[must_use]
    pub fn resource(&self) -> Resource {
        Resource::new(self.kind, self.locator.clone())
    }
}

/// A complete, committed capture of every resource a mutation declares.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub schema: String,
    pub id: String,
    pub mutation_id: String,
    /// Transaction phase that took the capture (`apply`, or `revert` for pre-revert snapshots).
    pub phase: Phase,
    pub created_at: String,
    /// Unix milliseconds; used to order records of the same mutation.
    pub created_ms: u64,
    pub entries: Vec<ManifestEntry>,
}

impl BackupRecord {
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.size_bytes).sum()
    }

    #[must_use]
    pub fn entry_for(&self, resource: &Resource) -> Option<&ManifestEntry> {
        self.entries
            .iter()
            .find(|e| e.kind == resource.kind && e.locator == resource.locator)
    }
}
