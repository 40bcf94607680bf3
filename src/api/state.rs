//! Persisted per-mutation ledger (`state.json`).
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::api::errors::ApiError;
use crate::constants::LEDGER_SCHEMA;
use crate::fs::atomic::write_atomic;
use crate::logging::redact::{now_iso, now_ms};
use crate::types::{MutationState, OperationResult, Phase};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerEntry {
    pub state: MutationState,
    /// Record of the most recent successful capture for apply.
    pub backup_id: Option<String>,
    /// Set while an apply or revert is running; left behind by a crash.
    pub in_progress: Option<Phase>,
    pub reboot_pending: bool,
    pub updated_at: String,
    pub last_result: Option<OperationResult>,
}

#[derive(Serialize, Deserialize)]
struct LedgerFile {
    schema: String,
    entries: BTreeMap<String, LedgerEntry>,
}

pub(crate) struct StateLedger {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, LedgerEntry>>,
}

impl StateLedger {
    /// Load the ledger at `path`. A missing file is an empty ledger; an unreadable one is
    /// moved aside and replaced by an empty ledger.
    pub(crate) fn load(path: &Path) -> Self {
        let entries = match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<LedgerFile>(&bytes) {
                Ok(f) => f.entries,
                Err(e) => {
                    let aside = path.with_extension(format!("json.corrupt-{}", now_ms()));
                    log::error!(
                        "state ledger {} unreadable ({e}); moved to {}",
                        path.display(),
                        aside.display()
                    );
                    let _ = std::fs::rename(path, &aside);
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };
        Self {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, LedgerEntry>> {
        match self.entries.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub(crate) fn get(&self, id: &str) -> LedgerEntry {
        self.lock().get(id).cloned().unwrap_or_default()
    }

    pub(crate) fn snapshot(&self) -> BTreeMap<String, LedgerEntry> {
        self.lock().clone()
    }

    /// Mutate the entry for `id` and persist the whole ledger while still holding the lock.
    /// The in-memory change stands even when persisting fails.
    pub(crate) fn update(
        &self,
        id: &str,
        f: impl FnOnce(&mut LedgerEntry),
    ) -> Result<LedgerEntry, ApiError> {
        let mut entries = self.lock();
        let entry = entries.entry(id.to_string()).or_default();
        f(entry);
        entry.updated_at = now_iso();
        let out = entry.clone();
        let file = LedgerFile {
            schema: LEDGER_SCHEMA.to_string(),
            entries: entries.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&file)
            .map_err(|e| ApiError::Filesystem(format!("ledger encode: {e}")))?;
        write_atomic(&self.path, &bytes)
            .map_err(|e| ApiError::Filesystem(format!("ledger write {}: {e}", self.path.display())))?;
        Ok(out)
    }

    /// `update` for call sites that can only log a persistence failure.
    pub(crate) fn record(&self, id: &str, f: impl FnOnce(&mut LedgerEntry)) -> LedgerEntry {
        match self.update(id, f) {
            Ok(e) => e,
            Err(e) => {
                log::error!("{e}");
                self.get(id)
            }
        }
    }
}
