use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::mutation::{ImpactLevel, MutationState, ResourceKind};
use super::result::OperationResult;

/// Snapshot of one mutation's lifecycle as reported to callers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MutationStatus {
    pub id: String,
    pub display_name: String,
    pub description: String,
    pub category: String,
    pub impact: ImpactLevel,
    pub estimated_time_secs: u64,
    pub state: MutationState,
    pub backup_id: Option<String>,
    pub reboot_pending: bool,
    pub in_flight: bool,
    pub last_result: Option<OperationResult>,
}

impl MutationStatus {
    /// Whether a revert currently has material to act on.
    #[must_use]
    pub fn can_revert(&self) -> bool {
        self.backup_id.is_some()
            && matches!(
                self.state,
                MutationState::Applied | MutationState::Failed
            )
    }
}

/// Outcome of one pre-flight validation pass.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PreflightReport {
    pub ok: bool,
    pub estimated_capture_bytes: u64,
    pub available_bytes: Option<u64>,
    pub warnings: Vec<String>,
    pub stops: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneResult {
    pub pruned_count: usize,
    pub retained_count: usize,
}

/// What restoring a record would touch, without restoring it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BackupPreview {
    pub backup_id: String,
    pub mutation_id: String,
    pub created_at: String,
    pub entries_by_kind: BTreeMap<ResourceKind, usize>,
    pub total_bytes: u64,
    pub locators: Vec<String>,
}
