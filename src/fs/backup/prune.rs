use std::time::Duration;

use super::store::BackupStore;
use crate::logging::redact::now_ms;
use crate::types::PruneResult;

/// Prune the records of `mutation_id` based on count and age limits.
///
/// # Errors
///
/// Returns an IO error if a selected record's manifest cannot be deleted.
///
/// Retention semantics:
/// - `count_limit = Some(N)`: retain up to N newest records in total, including the newest. N is clamped to at least 1.
/// - `count_limit = None`: no count-based pruning (age policy may still prune).
/// - `age_limit = Some(d)`: prune any record older than `d` relative to now, regardless of count, but still never delete the newest entry.
/// - `age_limit = None`: no age-based pruning.
///
/// Both policies apply together: a record is pruned if it violates either count or age policy.
/// The newest record and the record named by `protect` are never deleted.
pub fn prune_records(
    store: &BackupStore,
    mutation_id: &str,
    count_limit: Option<usize>,
    age_limit: Option<Duration>,
    protect: Option<&str>,
) -> std::io::Result<PruneResult> {
    let mut records = store.list(mutation_id);
    if records.is_empty() {
        return Ok(PruneResult::default());
    }
    // Newest first.
    records.reverse();

    let now = now_ms();
    let age_cutoff_ms = age_limit.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
    let desired_keep_by_count = count_limit.map_or(usize::MAX, |n| n.max(1));

    let mut pruned = 0usize;
    let mut retained = 0usize;
    for (idx, rec) in records.iter().enumerate() {
        if idx == 0 || protect == Some(rec.id.as_str()) {
            retained += 1;
            continue;
        }
        let count_violation = idx >= desired_keep_by_count;
        let age_violation =
            age_cutoff_ms.is_some_and(|cut| now.saturating_sub(rec.created_ms) > cut);
        if count_violation || age_violation {
            store.delete(rec)?;
            pruned += 1;
        } else {
            retained += 1;
        }
    }
    Ok(PruneResult {
        pruned_count: pruned,
        retained_count: retained,
    })
}
