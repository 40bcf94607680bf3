//! Individual pre-flight checks. Each is read-only and returns the error it would raise.
use std::path::Path;

use crate::adapters::SystemProbe;
use crate::api::errors::ApiError;
use crate::mutation::Mutation;
use crate::policy::Policy;

/// The mutation must report itself compatible with this host.
pub fn check_compatibility(m: &dyn Mutation) -> Result<(), ApiError> {
    if m.check_compatibility() {
        Ok(())
    } else {
        Err(ApiError::Incompatible(m.descriptor().id.to_string()))
    }
}

/// Elevation is required by the mutation's own flag or by any declared resource kind
/// the policy lists under `require_elevation_for`.
pub fn check_privilege(
    m: &dyn Mutation,
    policy: &Policy,
    probe: &dyn SystemProbe,
) -> Result<(), ApiError> {
    let d = m.descriptor();
    let kind_needs = m
        .resources()
        .iter()
        .find(|r| policy.preflight.require_elevation_for.contains(&r.kind));
    let reason = if d.requires_admin {
        Some(format!("{} requires administrator rights", d.id))
    } else {
        kind_needs.map(|r| format!("{} touches {} which requires administrator rights", d.id, r))
    };
    match reason {
        Some(why) if !probe.is_elevated() => Err(ApiError::Privilege(why)),
        _ => Ok(()),
    }
}

/// Free space on the backup volume must cover the mutation minimum, the capture
/// estimate and the policy reserve.
///
/// Returns the available byte count when it could be measured. A failed measurement
/// refuses the transaction unless the policy sets `allow_unmeasured`.
pub fn check_disk_space(
    m: &dyn Mutation,
    estimate: u64,
    policy: &Policy,
    probe: &dyn SystemProbe,
    backup_root: &Path,
) -> Result<Option<u64>, ApiError> {
    if !policy.preflight.check_disk_space {
        return Ok(None);
    }
    let needed = m
        .descriptor()
        .min_free_bytes
        .saturating_add(estimate)
        .saturating_add(policy.preflight.reserve_bytes);
    let available = match probe.available_bytes(backup_root) {
        Ok(a) => a,
        Err(e) if policy.preflight.allow_unmeasured => {
            log::warn!("cannot measure free space at {}: {e}", backup_root.display());
            return Ok(None);
        }
        Err(e) => {
            return Err(ApiError::Filesystem(format!(
                "cannot measure free space at {}: {e}",
                backup_root.display()
            )))
        }
    };
    if available < needed {
        return Err(ApiError::InsufficientSpace { needed, available });
    }
    Ok(Some(available))
}

/// Case-insensitive substring match of the policy and mutation process lists against
/// the running process names. Returns the first hit as `(pattern, process)`.
pub fn find_critical_process(patterns: &[String], running: &[String]) -> Option<(String, String)> {
    let lowered: Vec<String> = patterns
        .iter()
        .map(|p| p.to_ascii_lowercase())
        .filter(|p| !p.is_empty())
        .collect();
    running.iter().find_map(|proc_name| {
        let name = proc_name.to_ascii_lowercase();
        lowered
            .iter()
            .find(|p| name.contains(p.as_str()))
            .map(|p| (p.clone(), proc_name.clone()))
    })
}

pub fn check_critical_processes(
    m: &dyn Mutation,
    policy: &Policy,
    probe: &dyn SystemProbe,
) -> Result<(), ApiError> {
    let mut patterns = policy.preflight.critical_processes.clone();
    patterns.extend(m.conflicting_processes().iter().map(|s| (*s).to_string()));
    if patterns.is_empty() {
        return Ok(());
    }
    let running = match probe.running_processes() {
        Ok(r) => r,
        Err(e) if policy.preflight.allow_unmeasured => {
            log::warn!("cannot list running processes: {e}");
            return Ok(());
        }
        Err(e) => {
            return Err(ApiError::CriticalProcessConflict(format!(
                "cannot list running processes: {e}"
            )))
        }
    };
    match find_critical_process(&patterns, &running) {
        Some((pattern, name)) => Err(ApiError::CriticalProcessConflict(format!(
            "{name} is running (matches '{pattern}')"
        ))),
        None => Ok(()),
    }
}
