//! Safety validation run before every apply and revert.
//!
//! Checks run in a fixed order: compatibility, privilege, disk space, critical processes.
//! The first failing check short-circuits; nothing here writes anything.
//! The per-id in-flight check is enforced by the orchestrator's claim before validation.
pub mod checks;

use std::path::Path;

use crate::adapters::SystemProbe;
use crate::api::errors::ApiError;
use crate::mutation::Mutation;
use crate::policy::Policy;
use crate::types::{PreflightReport, Resource, ResourceKind};

/// Which transaction the validation gates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gate {
    Apply,
    /// Compatibility is not re-checked; `estimate` is zero unless a pre-revert capture is taken.
    Revert,
}

pub struct Validator<'a> {
    pub policy: &'a Policy,
    pub probe: &'a dyn SystemProbe,
    pub backup_root: &'a Path,
}

impl<'a> Validator<'a> {
    /// Run every check in order and stop at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the `ApiError` of the first failing check.
    pub fn validate(
        &self,
        m: &dyn Mutation,
        gate: Gate,
        estimate: u64,
    ) -> Result<PreflightReport, ApiError> {
        if gate == Gate::Apply {
            checks::check_compatibility(m)?;
        }
        checks::check_privilege(m, self.policy, self.probe)?;
        let available =
            checks::check_disk_space(m, estimate, self.policy, self.probe, self.backup_root)?;
        checks::check_critical_processes(m, self.policy, self.probe)?;
        Ok(PreflightReport {
            ok: true,
            estimated_capture_bytes: estimate,
            available_bytes: available,
            warnings: Vec::new(),
            stops: Vec::new(),
        })
    }

    /// Run every check without short-circuiting; used to annotate simulate results.
    #[must_use]
    pub fn assess(&self, m: &dyn Mutation, estimate: u64) -> PreflightReport {
        let mut stops: Vec<ApiError> = Vec::new();
        let mut available = None;
        if let Err(e) = checks::check_compatibility(m) {
            stops.push(e);
        }
        if let Err(e) = checks::check_privilege(m, self.policy, self.probe) {
            stops.push(e);
        }
        match checks::check_disk_space(m, estimate, self.policy, self.probe, self.backup_root) {
            Ok(a) => available = a,
            Err(e) => stops.push(e),
        }
        if let Err(e) = checks::check_critical_processes(m, self.policy, self.probe) {
            stops.push(e);
        }
        let mut warnings = Vec::new();
        if m.descriptor().requires_reboot {
            warnings.push("a restart is needed for the change to take effect".to_string());
        }
        PreflightReport {
            ok: stops.is_empty(),
            estimated_capture_bytes: estimate,
            available_bytes: available,
            warnings,
            stops: stops.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Reject any two mutations whose declared resources overlap, and ids that are not
/// usable as store path components.
///
/// # Errors
///
/// Returns `ApiError::ConflictingResource` naming both mutations and resources, or
/// `ApiError::Config` for an unusable id.
pub fn check_registration(mutations: &[&dyn Mutation]) -> Result<(), ApiError> {
    for m in mutations {
        let id = m.descriptor().id;
        if !crate::types::ids::is_safe_component(id) {
            return Err(ApiError::Config(format!("mutation id '{id}' is not a valid name")));
        }
    }
    for (i, a) in mutations.iter().enumerate() {
        for b in &mutations[i + 1..] {
            if a.descriptor().id == b.descriptor().id {
                return Err(ApiError::Config(format!(
                    "mutation id '{}' registered twice",
                    a.descriptor().id
                )));
            }
            for ra in a.resources() {
                if let Some(rb) = b.resources().iter().find(|rb| ra.overlaps(rb)) {
                    return Err(ApiError::ConflictingResource(format!(
                        "{} ({}) overlaps {} ({})",
                        a.descriptor().id,
                        ra,
                        b.descriptor().id,
                        rb
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Reject any declared file resource that contains, or lies inside, the application root.
/// Captures, the ledger and the audit log live there.
///
/// # Errors
///
/// Returns `ApiError::ConflictingResource` naming the mutation and resource.
pub fn check_reserved(mutations: &[&dyn Mutation], app_root: &Path) -> Result<(), ApiError> {
    let mut reserved = vec![Resource::file(app_root)];
    if let Ok(real) = app_root.canonicalize() {
        reserved.push(Resource::file(real));
    }
    for m in mutations {
        for r in m.resources().iter().filter(|r| r.kind == ResourceKind::File) {
            let mut forms = vec![r.clone()];
            if let Ok(real) = Path::new(&r.locator).canonicalize() {
                forms.push(Resource::file(real));
            }
            if forms.iter().any(|f| reserved.iter().any(|x| f.overlaps(x))) {
                return Err(ApiError::ConflictingResource(format!(
                    "{} ({}) overlaps the application root {}",
                    m.descriptor().id,
                    r,
                    app_root.display()
                )));
            }
        }
    }
    Ok(())
}
