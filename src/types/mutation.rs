//! Static descriptor data for mutations and the resources they declare.
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Kind of system resource a mutation touches. Each kind has its own snapshotter
/// and its own subtree in the backup store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Registry,
    File,
    Service,
    PowerPlan,
    Custom,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Registry,
        ResourceKind::File,
        ResourceKind::Service,
        ResourceKind::PowerPlan,
        ResourceKind::Custom,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Registry => "registry",
            ResourceKind::File => "file",
            ResourceKind::Service => "service",
            ResourceKind::PowerPlan => "power_plan",
            ResourceKind::Custom => "custom",
        }
    }

    /// Subdirectory of the backup root that holds payloads of this kind.
    #[must_use]
    pub const fn store_dir(&self) -> &'static str {
        match self {
            ResourceKind::Registry => "registry",
            ResourceKind::File => "files",
            ResourceKind::Service => "services",
            ResourceKind::PowerPlan => "power",
            ResourceKind::Custom => "custom",
        }
    }

    /// Payload file extension; `None` for kinds whose payload is a directory.
    #[must_use]
    pub const fn payload_ext(&self) -> Option<&'static str> {
        match self {
            ResourceKind::Registry => Some("reg-export"),
            ResourceKind::File => None,
            ResourceKind::Service => Some("svc-state"),
            ResourceKind::PowerPlan => Some("pwr-scheme"),
            ResourceKind::Custom => Some("custom"),
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A declared resource: its kind and a locator the matching snapshotter understands
/// (a filesystem path, a registry key, a service name, a power scheme selector).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resource {
    pub kind: ResourceKind,
    pub locator: String,
}

impl Resource {
    pub fn new(kind: ResourceKind, locator: impl Into<String>) -> Self {
        Self {
            kind,
            locator: locator.into(),
        }
    }

    pub fn file(path: impl AsRef<Path>) -> Self {
        Self::new(ResourceKind::File, path.as_ref().display().to_string())
    }

    pub fn registry(key: impl Into<String>) -> Self {
        Self::new(ResourceKind::Registry, key)
    }

    pub fn service(name: impl Into<String>) -> Self {
        Self::new(ResourceKind::Service, name)
    }

    pub fn power_plan(selector: impl Into<String>) -> Self {
        Self::new(ResourceKind::PowerPlan, selector)
    }

    pub fn custom(name: impl Into<String>) -> Self {
        Self::new(ResourceKind::Custom, name)
    }

    /// Two resources overlap when they are of the same kind and one contains the other.
    /// Files and registry keys nest; the remaining kinds compare names case-insensitively.
    #[must_use]
    pub fn overlaps(&self, other: &Resource) -> bool {
        if self.kind != other.kind {
            return false;
        }
        match self.kind {
            ResourceKind::File => paths_nest(&self.locator, &other.locator, cfg!(windows)),
            ResourceKind::Registry => {
                let a = normalize_key(&self.locator);
                let b = normalize_key(&other.locator);
                a == b || a.starts_with(&format!("{b}\\")) || b.starts_with(&format!("{a}\\"))
            }
            _ => self.locator.eq_ignore_ascii_case(&other.locator),
        }
    }
}

/// Component-wise containment in either direction. Windows paths compare without case.
fn paths_nest(a: &str, b: &str, fold_case: bool) -> bool {
    if fold_case {
        let a = PathBuf::from(a.to_ascii_lowercase());
        let b = PathBuf::from(b.to_ascii_lowercase());
        a.starts_with(&b) || b.starts_with(&a)
    } else {
        let a = Path::new(a);
        let b = Path::new(b);
        a.starts_with(b) || b.starts_with(a)
    }
}

fn normalize_key(key: &str) -> String {
    key.trim_end_matches('\\').replace('/', "\\").to_ascii_lowercase()
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.locator)
    }
}

/// Lifecycle state of a mutation as tracked by the orchestrator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationState {
    #[default]
    NotRun,
    Simulated,
    Applied,
    Reverted,
    Failed,
    /// Applied, but the backup needed to revert is missing or corrupt.
    Degraded,
}

impl MutationState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MutationState::NotRun => "not_run",
            MutationState::Simulated => "simulated",
            MutationState::Applied => "applied",
            MutationState::Reverted => "reverted",
            MutationState::Failed => "failed",
            MutationState::Degraded => "degraded",
        }
    }
}

impl std::fmt::Display for MutationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How noticeable a mutation's effect is to the user.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactLevel {
    #[default]
    Low,
    Medium,
    High,
}

/// Per-mutation metadata, attached to each implementation as static data.
#[derive(Clone, Debug)]
pub struct MutationDescriptor {
    pub id: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub category: &'static str,
    pub impact: ImpactLevel,
    /// Rough wall-clock time of one apply, for display.
    pub estimated_time: Duration,
    pub requires_admin: bool,
    pub requires_reboot: bool,
    /// Free space the mutation itself needs on the backup volume, in bytes.
    pub min_free_bytes: u64,
    /// Deadline for a single apply/revert call; the policy default applies when `None`.
    pub timeout: Option<Duration>,
}

impl MutationDescriptor {
    #[must_use]
    pub const fn new(id: &'static str, display_name: &'static str, category: &'static str) -> Self {
        Self {
            id,
            display_name,
            description: "",
            category,
            impact: ImpactLevel::Low,
            estimated_time: Duration::ZERO,
            requires_admin: false,
            requires_reboot: false,
            min_free_bytes: 0,
            timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_paths_overlap() {
        let a = Resource::file("/tmp/cache");
        let b = Resource::file("/tmp/cache/sub");
        let c = Resource::file("/tmp/cache2");
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn drive_paths_overlap_regardless_of_case_when_folding() {
        assert!(paths_nest("C:/Temp", "c:/temp/x", true));
        assert!(paths_nest("c:/temp/x", "C:/TEMP", true));
        assert!(!paths_nest("C:/Temp", "c:/temp/x", false));
        assert!(!paths_nest("C:/Temp", "c:/temp2", true));
    }

    #[test]
    fn registry_keys_overlap_on_component_boundary() {
        let a = Resource::registry(r"HKCU\Software\Microsoft\GameBar");
        let b = Resource::registry(r"hkcu\software\microsoft\gamebar\Settings");
        let c = Resource::registry(r"HKCU\Software\Microsoft\GameBarPresenceWriter");
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn services_compare_case_insensitively_and_kinds_never_mix() {
        let a = Resource::service("Dnscache");
        let b = Resource::service("dnscache");
        let c = Resource::custom("dnscache");
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }
}
