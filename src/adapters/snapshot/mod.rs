//! Per-resource-kind capture/restore strategies.
//!
//! A snapshotter writes the point-in-time state of one resource to a payload path chosen by
//! the backup manager, and later re-applies that payload. It never decides where payloads
//! live or how they are checksummed.
use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use crate::constants::OPAQUE_CAPTURE_ESTIMATE;
use crate::types::{PriorState, Resource, ResourceKind};

pub mod command;
pub mod fs;

pub use command::{PowerPlanSnapshotter, RegistrySnapshotter, ServiceSnapshotter};
pub use fs::FsSnapshotter;

pub trait Snapshotter: Send + Sync {
    fn kind(&self) -> ResourceKind;

    /// Write the current state of `resource` to `payload` (a file or directory the
    /// snapshotter creates) and report what existed.
    fn capture(&self, resource: &Resource, payload: &Path) -> io::Result<PriorState>;

    /// Bring `resource` back to the state recorded in `payload`.
    fn restore(&self, resource: &Resource, payload: &Path, prior: PriorState) -> io::Result<()>;

    /// Bytes a capture is expected to need on the backup volume.
    fn estimate_size(&self, _resource: &Resource) -> u64 {
        OPAQUE_CAPTURE_ESTIMATE
    }
}

/// Snapshotters keyed by the kind they handle.
#[derive(Clone)]
pub struct SnapshotRegistry {
    by_kind: HashMap<ResourceKind, Arc<dyn Snapshotter>>,
}

impl SnapshotRegistry {
    /// Registry with no snapshotters at all.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            by_kind: HashMap::new(),
        }
    }

    /// File, Registry, Service and PowerPlan snapshotters. `Custom` must be registered.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut r = Self::empty();
        r.register(Arc::new(FsSnapshotter));
        r.register(Arc::new(RegistrySnapshotter));
        r.register(Arc::new(ServiceSnapshotter));
        r.register(Arc::new(PowerPlanSnapshotter));
        r
    }

    /// Register (or replace) the snapshotter for its kind.
    pub fn register(&mut self, s: Arc<dyn Snapshotter>) {
        self.by_kind.insert(s.kind(), s);
    }

    #[must_use]
    pub fn get(&self, kind: ResourceKind) -> Option<&Arc<dyn Snapshotter>> {
        self.by_kind.get(&kind)
    }

    /// Snapshotter for `kind`, or an `Unsupported` error naming it.
    ///
    /// # Errors
    ///
    /// Returns `io::ErrorKind::Unsupported` if nothing is registered for `kind`.
    pub fn require(&self, kind: ResourceKind) -> io::Result<&Arc<dyn Snapshotter>> {
        self.get(kind).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::Unsupported,
                format!("no snapshotter registered for {kind}"),
            )
        })
    }
}

impl Default for SnapshotRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_everything_but_custom() {
        let r = SnapshotRegistry::with_defaults();
        for kind in ResourceKind::ALL {
            assert_eq!(r.get(kind).is_some(), kind != ResourceKind::Custom, "{kind}");
        }
        assert_eq!(
            r.require(ResourceKind::Custom).err().map(|e| e.kind()),
            Some(io::ErrorKind::Unsupported)
        );
    }
}
