use std::path::Path;

use crate::adapters::snapshot::fs::DATA_NAME;
use crate::fs::meta::digest_path;
use crate::types::{ManifestEntry, PriorState, ResourceKind};

/// Whether the live file resource already matches its captured state, in which case
/// restoring it would be a no-op. Opaque kinds are never short-circuited.
#[must_use]
pub fn already_restored(entry: &ManifestEntry, payload: &Path) -> bool {
    if entry.kind != ResourceKind::File {
        return false;
    }
    let live = Path::new(&entry.locator);
    let md = std::fs::symlink_metadata(live);
    match entry.prior {
        PriorState::Absent => md.is_err(),
        PriorState::File | PriorState::Dir => {
            let kind_matches = md.is_ok_and(|m| m.is_dir() == (entry.prior == PriorState::Dir));
            kind_matches
                && match (digest_path(live), digest_path(&payload.join(DATA_NAME))) {
                    (Ok(a), Ok(b)) => a == b,
                    _ => false,
                }
        }
        PriorState::Captured => false,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::adapters::snapshot::{FsSnapshotter, Snapshotter};
    use crate::types::Resource;

    #[test]
    fn unchanged_file_is_already_restored() {
        let live = tempfile::tempdir().unwrap();
        let store = tempfile::tempdir().unwrap();
        let target = live.path().join("f");
        std::fs::write(&target, b"same").unwrap();
        let res = Resource::file(&target);
        let payload = store.path().join("0");
        let prior = FsSnapshotter.capture(&res, &payload).unwrap();
        let entry = ManifestEntry {
            kind: ResourceKind::File,
            locator: res.locator.clone(),
            prior,
            payload: "0".into(),
            checksum: String::new(),
            size_bytes: 4,
        };
        assert!(already_restored(&entry, &payload));
        std::fs::write(&target, b"different").unwrap();
        assert!(!already_restored(&entry, &payload));
    }
}
