use std::io;
use std::path::Path;

use super::Snapshotter;
use crate::fs::atomic::{fsync_parent_dir, remove_any, replace_file_from};
use crate::fs::meta::{copy_link, copy_tree, tree_size};
use crate::types::{PriorState, Resource, ResourceKind};

/// Name of the captured file or tree inside a file payload directory.
pub const DATA_NAME: &str = "data";

/// Captures files and directory trees by copy. Restores replace each file through a
/// sibling temporary and rename, then delete entries the capture did not contain.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsSnapshotter;

impl Snapshotter for FsSnapshotter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::File
    }

    fn capture(&self, resource: &Resource, payload: &Path) -> io::Result<PriorState> {
        let target = Path::new(&resource.locator);
        std::fs::create_dir_all(payload)?;
        let md = match std::fs::symlink_metadata(target) {
            Ok(md) => md,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(PriorState::Absent),
            Err(e) => return Err(e),
        };
        let data = payload.join(DATA_NAME);
        if md.file_type().is_symlink() {
            copy_link(target, &data)?;
            Ok(PriorState::File)
        } else if md.is_dir() {
            copy_tree(target, &data)?;
            Ok(PriorState::Dir)
        } else {
            std::fs::copy(target, &data)?;
            Ok(PriorState::File)
        }
    }

    fn restore(&self, resource: &Resource, payload: &Path, prior: PriorState) -> io::Result<()> {
        let target = Path::new(&resource.locator);
        let data = payload.join(DATA_NAME);
        match prior {
            PriorState::Absent => remove_any(target),
            PriorState::File => restore_entry(&data, target),
            PriorState::Dir => restore_tree(&data, target),
            PriorState::Captured => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "file payloads are never opaque",
            )),
        }
    }

    fn estimate_size(&self, resource: &Resource) -> u64 {
        tree_size(Path::new(&resource.locator))
    }
}

/// Put a captured file or symlink back at `target`.
fn restore_entry(source: &Path, target: &Path) -> io::Result<()> {
    if std::fs::symlink_metadata(source)?.file_type().is_symlink() {
        remove_any(target)?;
        copy_link(source, target)?;
        let _ = fsync_parent_dir(target);
        Ok(())
    } else {
        replace_file_from(source, target)
    }
}

/// Make `target` a byte-identical copy of `source`, file by file.
fn restore_tree(source: &Path, target: &Path) -> io::Result<()> {
    if std::fs::symlink_metadata(target).is_ok_and(|m| !m.is_dir()) {
        remove_any(target)?;
    }
    std::fs::create_dir_all(target)?;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let from = entry.path();
        let to = target.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            restore_tree(&from, &to)?;
        } else {
            restore_entry(&from, &to)?;
        }
    }
    // Entries created after the capture.
    for entry in std::fs::read_dir(target)? {
        let entry = entry?;
        if std::fs::symlink_metadata(source.join(entry.file_name())).is_err() {
            remove_any(&entry.path())?;
        }
    }
    let _ = fsync_parent_dir(target);
    Ok(())
}
