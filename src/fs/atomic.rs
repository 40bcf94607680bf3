//! Atomic replace primitives.
//!
//! Every replacement goes through a uniquely named temporary sibling in the destination
//! directory followed by `rename`, so readers observe either the old or the new content,
//! never a partial write. The parent directory is fsynced afterwards on platforms that allow it.
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::constants::TMP_SUFFIX;

// Global counter to produce unique temporary names within a process.
static NEXT_TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Temporary sibling path for `target`: `.{fname}.{pid}.{ctr}{TMP_SUFFIX}`.
#[must_use]
pub fn tmp_sibling(target: &Path) -> PathBuf {
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    let fname = target
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("target");
    let pid = std::process::id();
    let ctr = NEXT_TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    parent.join(format!(".{fname}.{pid}.{ctr}{TMP_SUFFIX}"))
}

/// Fsync the parent directory of `path` for durability.
///
/// # Errors
///
/// Returns an IO error if the parent directory cannot be opened or fsynced. On Windows
/// directories cannot be opened for sync and this is a no-op.
pub fn fsync_parent_dir(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    if let Some(parent) = path.parent() {
        let dir = fs::File::open(parent)?;
        dir.sync_all()?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Write `bytes` to `target` atomically: temp sibling, fsync, rename, fsync parent.
///
/// # Errors
///
/// Returns an IO error if any step fails; the temporary file is removed on failure.
pub fn write_atomic(target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = tmp_sibling(target);
    let res = (|| {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
        drop(f);
        fs::rename(&tmp, target)
    })();
    if res.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    res?;
    let _ = fsync_parent_dir(target);
    Ok(())
}

/// Replace `target` with a byte copy of `source`, going through a temp sibling of `target`.
/// A directory at `target` is removed first.
///
/// # Errors
///
/// Returns an IO error if the copy or the rename fails.
pub fn replace_file_from(source: &Path, target: &Path) -> std::io::Result<()> {
    let tmp = tmp_sibling(target);
    if let Err(e) = fs::copy(source, &tmp).and_then(|_| fs::File::open(&tmp)?.sync_all()) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    if fs::symlink_metadata(target).is_ok_and(|m| m.is_dir()) {
        if let Err(e) = fs::remove_dir_all(target) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
    }
    if let Err(e) = fs::rename(&tmp, target) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    let _ = fsync_parent_dir(target);
    Ok(())
}

/// Remove whatever is at `path` (file, symlink or directory tree). Missing is success.
///
/// # Errors
///
/// Returns an IO error if removal fails for any reason other than absence.
pub fn remove_any(path: &Path) -> std::io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(md) if md.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
