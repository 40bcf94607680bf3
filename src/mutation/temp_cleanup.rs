use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde_json::json;

use super::{CancellationToken, Mutation};
use crate::api::errors::ErrorId;
use crate::types::{BackupRecord, MutationDescriptor, OperationResult, Resource};

const DESCRIPTOR: MutationDescriptor = MutationDescriptor {
    description: "Deletes files left behind in temporary directories to free disk space.",
    estimated_time: Duration::from_secs(30),
    ..MutationDescriptor::new("clean-temp", "Clean Temporary Files", "Storage")
};

/// Deletes files from a set of temporary directories, optionally only those older
/// than `max_age`. Empty subdirectories are removed afterwards; the roots are kept.
pub struct TempCleanup {
    dirs: Vec<PathBuf>,
    resources: Vec<Resource>,
    max_age: Option<Duration>,
}

impl TempCleanup {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        let resources = dirs.iter().map(Resource::file).collect();
        Self {
            dirs,
            resources,
            max_age: None,
        }
    }

    /// Cleanup of the current user's temporary directory.
    #[must_use]
    pub fn user_temp() -> Self {
        Self::new(vec![std::env::temp_dir()])
    }

    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    fn eligible(&self, md: &std::fs::Metadata, now: SystemTime) -> bool {
        let Some(max_age) = self.max_age else {
            return true;
        };
        md.modified()
            .ok()
            .and_then(|m| now.duration_since(m).ok())
            .is_some_and(|age| age > max_age)
    }
}

#[derive(Default)]
struct Tally {
    files: u64,
    bytes: u64,
    errors: Vec<String>,
}

fn walk_size(
    cleanup: &TempCleanup,
    dir: &Path,
    now: SystemTime,
    tally: &mut Tally,
) -> io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let md = std::fs::symlink_metadata(entry.path())?;
        if md.is_dir() {
            walk_size(cleanup, &entry.path(), now, tally)?;
        } else if cleanup.eligible(&md, now) {
            tally.files += 1;
            tally.bytes += md.len();
        }
    }
    Ok(())
}

fn walk_delete(
    cleanup: &TempCleanup,
    dir: &Path,
    now: SystemTime,
    cancel: &CancellationToken,
    tally: &mut Tally,
) {
    let rd = match std::fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) => {
            tally.errors.push(format!("{}: {e}", dir.display()));
            return;
        }
    };
    for entry in rd {
        if cancel.is_cancelled() {
            return;
        }
        let path = match entry {
            Ok(e) => e.path(),
            Err(e) => {
                tally.errors.push(format!("{}: {e}", dir.display()));
                continue;
            }
        };
        let md = match std::fs::symlink_metadata(&path) {
            Ok(md) => md,
            Err(e) => {
                tally.errors.push(format!("{}: {e}", path.display()));
                continue;
            }
        };
        if md.is_dir() {
            walk_delete(cleanup, &path, now, cancel, tally);
            // Only directories emptied by this pass (or already empty) go away.
            if std::fs::read_dir(&path).is_ok_and(|mut rd| rd.next().is_none()) {
                if let Err(e) = std::fs::remove_dir(&path) {
                    tally.errors.push(format!("{}: {e}", path.display()));
                }
            }
        } else if cleanup.eligible(&md, now) {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    tally.files += 1;
                    tally.bytes += md.len();
                }
                Err(e) => tally.errors.push(format!("{}: {e}", path.display())),
            }
        }
    }
}

fn mb(bytes: u64) -> f64 {
    (bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
}

impl Mutation for TempCleanup {
    fn descriptor(&self) -> &MutationDescriptor {
        &DESCRIPTOR
    }

    fn resources(&self) -> &[Resource] {
        &self.resources
    }

    fn simulate(&self) -> OperationResult {
        let now = SystemTime::now();
        let mut tally = Tally::default();
        let mut locations = Vec::new();
        for dir in &self.dirs {
            if !dir.is_dir() {
                continue;
            }
            if let Err(e) = walk_size(self, dir, now, &mut tally) {
                tally.errors.push(format!("{}: {e}", dir.display()));
            }
            locations.push(dir.display().to_string());
        }
        OperationResult::ok(format!(
            "{} files ({} MB) can be removed",
            tally.files,
            mb(tally.bytes)
        ))
        .with_details(json!({
            "total_size_bytes": tally.bytes,
            "total_size_mb": mb(tally.bytes),
            "file_count": tally.files,
            "locations": locations,
            "unreadable": tally.errors,
        }))
    }

    fn apply(&self, cancel: &CancellationToken) -> OperationResult {
        let now = SystemTime::now();
        let mut tally = Tally::default();
        for dir in &self.dirs {
            if cancel.is_cancelled() {
                break;
            }
            if dir.is_dir() {
                walk_delete(self, dir, now, cancel, &mut tally);
            }
        }
        let details = json!({
            "bytes_freed": tally.bytes,
            "freed_mb": mb(tally.bytes),
            "files_deleted": tally.files,
            "errors": tally.errors,
        });
        if cancel.is_cancelled() {
            return OperationResult::failure(ErrorId::E_CANCELLED, "temp cleanup interrupted")
                .with_details(details);
        }
        if !tally.errors.is_empty() {
            return OperationResult::mutation_failure(format!(
                "{} entries could not be removed",
                tally.errors.len()
            ))
            .with_details(details);
        }
        OperationResult::ok(format!("Freed {} MB", mb(tally.bytes))).with_details(details)
    }

    fn revert(&self, _record: &BackupRecord) -> OperationResult {
        // The engine restores the captured trees; nothing else to reconcile.
        OperationResult::ok("temporary files restored")
    }
}
