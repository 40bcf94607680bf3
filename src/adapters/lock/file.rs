use std::fs::{File, OpenOptions};
use std::io::{Read as _, Seek as _, SeekFrom, Write as _};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use crate::constants::LOCK_POLL_MS;
use crate::types::errors::{Error, ErrorKind, Result};
use fs2::FileExt;

use super::{LockGuard, LockManager};

/// Exclusive advisory lock on `<app-root>/tweakyard.lock`. The holder's pid is written into
/// the file so a blocked caller can report who owns it.
#[derive(Debug)]
pub struct FileLockManager {
    path: PathBuf,
}

impl FileLockManager {
    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Pid recorded by the current (or last) holder, if any.
    #[must_use]
    pub fn holder(&self) -> Option<u32> {
        let mut s = String::new();
        File::open(&self.path).ok()?.read_to_string(&mut s).ok()?;
        s.trim().parse().ok()
    }
}

struct FileGuard {
    file: File,
}

impl Drop for FileGuard {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

impl LockGuard for FileGuard {}

impl LockManager for FileLockManager {
    fn acquire_process_lock(&self, timeout_ms: u64) -> Result<Box<dyn LockGuard>> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let t0 = Instant::now();
        // Not truncated on open: the pid of a live holder must stay readable.
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.path)?;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    file.set_len(0)?;
                    file.seek(SeekFrom::Start(0))?;
                    write!(file, "{}", std::process::id())?;
                    let _ = file.sync_data();
                    return Ok(Box::new(FileGuard { file }));
                }
                Err(_e) => {
                    if t0.elapsed() >= Duration::from_millis(timeout_ms) {
                        let who = self
                            .holder()
                            .map_or_else(String::new, |pid| format!(" (held by pid {pid})"));
                        return Err(Error::new(
                            ErrorKind::Policy,
                            format!("timeout acquiring {}{who}", self.path.display()),
                        ));
                    }
                    thread::sleep(Duration::from_millis(LOCK_POLL_MS));
                }
            }
        }
    }
}
