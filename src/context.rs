//! Process-wide engine context: resolved paths and the global concurrency limiter.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::constants::APP_DIR_NAME;
use crate::policy::Policy;
use crate::types::errors::{Error, ErrorKind, Result};

/// Built once at startup and shared by the orchestrator, validator and backup manager.
#[derive(Clone, Debug)]
pub struct EngineContext {
    pub app_root: PathBuf,
    pub backup_root: PathBuf,
    pub log_path: PathBuf,
    pub state_path: PathBuf,
    pub lock_path: PathBuf,
    pub(crate) limiter: Arc<Semaphore>,
}

impl EngineContext {
    /// Context rooted at `root`. Directories are created on first use.
    #[must_use]
    pub fn new(root: &Path, policy: &Policy) -> Self {
        Self {
            app_root: root.to_path_buf(),
            backup_root: root.join("backups"),
            log_path: root.join("logs").join("audit.jsonl"),
            state_path: root.join("state.json"),
            lock_path: root.join("tweakyard.lock"),
            limiter: Arc::new(Semaphore::new(policy.concurrency.max_in_flight.max(1))),
        }
    }

    /// Context rooted under the platform's local data directory
    /// (`%LOCALAPPDATA%\Tweakyard` on Windows).
    ///
    /// # Errors
    ///
    /// Returns `ErrorKind::NotFound` when the platform exposes no local data directory.
    pub fn default_location(policy: &Policy) -> Result<Self> {
        let base = dirs::data_local_dir()
            .ok_or_else(|| Error::new(ErrorKind::NotFound, "no local data directory"))?;
        Ok(Self::new(&base.join(APP_DIR_NAME), policy))
    }

    /// Create the application root and its fixed subdirectories.
    ///
    /// # Errors
    ///
    /// Returns an IO error if a directory cannot be created.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.backup_root)?;
        if let Some(logs) = self.log_path.parent() {
            std::fs::create_dir_all(logs)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.limiter.available_permits()
    }
}
