use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use log::Level;

use crate::adapters::{
    FileLockManager, HostProbe, LockManager, SnapshotRegistry, Snapshotter, SystemProbe,
};
use crate::context::EngineContext;
use crate::fs::backup::BackupStore;
use crate::logging::{AuditSink, FactsEmitter, FactsTee, JsonlSink};
use crate::mutation::Mutation;
use crate::policy::Policy;
use crate::preflight::{check_registration, check_reserved};

use super::errors::ApiError;
use super::registry::MutationRegistry;
use super::state::StateLedger;
use super::txn::InFlight;
use super::{recovery, Engine, Tweakyard};

/// Builder for constructing a Tweakyard with ergonomic chaining.
///
/// Defaults: the platform application root, the host probe, the built-in snapshotters and an
/// exclusive file lock on `<app-root>/tweakyard.lock`.
pub struct ApiBuilder<E: FactsEmitter, A: AuditSink> {
    facts: E,
    audit: A,
    policy: Policy,
    root: Option<PathBuf>,
    mutations: Vec<Arc<dyn Mutation>>,
    probe: Option<Box<dyn SystemProbe>>,
    snapshots: SnapshotRegistry,
    lock: Option<Box<dyn LockManager>>,
}

impl<E: FactsEmitter + 'static, A: AuditSink + 'static> ApiBuilder<E, A> {
    pub fn new(facts: E, audit: A, policy: Policy) -> Self {
        Self {
            facts,
            audit,
            policy,
            root: None,
            mutations: Vec::new(),
            probe: None,
            snapshots: SnapshotRegistry::with_defaults(),
            lock: None,
        }
    }

    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    #[must_use]
    pub fn with_mutation(mut self, m: impl Mutation + 'static) -> Self {
        self.mutations.push(Arc::new(m));
        self
    }

    #[must_use]
    pub fn with_mutations(mut self, ms: impl IntoIterator<Item = Arc<dyn Mutation>>) -> Self {
        self.mutations.extend(ms);
        self
    }

    #[must_use]
    pub fn with_probe(mut self, probe: Box<dyn SystemProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Register (or replace) the snapshotter for its resource kind.
    #[must_use]
    pub fn with_snapshotter(mut self, s: Arc<dyn Snapshotter>) -> Self {
        self.snapshots.register(s);
        self
    }

    #[must_use]
    pub fn with_lock_manager(mut self, lock: Box<dyn LockManager>) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Resolve the application root, validate registrations, take the root lock, clear
    /// interrupted captures and reconcile the ledger with the store.
    ///
    /// # Errors
    ///
    /// `ApiError::ConflictingResource` or `ApiError::Config` for bad registrations (including
    /// a file resource overlapping the application root),
    /// `ApiError::LockingTimeout` when another engine holds the root, `ApiError::Filesystem`
    /// when the root cannot be prepared.
    pub fn build(self) -> Result<Tweakyard<E, A>, ApiError> {
        let ctx = match &self.root {
            Some(root) => EngineContext::new(root, &self.policy),
            None => EngineContext::default_location(&self.policy)
                .map_err(|e| ApiError::Config(e.msg))?,
        };
        let refs: Vec<&dyn Mutation> = self.mutations.iter().map(|m| &**m).collect();
        check_registration(&refs)?;
        ctx.ensure_dirs().map_err(|e| {
            ApiError::Filesystem(format!("prepare {}: {e}", ctx.app_root.display()))
        })?;
        check_reserved(&refs, &ctx.app_root)?;

        let lock = self
            .lock
            .unwrap_or_else(|| Box::new(FileLockManager::new(ctx.lock_path.clone())));
        let guard = lock
            .acquire_process_lock(self.policy.lock_timeout_ms)
            .map_err(|e| ApiError::LockingTimeout(e.msg))?;

        let store = BackupStore::new(ctx.backup_root.clone());
        match store.sweep_staging() {
            Ok(0) => {}
            Ok(n) => self.audit.log(
                Level::Warn,
                &format!("removed {n} interrupted capture(s) from staging"),
            ),
            Err(e) => self
                .audit
                .log(Level::Warn, &format!("staging sweep failed: {e}")),
        }
        let journal = JsonlSink::open(&ctx.log_path).map_err(|e| {
            ApiError::Filesystem(format!("open {}: {e}", ctx.log_path.display()))
        })?;
        let ledger = StateLedger::load(&ctx.state_path);

        let engine = Engine {
            facts: FactsTee {
                caller: self.facts,
                journal,
            },
            audit: self.audit,
            policy: self.policy,
            ctx,
            store,
            snapshots: self.snapshots,
            probe: self.probe.unwrap_or_else(|| Box::new(HostProbe)),
            registry: MutationRegistry::new(self.mutations),
            ledger,
            in_flight: InFlight::default(),
            verified: Mutex::default(),
            _lock: guard,
        };
        recovery::reconcile(&engine);
        Ok(Tweakyard {
            inner: Arc::new(engine),
        })
    }
}
