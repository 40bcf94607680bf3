// Facade for the engine; each transaction kind lives in its own submodule under src/api/.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::Level;
use tokio::sync::OwnedSemaphorePermit;
use uuid::Uuid;

use crate::adapters::{LockGuard, SnapshotRegistry, SystemProbe};
use crate::context::EngineContext;
use crate::fs::backup::{BackupManager, BackupStore};
use crate::logging::{AuditCtx, AuditSink, FactsEmitter, FactsTee};
use crate::mutation::{CancellationToken, Mutation};
use crate::policy::Policy;
use crate::preflight::Validator;
use crate::types::ids::{is_safe_component, new_txn_id};
use crate::types::{
    BackupPreview, BackupRecord, MutationState, MutationStatus, OperationResult, Phase,
    PruneResult,
};

mod apply;
mod builder;
pub mod errors;
mod purge;
mod recovery;
mod registry;
mod revert;
mod simulate;
mod state;
mod txn;

pub use builder::ApiBuilder;
pub use errors::{exit_code_for, id_str, ApiError, ErrorId};
pub use state::LedgerEntry;
pub use txn::TransactionHandle;

use registry::MutationRegistry;
use state::StateLedger;
use txn::InFlight;

/// The transaction engine. Cheap to clone; clones share one engine.
pub struct Tweakyard<E: FactsEmitter + 'static, A: AuditSink + 'static> {
    inner: Arc<Engine<E, A>>,
}

impl<E: FactsEmitter + 'static, A: AuditSink + 'static> Clone for Tweakyard<E, A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub(crate) struct Engine<E, A> {
    pub(crate) facts: FactsTee<E>,
    pub(crate) audit: A,
    pub(crate) policy: Policy,
    pub(crate) ctx: EngineContext,
    pub(crate) store: BackupStore,
    pub(crate) snapshots: SnapshotRegistry,
    pub(crate) probe: Box<dyn SystemProbe>,
    pub(crate) registry: MutationRegistry,
    pub(crate) ledger: StateLedger,
    pub(crate) in_flight: InFlight,
    /// Verification outcome per backup id, filled on first use.
    pub(crate) verified: Mutex<HashMap<String, bool>>,
    pub(crate) _lock: Box<dyn LockGuard>,
}

impl<E: FactsEmitter, A: AuditSink> Engine<E, A> {
    pub(crate) const fn manager(&self) -> BackupManager<'_> {
        BackupManager::new(&self.store, &self.snapshots)
    }

    pub(crate) fn validator(&self) -> Validator<'_> {
        Validator {
            policy: &self.policy,
            probe: self.probe.as_ref(),
            backup_root: &self.ctx.backup_root,
        }
    }

    pub(crate) fn audit_ctx(&self, txn_id: Uuid, mutation_id: &str) -> AuditCtx<'_> {
        AuditCtx::new(&self.facts, txn_id.to_string(), mutation_id.to_string())
    }

    pub(crate) fn mutation(&self, id: &str) -> Result<Arc<dyn Mutation>, ApiError> {
        self.registry
            .get(id)
            .ok_or_else(|| ApiError::UnknownMutation(id.to_string()))
    }

    /// Best-effort removal of a record no ledger entry will reference.
    pub(crate) fn discard(&self, record: &BackupRecord) {
        if let Err(e) = self.manager().purge(record) {
            self.audit
                .log(Level::Warn, &format!("discard {}: {e}", record.id));
        }
    }

    /// Wait for a slot under the global `max_in_flight` cap.
    pub(crate) async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit, ApiError> {
        Arc::clone(&self.ctx.limiter)
            .acquire_owned()
            .await
            .map_err(|e| ApiError::Config(format!("concurrency limiter closed: {e}")))
    }

    /// Deadline for one apply or revert of `m`.
    pub(crate) fn deadline(&self, m: &dyn Mutation) -> Duration {
        m.descriptor()
            .timeout
            .unwrap_or_else(|| self.policy.default_timeout())
    }

    /// Whether `backup_id` is committed and its payloads match their checksums. A record
    /// is checksummed once per process; capture and revert verification update the cache.
    pub(crate) fn intact(&self, backup_id: &str) -> bool {
        if !self.store.is_present(backup_id) {
            return false;
        }
        let mut cache = match self.verified.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(ok) = cache.get(backup_id) {
            return *ok;
        }
        let ok = self
            .store
            .read_record(backup_id)
            .is_ok_and(|r| self.manager().verify(&r).is_ok());
        cache.insert(backup_id.to_string(), ok);
        ok
    }

    pub(crate) fn note_verified(&self, backup_id: &str, ok: bool) {
        let mut cache = match self.verified.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        cache.insert(backup_id.to_string(), ok);
    }

    pub(crate) fn status(&self, m: &dyn Mutation) -> MutationStatus {
        let d = m.descriptor();
        let entry = self.ledger.get(d.id);
        let mut state = entry.state;
        if state == MutationState::Applied
            && !entry.backup_id.as_deref().is_some_and(|b| self.intact(b))
        {
            state = MutationState::Degraded;
        }
        MutationStatus {
            id: d.id.to_string(),
            display_name: d.display_name.to_string(),
            description: d.description.to_string(),
            category: d.category.to_string(),
            impact: d.impact,
            estimated_time_secs: d.estimated_time.as_secs(),
            state,
            backup_id: entry.backup_id,
            reboot_pending: entry.reboot_pending,
            in_flight: self.in_flight.contains(d.id),
            last_result: entry.last_result,
        }
    }
}

impl<E: FactsEmitter + 'static, A: AuditSink + 'static> Tweakyard<E, A> {
    /// Start building an engine. Nothing touches the disk until `build()`.
    pub fn builder(facts: E, audit: A, policy: Policy) -> ApiBuilder<E, A> {
        ApiBuilder::new(facts, audit, policy)
    }

    #[must_use]
    pub fn context(&self) -> &EngineContext {
        &self.inner.ctx
    }

    #[must_use]
    pub fn policy(&self) -> &Policy {
        &self.inner.policy
    }

    /// Every registered mutation with its current state, in registration order.
    #[must_use]
    pub fn list_mutations(&self) -> Vec<MutationStatus> {
        self.inner
            .registry
            .iter()
            .map(|m| self.inner.status(m.as_ref()))
            .collect()
    }

    /// # Errors
    ///
    /// Returns `ApiError::UnknownMutation` if `id` is not registered.
    pub fn state(&self, id: &str) -> Result<MutationStatus, ApiError> {
        let m = self.inner.mutation(id)?;
        Ok(self.inner.status(m.as_ref()))
    }

    /// Preview `id` without changing anything. The preflight assessment is attached under
    /// the `preflight` detail.
    pub async fn simulate(&self, id: &str) -> OperationResult {
        let txn_id = new_txn_id();
        match self.inner.mutation(id) {
            Ok(m) => simulate::run(Arc::clone(&self.inner), m, txn_id).await,
            Err(e) => self.rejected(txn_id, id, Phase::Simulate, &e),
        }
    }

    /// Apply `id` and wait for the terminal result.
    pub async fn apply(&self, id: &str) -> OperationResult {
        match self.spawn_apply(id) {
            Ok(h) => h.wait().await,
            Err(e) => self.rejected(new_txn_id(), id, Phase::Apply, &e),
        }
    }

    /// Start an apply of `id` on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::UnknownMutation`, `ApiError::TransactionInProgress` when another
    /// transaction for `id` is in flight, or `ApiError::Config` outside a Tokio runtime.
    pub fn spawn_apply(&self, id: &str) -> Result<TransactionHandle, ApiError> {
        let m = self.inner.mutation(id)?;
        let rt = current_runtime()?;
        let claim = self.inner.in_flight.claim(id)?;
        let txn_id = new_txn_id();
        let cancel = CancellationToken::new();
        let join = rt.spawn(apply::run(
            Arc::clone(&self.inner),
            m,
            txn_id,
            cancel.clone(),
            claim,
        ));
        Ok(TransactionHandle {
            mutation_id: id.to_string(),
            txn_id,
            cancel,
            join,
        })
    }

    /// Revert `id` from its most recent apply record and wait for the terminal result.
    pub async fn revert(&self, id: &str) -> OperationResult {
        match self.spawn_revert(id) {
            Ok(h) => h.wait().await,
            Err(e) => self.rejected(new_txn_id(), id, Phase::Revert, &e),
        }
    }

    /// Start a revert of `id` on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Same as [`Tweakyard::spawn_apply`].
    pub fn spawn_revert(&self, id: &str) -> Result<TransactionHandle, ApiError> {
        let m = self.inner.mutation(id)?;
        let rt = current_runtime()?;
        let claim = self.inner.in_flight.claim(id)?;
        let txn_id = new_txn_id();
        let cancel = CancellationToken::new();
        let join = rt.spawn(revert::run(
            Arc::clone(&self.inner),
            m,
            txn_id,
            cancel.clone(),
            claim,
        ));
        Ok(TransactionHandle {
            mutation_id: id.to_string(),
            txn_id,
            cancel,
            join,
        })
    }

    /// Committed records of `mutation_id`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::UnknownMutation` if `mutation_id` is not a usable name.
    pub fn list_backups(&self, mutation_id: &str) -> Result<Vec<BackupRecord>, ApiError> {
        if !is_safe_component(mutation_id) {
            return Err(ApiError::UnknownMutation(mutation_id.to_string()));
        }
        Ok(self.inner.store.list(mutation_id))
    }

    /// Delete one record. Refused while an applied mutation still depends on it.
    /// The result reports how many audit entries reference the record under
    /// `audit_references`.
    pub fn purge_backup(&self, backup_id: &str) -> OperationResult {
        purge::purge_backup(&self.inner, backup_id)
    }

    /// Retention pass over the records of `mutation_id`. The newest record and the one the
    /// mutation's ledger entry references are always kept.
    ///
    /// # Errors
    ///
    /// `ApiError::TransactionInProgress` while `mutation_id` has a transaction in flight,
    /// `ApiError::Filesystem` if a selected record cannot be deleted.
    pub fn prune_backups(
        &self,
        mutation_id: &str,
        count_limit: Option<usize>,
        age_limit: Option<Duration>,
    ) -> Result<PruneResult, ApiError> {
        purge::prune_backups(&self.inner, mutation_id, count_limit, age_limit)
    }

    /// # Errors
    ///
    /// `ApiError::BackupMissing` if no record exists for `backup_id`, `ApiError::CorruptBackup`
    /// if its manifest cannot be parsed.
    pub fn backup_preview(&self, backup_id: &str) -> Result<BackupPreview, ApiError> {
        let record = self.inner.store.read_record(backup_id)?;
        Ok(self.inner.manager().preview(&record))
    }

    fn rejected(
        &self,
        txn_id: Uuid,
        id: &str,
        phase: Phase,
        e: &ApiError,
    ) -> OperationResult {
        let r = OperationResult::from_error(e);
        let actx = self.inner.audit_ctx(txn_id, id);
        crate::logging::StageLogger::new(&actx)
            .phase(phase)
            .step("admit")
            .result(&r)
            .emit_failure();
        self.inner
            .audit
            .log(Level::Warn, &format!("{phase} {id} rejected: {e}"));
        r
    }
}

fn current_runtime() -> Result<tokio::runtime::Handle, ApiError> {
    tokio::runtime::Handle::try_current()
        .map_err(|e| ApiError::Config(format!("no Tokio runtime: {e}")))
}
