//! Transaction plumbing: per-id claims, timed blocking work, and caller handles.
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::api::errors::{ApiError, ErrorId};
use crate::mutation::CancellationToken;
use crate::types::OperationResult;

/// Set of mutation ids with a transaction in flight.
#[derive(Clone, Default)]
pub(crate) struct InFlight {
    ids: Arc<Mutex<HashSet<String>>>,
}

impl InFlight {
    /// Atomically claim `id`; the claim is released when the returned guard drops.
    pub(crate) fn claim(&self, id: &str) -> Result<Claim, ApiError> {
        let mut ids = match self.ids.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !ids.insert(id.to_string()) {
            return Err(ApiError::TransactionInProgress(id.to_string()));
        }
        Ok(Claim(Arc::new(ClaimInner {
            ids: Arc::clone(&self.ids),
            id: id.to_string(),
        })))
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        match self.ids.lock() {
            Ok(g) => g.contains(id),
            Err(poisoned) => poisoned.into_inner().contains(id),
        }
    }
}

/// Exclusive hold on a mutation id. Clones share the hold; the id is released when the
/// last clone drops.
#[derive(Clone)]
pub(crate) struct Claim(Arc<ClaimInner>);

struct ClaimInner {
    ids: Arc<Mutex<HashSet<String>>>,
    id: String,
}

impl Drop for ClaimInner {
    fn drop(&mut self) {
        let mut ids = match self.ids.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        ids.remove(&self.id);
    }
}

pub(crate) enum Timed<T> {
    Done(T),
    /// The deadline passed and the worker stopped within the grace period.
    TimedOut,
    /// The deadline passed and the worker ignored cancellation; it is still running.
    Abandoned(JoinHandle<T>),
    Panicked(String),
}

/// Run `f` on the blocking pool under `deadline`. On expiry `token` is signalled and the
/// worker gets `grace` to stop. A worker that stops in time yields `TimedOut`; one that
/// does not is handed back as `Abandoned`.
pub(crate) async fn run_timed<T, F>(
    deadline: Duration,
    grace: Duration,
    token: &CancellationToken,
    f: F,
) -> Timed<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let mut join = tokio::task::spawn_blocking(f);
    match tokio::time::timeout(deadline, &mut join).await {
        Ok(Ok(v)) => Timed::Done(v),
        Ok(Err(e)) => Timed::Panicked(e.to_string()),
        Err(_) => {
            token.cancel();
            if tokio::time::timeout(grace, &mut join).await.is_ok() {
                return Timed::TimedOut;
            }
            log::warn!("worker still running {}ms after cancellation", grace.as_millis());
            Timed::Abandoned(join)
        }
    }
}

/// Keep `claim` held until an abandoned worker returns, so no new transaction on the same
/// id can run alongside it.
pub(crate) fn hold_until_done<T: Send + 'static>(claim: Claim, worker: JoinHandle<T>) {
    tokio::spawn(async move {
        if let Err(e) = worker.await {
            log::warn!("abandoned worker for {} panicked: {e}", claim.0.id);
        }
        log::info!("abandoned worker for {} finished; releasing it", claim.0.id);
        drop(claim);
    });
}

/// Run `f` on the blocking pool without a deadline.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, String>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| e.to_string())
}

/// Handle to a spawned apply or revert.
///
/// `cancel()` is honored only until the backup capture completes; once the mutation (or
/// restore) has begun the transaction runs to completion.
pub struct TransactionHandle {
    pub(crate) mutation_id: String,
    pub(crate) txn_id: Uuid,
    pub(crate) cancel: CancellationToken,
    pub(crate) join: JoinHandle<OperationResult>,
}

impl TransactionHandle {
    #[must_use]
    pub fn mutation_id(&self) -> &str {
        &self.mutation_id
    }

    #[must_use]
    pub const fn txn_id(&self) -> Uuid {
        self.txn_id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the terminal result.
    pub async fn wait(self) -> OperationResult {
        match self.join.await {
            Ok(r) => r,
            Err(e) => OperationResult::failure(
                ErrorId::E_GENERIC,
                format!("transaction task for {} failed: {e}", self.mutation_id),
            ),
        }
    }
}
