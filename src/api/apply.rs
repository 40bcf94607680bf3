use std::sync::Arc;

use log::Level;
use serde_json::json;
use uuid::Uuid;

use crate::logging::{AuditSink, EventBuilder, FactsEmitter, StageLogger};
use crate::mutation::{CancellationToken, Mutation};
use crate::preflight::Gate;
use crate::types::{BackupRecord, MutationState, OperationResult, Phase};

use super::errors::{id_str, ApiError};
use super::txn::{hold_until_done, run_blocking, run_timed, Claim, Timed};
use super::Engine;

/// Apply transaction: validate, capture, mark in progress, run the mutation under its
/// deadline, and roll back from the fresh record on failure or timeout.
pub(super) async fn run<E: FactsEmitter + 'static, A: AuditSink + 'static>(
    engine: Arc<Engine<E, A>>,
    m: Arc<dyn Mutation>,
    txn_id: Uuid,
    cancel: CancellationToken,
    claim: Claim,
) -> OperationResult {
    let id = m.descriptor().id;
    let actx = engine.audit_ctx(txn_id, id);
    let slog = StageLogger::new(&actx);
    let r = match engine.acquire_permit().await {
        Ok(_permit) => transact(&engine, &m, &cancel, &claim, &slog).await,
        Err(e) => refuse(&engine, slog.apply().step("admit"), &e),
    };
    engine.ledger.record(id, |e| e.last_result = Some(r.clone()));
    r
}

async fn transact<E: FactsEmitter + 'static, A: AuditSink + 'static>(
    engine: &Arc<Engine<E, A>>,
    m: &Arc<dyn Mutation>,
    cancel: &CancellationToken,
    claim: &Claim,
    slog: &StageLogger<'_>,
) -> OperationResult {
    let desc = m.descriptor();
    let id = desc.id;
    if engine.ledger.get(id).state == MutationState::Applied {
        let e = ApiError::InvalidState(format!("{id} is already applied; revert it first"));
        return refuse(engine, slog.apply().step("admit"), &e);
    }

    let validated = run_blocking({
        let engine = Arc::clone(engine);
        let m = Arc::clone(m);
        move || {
            let estimate = engine.manager().estimate(m.resources());
            engine.validator().validate(m.as_ref(), Gate::Apply, estimate)
        }
    })
    .await
    .unwrap_or_else(|p| Err(ApiError::Filesystem(format!("validation worker panicked: {p}"))));
    let report = match validated {
        Ok(r) => r,
        Err(e) => return refuse(engine, slog.apply().step("validate"), &e),
    };
    slog.apply()
        .step("validate")
        .field("estimated_capture_bytes", json!(report.estimated_capture_bytes))
        .field("available_bytes", json!(report.available_bytes))
        .emit_success();

    if cancel.is_cancelled() {
        return refuse(engine, slog.apply().step("validate"), &ApiError::Cancelled);
    }

    let captured = run_blocking({
        let engine = Arc::clone(engine);
        let m = Arc::clone(m);
        move || engine.manager().capture(m.as_ref(), Phase::Apply)
    })
    .await
    .unwrap_or_else(|p| Err(ApiError::BackupCapture(format!("capture worker panicked: {p}"))));
    let record = match captured {
        Ok(r) => r,
        Err(e) => return refuse(engine, slog.apply().step("capture"), &e),
    };
    engine.note_verified(&record.id, true);
    slog.apply()
        .step("capture")
        .backup(&record.id)
        .field("entries", json!(record.entries.len()))
        .field("total_bytes", json!(record.total_bytes()))
        .emit_success();

    if cancel.is_cancelled() {
        engine.discard(&record);
        return refuse(engine, slog.apply().step("capture"), &ApiError::Cancelled);
    }

    let previous = engine.ledger.get(id).backup_id;
    let marked = engine.ledger.update(id, |e| {
        e.backup_id = Some(record.id.clone());
        e.in_progress = Some(Phase::Apply);
    });
    if let Err(err) = marked {
        engine.discard(&record);
        engine.ledger.record(id, |e| {
            e.backup_id = previous;
            e.in_progress = None;
        });
        return refuse(engine, slog.apply().step("capture"), &err);
    }

    slog.apply().step("attempt").backup(&record.id).emit_success();
    let deadline = engine.deadline(m.as_ref());
    let token = CancellationToken::new();
    let outcome = run_timed(deadline, engine.policy.cancel_grace(), &token, {
        let m = Arc::clone(m);
        let token = token.clone();
        move || m.apply(&token)
    })
    .await;

    let (err, base) = match outcome {
        Timed::Done(r) if r.success => {
            engine.ledger.record(id, |e| {
                e.state = MutationState::Applied;
                e.in_progress = None;
                e.reboot_pending = desc.requires_reboot;
            });
            let r = r.with_detail("backup_id", record.id.as_str());
            slog.apply().step("result").backup(&record.id).result(&r).emit_success();
            engine.audit.log(Level::Info, &format!("applied {id}"));
            return r;
        }
        Timed::Done(r) => (ApiError::Apply(r.message.clone()), r),
        Timed::TimedOut => {
            let e = ApiError::Timeout(format!(
                "{id} did not finish within {} ms",
                deadline.as_millis()
            ));
            let r = OperationResult::from_error(&e);
            (e, r)
        }
        Timed::Abandoned(worker) => {
            hold_until_done(claim.clone(), worker);
            let e = ApiError::Timeout(format!(
                "{id} did not finish within {} ms and ignored cancellation",
                deadline.as_millis()
            ));
            return abandon(engine, slog, id, &record.id, &e);
        }
        Timed::Panicked(p) => {
            let e = ApiError::Apply(format!("{id} panicked: {p}"));
            let r = OperationResult::from_error(&e);
            (e, r)
        }
    };
    slog.apply()
        .step("result")
        .backup(&record.id)
        .result(&base)
        .error(err.id())
        .emit_failure();
    rollback(engine, m, slog, &record, &err, base).await
}

/// Restore the record captured for this attempt and mark the mutation `Failed`.
async fn rollback<E: FactsEmitter + 'static, A: AuditSink + 'static>(
    engine: &Arc<Engine<E, A>>,
    m: &Arc<dyn Mutation>,
    slog: &StageLogger<'_>,
    record: &BackupRecord,
    cause: &ApiError,
    base: OperationResult,
) -> OperationResult {
    let id = m.descriptor().id;
    let restored = run_blocking({
        let engine = Arc::clone(engine);
        let m = Arc::clone(m);
        let record = record.clone();
        move || {
            engine
                .manager()
                .restore(&record, m.as_ref(), &CancellationToken::new())
        }
    })
    .await
    .unwrap_or_else(|p| {
        OperationResult::from_error(&ApiError::RestoreFailed(format!("rollback worker panicked: {p}")))
    });

    engine.ledger.record(id, |e| {
        e.state = MutationState::Failed;
        e.in_progress = None;
    });
    let ev: EventBuilder<'_> = slog.rollback().step("restore").backup(&record.id).result(&restored);
    if restored.success {
        ev.emit_success();
        engine
            .audit
            .log(Level::Warn, &format!("apply of {id} failed and was rolled back: {cause}"));
        OperationResult {
            success: false,
            message: cause.to_string(),
            error: Some(cause.id()),
            ..base
        }
        .with_detail("backup_id", record.id.as_str())
        .with_detail("rollback", "succeeded")
    } else {
        ev.emit_failure();
        let e = ApiError::RollbackFailed(format!(
            "{id}: {cause}; rollback from {} failed: {}",
            record.id, restored.message
        ));
        engine.audit.log(Level::Error, &e.to_string());
        OperationResult::from_error(&e)
            .with_details(serde_json::Value::Object(base.details))
            .with_detail("backup_id", record.id.as_str())
            .with_detail("cause", id_str(cause.id()))
            .with_detail("rollback", restored.message)
    }
}

/// The worker is still running after its grace period, so restoring now would race it.
/// The mutation is marked `Failed` with its record kept for a later revert.
pub(super) fn abandon<E: FactsEmitter, A: AuditSink>(
    engine: &Engine<E, A>,
    slog: &StageLogger<'_>,
    id: &str,
    backup_id: &str,
    cause: &ApiError,
) -> OperationResult {
    engine.ledger.record(id, |e| {
        e.state = MutationState::Failed;
        e.in_progress = None;
    });
    let e = ApiError::RollbackFailed(format!(
        "{id}: {cause}; restore from {backup_id} skipped while the worker is still running"
    ));
    let r = OperationResult::from_error(&e)
        .with_detail("backup_id", backup_id)
        .with_detail("cause", id_str(cause.id()))
        .with_detail("rollback", "skipped");
    slog.rollback()
        .step("restore")
        .backup(backup_id)
        .result(&r)
        .emit_failure();
    engine.audit.log(Level::Error, &e.to_string());
    r
}

/// Audit a failure that happened before anything was changed.
pub(super) fn refuse<E: FactsEmitter, A: AuditSink>(
    engine: &Engine<E, A>,
    ev: EventBuilder<'_>,
    e: &ApiError,
) -> OperationResult {
    let r = OperationResult::from_error(e);
    ev.result(&r).emit_failure();
    engine.audit.log(Level::Warn, &format!("refused: {e}"));
    r
}
