use std::sync::Arc;

use log::Level;
use serde_json::json;
use uuid::Uuid;

use crate::logging::{AuditSink, FactsEmitter, StageLogger};
use crate::mutation::{CancellationToken, Mutation};
use crate::preflight::Gate;
use crate::types::errors::ErrorKind;
use crate::types::{BackupRecord, MutationState, OperationResult, Phase};

use super::apply::{abandon, refuse};
use super::errors::{id_str, ApiError, ErrorId};
use super::txn::{hold_until_done, run_blocking, run_timed, Claim, Timed};
use super::Engine;

/// Revert transaction: locate and verify the apply record, optionally capture the current
/// state, restore under the deadline, and undo a failed restore from that capture.
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
        Err(e) => refuse(&engine, slog.revert().step("admit"), &e),
    };
    engine.ledger.record(id, |e| e.last_result = Some(r.clone()));
    r
}

/// The record a revert restores from: the ledger's, else the newest apply record.
fn locate<E: FactsEmitter, A: AuditSink>(
    engine: &Engine<E, A>,
    id: &str,
) -> Result<BackupRecord, ApiError> {
    let entry = engine.ledger.get(id);
    if let Some(bid) = entry.backup_id.as_deref() {
        return match engine.store.read_record(bid) {
            Ok(r) => Ok(r),
            Err(e) if e.kind == ErrorKind::NotFound => {
                Err(ApiError::BackupMissing(format!("{id}: backup {bid} no longer exists")))
            }
            Err(e) => Err(ApiError::CorruptBackup(format!("{id}: backup {bid}: {}", e.msg))),
        };
    }
    engine
        .store
        .latest(id, Phase::Apply)
        .ok_or_else(|| ApiError::BackupMissing(format!("{id} has no apply backup to revert")))
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
    let entry = engine.ledger.get(id);
    if entry.state == MutationState::Reverted {
        let mut r = OperationResult::ok(format!("{id} is already reverted"));
        if let Some(b) = entry.backup_id.as_deref() {
            r = r.with_detail("backup_id", b);
        }
        slog.revert().step("admit").result(&r).emit_success();
        return r;
    }
    if matches!(entry.state, MutationState::NotRun | MutationState::Simulated) {
        let e = ApiError::InvalidState(format!("{id} has not been applied; nothing to revert"));
        return refuse(engine, slog.revert().step("admit"), &e);
    }

    let record = match locate(engine, id) {
        Ok(r) => r,
        Err(e) => {
            if entry.state == MutationState::Applied || e.id() == ErrorId::E_CORRUPT_BACKUP {
                engine.ledger.record(id, |l| l.state = MutationState::Degraded);
            }
            return refuse(engine, slog.revert().step("locate"), &e);
        }
    };

    let snapshot_first = engine.policy.backup.capture_restore_snapshot;
    let checked = run_blocking({
        let engine = Arc::clone(engine);
        let m = Arc::clone(m);
        let record = record.clone();
        move || {
            let estimate = if snapshot_first {
                engine.manager().estimate(m.resources())
            } else {
                0
            };
            engine
                .validator()
                .validate(m.as_ref(), Gate::Revert, estimate)?;
            engine.manager().verify(&record)
        }
    })
    .await
    .unwrap_or_else(|p| Err(ApiError::Filesystem(format!("validation worker panicked: {p}"))));
    if let Err(e) = checked {
        if e.id() == ErrorId::E_CORRUPT_BACKUP {
            engine.note_verified(&record.id, false);
            engine.ledger.record(id, |l| l.state = MutationState::Degraded);
            slog.revert()
                .step("verify")
                .backup(&record.id)
                .error(e.id())
                .message(e.to_string())
                .emit_failure();
            engine.audit.log(Level::Error, &format!("{id}: {e}"));
            return OperationResult::from_error(&e).with_detail("backup_id", record.id.as_str());
        }
        return refuse(engine, slog.revert().step("validate"), &e);
    }
    engine.note_verified(&record.id, true);
    slog.revert().step("verify").backup(&record.id).emit_success();

    if cancel.is_cancelled() {
        return refuse(engine, slog.revert().step("verify"), &ApiError::Cancelled);
    }

    let pre = if snapshot_first {
        let captured = run_blocking({
            let engine = Arc::clone(engine);
            let m = Arc::clone(m);
            move || engine.manager().capture(m.as_ref(), Phase::Revert)
        })
        .await
        .unwrap_or_else(|p| Err(ApiError::BackupCapture(format!("capture worker panicked: {p}"))));
        match captured {
            Ok(r) => {
                slog.revert().step("capture").backup(&r.id).emit_success();
                Some(r)
            }
            Err(e) => return refuse(engine, slog.revert().step("capture"), &e),
        }
    } else {
        None
    };

    if cancel.is_cancelled() {
        if let Some(p) = &pre {
            engine.discard(p);
        }
        return refuse(engine, slog.revert().step("capture"), &ApiError::Cancelled);
    }

    engine.ledger.record(id, |l| l.in_progress = Some(Phase::Revert));
    slog.revert().step("attempt").backup(&record.id).emit_success();
    let deadline = engine.deadline(m.as_ref());
    let token = CancellationToken::new();
    let outcome = run_timed(deadline, engine.policy.cancel_grace(), &token, {
        let engine = Arc::clone(engine);
        let m = Arc::clone(m);
        let record = record.clone();
        let token = token.clone();
        move || engine.manager().restore(&record, m.as_ref(), &token)
    })
    .await;

    let (err, base) = match outcome {
        Timed::Done(r) if r.success => {
            engine.ledger.record(id, |l| {
                l.state = MutationState::Reverted;
                l.in_progress = None;
                l.backup_id = Some(record.id.clone());
                l.reboot_pending = desc.requires_reboot;
            });
            if let Some(p) = &pre {
                engine.discard(p);
            }
            slog.revert().step("result").backup(&record.id).result(&r).emit_success();
            engine.audit.log(Level::Info, &format!("reverted {id}"));
            return r;
        }
        Timed::Done(r) => (restore_error(&r), r),
        Timed::TimedOut => {
            let e = ApiError::Timeout(format!(
                "revert of {id} did not finish within {} ms",
                deadline.as_millis()
            ));
            let r = OperationResult::from_error(&e);
            (e, r)
        }
        Timed::Abandoned(worker) => {
            hold_until_done(claim.clone(), worker);
            let e = ApiError::Timeout(format!(
                "revert of {id} did not finish within {} ms and ignored cancellation",
                deadline.as_millis()
            ));
            if let Some(p) = &pre {
                return abandon(engine, slog, id, &p.id, &e)
                    .with_detail("pre_revert_backup_id", p.id.as_str())
                    .with_detail("backup_id", record.id.as_str());
            }
            let r = OperationResult::from_error(&e);
            (e, r)
        }
        Timed::Panicked(p) => {
            let e = ApiError::RestoreFailed(format!("revert of {id} panicked: {p}"));
            let r = OperationResult::from_error(&e);
            (e, r)
        }
    };
    slog.revert()
        .step("result")
        .backup(&record.id)
        .result(&base)
        .error(err.id())
        .emit_failure();

    let degraded = err.id() == ErrorId::E_CORRUPT_BACKUP;
    let Some(pre) = pre else {
        engine.ledger.record(id, |l| {
            l.state = if degraded {
                MutationState::Degraded
            } else {
                MutationState::Failed
            };
            l.in_progress = None;
        });
        engine.audit.log(Level::Error, &format!("revert of {id} failed: {err}"));
        return surface(&err, base).with_detail("backup_id", record.id.as_str());
    };

    let undone = run_blocking({
        let engine = Arc::clone(engine);
        let m = Arc::clone(m);
        let pre = pre.clone();
        move || {
            engine
                .manager()
                .restore(&pre, m.as_ref(), &CancellationToken::new())
        }
    })
    .await
    .unwrap_or_else(|p| {
        OperationResult::from_error(&ApiError::RestoreFailed(format!("rollback worker panicked: {p}")))
    });
    engine.ledger.record(id, |l| {
        l.state = if degraded {
            MutationState::Degraded
        } else {
            MutationState::Failed
        };
        l.in_progress = None;
    });
    let ev = slog
        .rollback()
        .step("restore")
        .backup(&pre.id)
        .result(&undone);
    if undone.success {
        ev.emit_success();
        engine
            .audit
            .log(Level::Warn, &format!("revert of {id} failed and was undone: {err}"));
        surface(&err, base)
            .with_detail("backup_id", record.id.as_str())
            .with_detail("pre_revert_backup_id", pre.id.as_str())
            .with_detail("rollback", "succeeded")
    } else {
        ev.emit_failure();
        let e = ApiError::RollbackFailed(format!(
            "{id}: {err}; restoring pre-revert state from {} failed: {}",
            pre.id, undone.message
        ));
        engine.audit.log(Level::Error, &e.to_string());
        OperationResult::from_error(&e)
            .with_details(json!({
                "backup_id": record.id,
                "pre_revert_backup_id": pre.id,
                "cause": id_str(err.id()),
                "rollback": undone.message,
            }))
    }
}

/// Classify a failed restore result.
fn restore_error(r: &OperationResult) -> ApiError {
    let msg = r.message.clone();
    match r.error {
        Some(ErrorId::E_RESOURCE_BUSY) => ApiError::ResourceBusy(msg),
        Some(ErrorId::E_BACKUP_MISSING) => ApiError::BackupMissing(msg),
        Some(ErrorId::E_CORRUPT_BACKUP) => ApiError::CorruptBackup(msg),
        _ => ApiError::RestoreFailed(msg),
    }
}

fn surface(err: &ApiError, base: OperationResult) -> OperationResult {
    OperationResult {
        success: false,
        message: err.to_string(),
        error: Some(err.id()),
        ..base
    }
}
