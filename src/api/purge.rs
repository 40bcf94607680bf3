use std::time::Duration;

use log::Level;
use serde_json::json;

use crate::fs::backup::prune_records;
use crate::logging::audit::count_references;
use crate::logging::{AuditSink, FactsEmitter, StageLogger};
use crate::types::errors::ErrorKind;
use crate::types::ids::{is_safe_component, new_txn_id};
use crate::types::{MutationState, OperationResult, PruneResult};

use super::apply::refuse;
use super::errors::ApiError;
use super::Engine;

pub(super) fn purge_backup<E: FactsEmitter, A: AuditSink>(
    engine: &Engine<E, A>,
    backup_id: &str,
) -> OperationResult {
    let record = match engine.store.read_record(backup_id) {
        Ok(r) => r,
        Err(e) => {
            let err = if e.kind == ErrorKind::NotFound {
                ApiError::BackupMissing(format!("no backup {backup_id}"))
            } else {
                ApiError::from(e)
            };
            let actx = engine.audit_ctx(new_txn_id(), "");
            return refuse(
                engine,
                StageLogger::new(&actx)
                    .purge()
                    .step("locate")
                    .backup(backup_id),
                &err,
            );
        }
    };
    let id = record.mutation_id.as_str();
    let actx = engine.audit_ctx(new_txn_id(), id);
    let slog = StageLogger::new(&actx);

    let _claim = match engine.in_flight.claim(id) {
        Ok(c) => c,
        Err(e) => return refuse(engine, slog.purge().step("admit").backup(backup_id), &e),
    };
    let entry = engine.ledger.get(id);
    let referenced = entry.backup_id.as_deref() == Some(backup_id);
    if referenced && matches!(entry.state, MutationState::Applied | MutationState::Degraded) {
        let e = ApiError::BackupInUse(format!(
            "{backup_id} is the revert source of applied mutation {id}"
        ));
        return refuse(engine, slog.purge().step("admit").backup(backup_id), &e);
    }

    let references = count_references(&engine.ctx.log_path, backup_id);
    if let Err(e) = engine.manager().purge(&record) {
        return refuse(engine, slog.purge().step("delete").backup(backup_id), &e);
    }
    if referenced {
        engine.ledger.record(id, |l| l.backup_id = None);
    }
    let r = OperationResult::ok(format!("purged backup {backup_id} of {id}"))
        .with_detail("backup_id", backup_id)
        .with_detail("bytes", record.total_bytes())
        .with_detail("audit_references", references);
    slog.purge()
        .step("delete")
        .backup(backup_id)
        .result(&r)
        .emit_success();
    engine.audit.log(Level::Info, &r.message);
    r
}

pub(super) fn prune_backups<E: FactsEmitter, A: AuditSink>(
    engine: &Engine<E, A>,
    mutation_id: &str,
    count_limit: Option<usize>,
    age_limit: Option<Duration>,
) -> Result<PruneResult, ApiError> {
    if !is_safe_component(mutation_id) {
        return Err(ApiError::UnknownMutation(mutation_id.to_string()));
    }
    let actx = engine.audit_ctx(new_txn_id(), mutation_id);
    let slog = StageLogger::new(&actx);
    let _claim = engine.in_flight.claim(mutation_id)?;
    let protect = engine.ledger.get(mutation_id).backup_id;
    match prune_records(
        &engine.store,
        mutation_id,
        count_limit,
        age_limit,
        protect.as_deref(),
    ) {
        Ok(res) => {
            slog.purge()
                .step("prune")
                .merge(json!({
                    "retention_count_limit": count_limit,
                    "retention_age_limit_ms": age_limit.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
                    "pruned_count": res.pruned_count,
                    "retained_count": res.retained_count,
                }))
                .emit_success();
            Ok(res)
        }
        Err(e) => {
            let err = ApiError::Filesystem(format!("prune {mutation_id}: {e}"));
            slog.purge()
                .step("prune")
                .error(err.id())
                .message(err.to_string())
                .emit_failure();
            Err(err)
        }
    }
}
