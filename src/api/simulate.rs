use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use crate::logging::{AuditSink, FactsEmitter, StageLogger};
use crate::mutation::Mutation;
use crate::types::{MutationState, OperationResult};

use super::errors::ApiError;
use super::txn::run_blocking;
use super::Engine;

/// Run the mutation's preview and the full preflight assessment. Never captures, never
/// claims the id, and only moves a mutation that has never been applied to `Simulated`.
pub(super) async fn run<E: FactsEmitter + 'static, A: AuditSink + 'static>(
    engine: Arc<Engine<E, A>>,
    m: Arc<dyn Mutation>,
    txn_id: Uuid,
) -> OperationResult {
    let id = m.descriptor().id;
    let actx = engine.audit_ctx(txn_id, id);
    let slog = StageLogger::new(&actx);

    let joined = run_blocking({
        let engine = Arc::clone(&engine);
        let m = Arc::clone(&m);
        move || {
            let estimate = engine.manager().estimate(m.resources());
            let report = engine.validator().assess(m.as_ref(), estimate);
            (m.simulate(), report)
        }
    })
    .await;
    let (r, report) = match joined {
        Ok(v) => v,
        Err(p) => {
            let r = OperationResult::from_error(&ApiError::Apply(format!(
                "simulate of {id} panicked: {p}"
            )));
            slog.simulate().result(&r).emit_failure();
            return r;
        }
    };
    let r = r.with_detail("preflight", json!(report));

    if r.success {
        engine.ledger.record(id, |e| {
            if e.in_progress.is_none() && e.state == MutationState::NotRun {
                e.state = MutationState::Simulated;
            }
        });
        let ev = slog.simulate().result(&r);
        if report.ok {
            ev.emit_success();
        } else {
            ev.emit_warn();
        }
    } else {
        slog.simulate().result(&r).emit_failure();
    }
    r
}
