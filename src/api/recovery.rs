//! Startup reconciliation of the ledger against the backup store.
//!
//! - An entry still marked in progress was interrupted: it becomes `Failed`, and its record
//!   stays available to revert.
//! - An `Applied` entry whose record is missing (or fails verification when
//!   `backup.verify_on_startup` is set) becomes `Degraded`.
//! - A `Degraded` entry whose record is present and verifies in full becomes `Applied`.
use log::Level;

use crate::logging::{AuditSink, FactsEmitter, StageLogger};
use crate::types::ids::new_txn_id;
use crate::types::MutationState;

use super::state::LedgerEntry;
use super::Engine;

pub(super) fn reconcile<E: FactsEmitter, A: AuditSink>(engine: &Engine<E, A>) {
    let txn_id = new_txn_id();
    for (id, entry) in engine.ledger.snapshot() {
        let Some((next, why)) = assess(engine, &entry) else {
            continue;
        };
        engine.ledger.record(&id, |e| {
            e.state = next;
            e.in_progress = None;
        });
        let actx = engine.audit_ctx(txn_id, &id);
        let mut ev = StageLogger::new(&actx)
            .recovery()
            .step("reconcile")
            .message(why.clone())
            .field("from", serde_json::json!(entry.state.as_str()))
            .field("to", serde_json::json!(next.as_str()));
        if let Some(b) = entry.backup_id.as_deref() {
            ev = ev.backup(b);
        }
        ev.emit_warn();
        engine
            .audit
            .log(Level::Warn, &format!("recovery: {id}: {why}"));
    }
}

fn assess<E: FactsEmitter, A: AuditSink>(
    engine: &Engine<E, A>,
    entry: &LedgerEntry,
) -> Option<(MutationState, String)> {
    if let Some(phase) = entry.in_progress {
        return Some((
            MutationState::Failed,
            format!("{phase} was interrupted before completing"),
        ));
    }
    let record_ok = |verify: bool| -> Result<(), String> {
        let bid = entry
            .backup_id
            .as_deref()
            .ok_or_else(|| "no backup recorded".to_string())?;
        let record = engine
            .store
            .read_record(bid)
            .map_err(|e| format!("backup {bid} unreadable: {}", e.msg))?;
        if verify {
            engine
                .manager()
                .verify(&record)
                .map_err(|e| e.to_string())?;
        }
        Ok(())
    };
    match entry.state {
        MutationState::Applied => match record_ok(engine.policy.backup.verify_on_startup) {
            Ok(()) => None,
            Err(why) => Some((MutationState::Degraded, why)),
        },
        MutationState::Degraded => record_ok(true)
            .ok()
            .map(|()| (MutationState::Applied, "backup verified again".to_string())),
        _ => None,
    }
}
