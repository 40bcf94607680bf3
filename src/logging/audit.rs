// Audit helpers that emit one structured fact per lifecycle event.
//
// Every fact carries the envelope `schema_version`, `ts`, `txn_id`, `mutation_id`, `phase`.
// Facts are written through a `FactsEmitter`; `JsonlSink` persists them to `logs/audit.jsonl`.
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::api::errors::{id_str, ErrorId};
use crate::logging::redact::now_iso;
use crate::logging::{redact_event, FactsEmitter};
use crate::types::{OperationResult, Phase};

pub(crate) const SCHEMA_VERSION: i64 = 1;
pub(crate) const SUBSYSTEM: &str = "tweakyard";

pub(crate) struct AuditCtx<'a> {
    pub facts: &'a dyn FactsEmitter,
    pub txn_id: String,
    pub mutation_id: String,
    pub redact: bool,
}

impl<'a> AuditCtx<'a> {
    pub(crate) fn new(facts: &'a dyn FactsEmitter, txn_id: String, mutation_id: String) -> Self {
        Self {
            facts,
            txn_id,
            mutation_id,
            redact: false,
        }
    }
}

/// Decision severity for audit events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Success,
    Failure,
    Warn,
}

impl Decision {
    fn as_str(self) -> &'static str {
        match self {
            Decision::Success => "success",
            Decision::Failure => "failure",
            Decision::Warn => "warn",
        }
    }
}

/// Builder facade over audit emission with centralized envelope+redaction.
pub(crate) struct StageLogger<'a> {
    ctx: &'a AuditCtx<'a>,
}

impl<'a> StageLogger<'a> {
    pub(crate) fn new(ctx: &'a AuditCtx<'a>) -> Self {
        Self { ctx }
    }

    pub fn phase(&self, phase: Phase) -> EventBuilder<'a> {
        EventBuilder::new(self.ctx, phase)
    }
    pub fn simulate(&self) -> EventBuilder<'a> {
        self.phase(Phase::Simulate)
    }
    pub fn apply(&self) -> EventBuilder<'a> {
        self.phase(Phase::Apply)
    }
    pub fn revert(&self) -> EventBuilder<'a> {
        self.phase(Phase::Revert)
    }
    pub fn rollback(&self) -> EventBuilder<'a> {
        self.phase(Phase::Rollback)
    }
    pub fn purge(&self) -> EventBuilder<'a> {
        self.phase(Phase::Purge)
    }
    pub fn recovery(&self) -> EventBuilder<'a> {
        self.phase(Phase::Recovery)
    }
}

pub(crate) struct EventBuilder<'a> {
    ctx: &'a AuditCtx<'a>,
    phase: Phase,
    fields: serde_json::Map<String, Value>,
}

impl<'a> EventBuilder<'a> {
    fn new(ctx: &'a AuditCtx<'a>, phase: Phase) -> Self {
        let mut fields = serde_json::Map::new();
        fields.insert("phase".to_string(), json!(phase.as_str()));
        Self { ctx, phase, fields }
    }

    /// Sub-step inside the phase, e.g. `validate`, `capture`, `attempt`.
    pub fn step(mut self, step: &str) -> Self {
        self.fields.insert("step".into(), json!(step));
        self
    }

    pub fn backup(mut self, backup_id: &str) -> Self {
        self.fields.insert("backup_id".into(), json!(backup_id));
        self
    }

    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.fields.insert("message".into(), json!(msg.into()));
        self
    }

    pub fn error(mut self, id: ErrorId) -> Self {
        self.fields.insert("error_id".into(), json!(id_str(id)));
        self
    }

    /// Copy message, error id and details of an operation result into the event.
    pub fn result(mut self, r: &OperationResult) -> Self {
        self.fields.insert("message".into(), json!(r.message));
        if let Some(id) = r.error {
            self.fields.insert("error_id".into(), json!(id_str(id)));
        }
        if !r.details.is_empty() {
            self.fields
                .insert("details".into(), Value::Object(r.details.clone()));
        }
        self
    }

    pub fn field(mut self, key: &str, value: Value) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }

    pub fn merge(mut self, extra: Value) -> Self {
        if let Some(obj) = extra.as_object() {
            for (k, v) in obj {
                self.fields.insert(k.clone(), v.clone());
            }
        }
        self
    }

    pub fn emit(self, decision: Decision) {
        let mut fields = Value::Object(self.fields);
        if let Some(obj) = fields.as_object_mut() {
            obj.insert("decision".into(), json!(decision.as_str()));
            obj.entry("schema_version").or_insert(json!(SCHEMA_VERSION));
            obj.entry("ts").or_insert_with(|| json!(now_iso()));
            obj.entry("txn_id").or_insert(json!(self.ctx.txn_id));
            obj.entry("mutation_id").or_insert(json!(self.ctx.mutation_id));
        }
        let out = if self.ctx.redact {
            redact_event(fields)
        } else {
            fields
        };
        self.ctx
            .facts
            .emit(SUBSYSTEM, self.phase.as_str(), decision.as_str(), out);
    }

    pub fn emit_success(self) {
        self.emit(Decision::Success);
    }
    pub fn emit_failure(self) {
        self.emit(Decision::Failure);
    }
    pub fn emit_warn(self) {
        self.emit(Decision::Warn);
    }
}

/// One line of `logs/audit.jsonl` as read back by tooling.
#[derive(Clone, Debug, Deserialize)]
pub struct AuditEntry {
    pub ts: String,
    #[serde(default)]
    pub txn_id: String,
    pub mutation_id: String,
    pub phase: Phase,
    pub decision: Decision,
    #[serde(default)]
    pub step: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error_id: Option<String>,
    #[serde(default)]
    pub backup_id: Option<String>,
}

/// Read every parseable entry of an audit log. Missing files read as empty;
/// unparseable lines are skipped.
///
/// # Errors
///
/// Returns an IO error if the file exists but cannot be read.
pub fn read_entries(path: &Path) -> std::io::Result<Vec<AuditEntry>> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    Ok(text
        .lines()
        .filter_map(|l| serde_json::from_str::<AuditEntry>(l).ok())
        .collect())
}

/// Number of audit entries naming `backup_id`.
pub(crate) fn count_references(path: &Path, backup_id: &str) -> usize {
    read_entries(path)
        .map(|v| {
            v.iter()
                .filter(|e| e.backup_id.as_deref() == Some(backup_id))
                .count()
        })
        .unwrap_or(0)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    struct Capture {
        events: Arc<Mutex<Vec<(String, String, Value)>>>,
    }

    impl FactsEmitter for Capture {
        fn emit(&self, _subsystem: &str, event: &str, decision: &str, fields: Value) {
            self.events
                .lock()
                .unwrap()
                .push((event.to_string(), decision.to_string(), fields));
        }
    }

    #[test]
    fn envelope_is_added_to_every_event() {
        let cap = Capture::default();
        let ctx = AuditCtx::new(&cap, "txn-1".into(), "clean-temp".into());
        let slog = StageLogger::new(&ctx);
        slog.apply().step("capture").backup("b1").emit_success();
        slog.rollback().error(ErrorId::E_APPLY).message("boom").emit_failure();

        let evs = cap.events.lock().unwrap();
        assert_eq!(evs.len(), 2);
        let (event, decision, f) = &evs[0];
        assert_eq!(event, "apply");
        assert_eq!(decision, "success");
        assert_eq!(f["schema_version"], json!(1));
        assert_eq!(f["txn_id"], json!("txn-1"));
        assert_eq!(f["mutation_id"], json!("clean-temp"));
        assert_eq!(f["backup_id"], json!("b1"));
        assert!(f["ts"].as_str().is_some());
        assert_eq!(evs[1].2["error_id"], json!("E_APPLY"));
        assert_eq!(evs[1].2["phase"], json!("rollback"));
    }

    #[test]
    fn read_entries_skips_garbage_and_counts_references() {
        let td = tempfile::tempdir().unwrap();
        let p = td.path().join("audit.jsonl");
        let sink = crate::logging::JsonlSink::open(&p).unwrap();
        let ctx = AuditCtx::new(&sink, "t".into(), "m".into());
        let slog = StageLogger::new(&ctx);
        slog.apply().backup("b1").emit_success();
        slog.revert().backup("b1").emit_success();
        slog.apply().backup("b2").emit_success();
        drop(sink);
        let mut f = std::fs::OpenOptions::new().append(true).open(&p).unwrap();
        std::io::Write::write_all(&mut f, b"not json\n").unwrap();

        let entries = read_entries(&p).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].phase, Phase::Revert);
        assert_eq!(count_references(&p, "b1"), 2);
        assert_eq!(count_references(&td.path().join("missing"), "b1"), 0);
    }
}
