use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::Path;
use std::sync::Mutex;

use log::Level;
use serde_json::{json, Value};

pub trait FactsEmitter: Send + Sync {
    fn emit(&self, subsystem: &str, event: &str, decision: &str, fields: Value);
}

pub trait AuditSink: Send + Sync {
    fn log(&self, level: Level, msg: &str);
}

/// Appends one JSON fact per line. `JsonlSink::default()` discards everything.
#[derive(Default)]
pub struct JsonlSink {
    file: Option<Mutex<File>>,
}

impl JsonlSink {
    /// Open (or create) an append-only JSONL file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the parent directory or the file cannot be created.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Some(Mutex::new(f)),
        })
    }
}

impl FactsEmitter for JsonlSink {
    fn emit(&self, subsystem: &str, event: &str, decision: &str, fields: Value) {
        let Some(file) = self.file.as_ref() else {
            return;
        };
        let mut line = fields;
        if let Some(obj) = line.as_object_mut() {
            obj.entry("subsystem").or_insert(json!(subsystem));
            obj.entry("event").or_insert(json!(event));
            obj.entry("decision").or_insert(json!(decision));
        }
        let Ok(mut s) = serde_json::to_string(&line) else {
            return;
        };
        s.push('\n');
        let mut f = match file.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = f.write_all(s.as_bytes()).and_then(|()| f.sync_data()) {
            log::warn!("audit append failed: {e}");
        }
    }
}

impl AuditSink for JsonlSink {
    fn log(&self, level: Level, msg: &str) {
        log::log!(target: "tweakyard", level, "{msg}");
    }
}

/// Sends every fact to the caller's emitter and to the on-disk audit journal.
pub(crate) struct FactsTee<E> {
    pub(crate) caller: E,
    pub(crate) journal: JsonlSink,
}

impl<E: FactsEmitter> FactsEmitter for FactsTee<E> {
    fn emit(&self, subsystem: &str, event: &str, decision: &str, fields: Value) {
        self.journal.emit(subsystem, event, decision, fields.clone());
        self.caller.emit(subsystem, event, decision, fields);
    }
}
