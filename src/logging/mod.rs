pub mod audit;
pub mod facts;
pub mod redact;

pub use audit::{read_entries, AuditEntry, Decision};
pub(crate) use audit::{AuditCtx, EventBuilder, StageLogger};
pub use facts::{AuditSink, FactsEmitter, JsonlSink};
pub(crate) use facts::FactsTee;
pub use redact::{now_iso, redact_event, TS_ZERO};
