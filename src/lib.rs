#![forbid(unsafe_code)]
//! Tweakyard: reversible system tweaks with backup-first transactions.
//!
//! Safety model highlights:
//! - Every apply is preceded by a verified capture of each declared resource; the capture is
//!   committed by an atomic manifest write, so a record either exists completely or not at all.
//! - A failed or timed-out apply is rolled back from the record captured for that same attempt.
//! - One transaction per mutation id at a time; independent ids run concurrently under a global cap.
//! - Every lifecycle transition is written to an append-only audit log.

pub mod adapters;
pub mod api;
pub mod constants;
pub mod context;
pub mod fs;
pub mod logging;
pub mod mutation;
pub mod policy;
pub mod preflight;
pub mod types;

pub use api::*;
pub use context::EngineContext;
