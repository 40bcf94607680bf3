//! Policy configuration for Tweakyard.
//!
//! Consumers typically construct a [`Policy`](crate::policy::Policy) via `Policy::default()`,
//! `production_preset()` or `Policy::load(path)`, customize fields, and pass it to
//! [`Tweakyard::builder`](crate::Tweakyard::builder).
//!
//! Submodules:
//! - `config`: policy struct, presets and file loading
//! - `types`: the grouped sections

pub mod config;
pub mod types;

pub use config::Policy;
pub use types::{BackupPolicy, Concurrency, Preflight};
