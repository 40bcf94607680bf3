//! Outcome values returned by every mutation operation and orchestrator call.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::api::errors::{ApiError, ErrorId};
use crate::logging::redact::now_iso;

/// Lifecycle phase an outcome, record, or audit entry belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Simulate,
    Apply,
    Revert,
    Rollback,
    Purge,
    Recovery,
}

impl Phase {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Phase::Simulate => "simulate",
            Phase::Apply => "apply",
            Phase::Revert => "revert",
            Phase::Rollback => "rollback",
            Phase::Purge => "purge",
            Phase::Recovery => "recovery",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a simulate/apply/revert call, suitable for direct display.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorId>,
    pub timestamp: String,
}

impl OperationResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            details: Map::new(),
            error: None,
            timestamp: now_iso(),
        }
    }

    pub fn failure(id: ErrorId, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            details: Map::new(),
            error: Some(id),
            timestamp: now_iso(),
        }
    }

    /// Failure produced by a mutation itself. The orchestrator treats it as `E_APPLY`
    /// unless the mutation picked a more specific id.
    pub fn mutation_failure(message: impl Into<String>) -> Self {
        Self::failure(ErrorId::E_APPLY, message)
    }

    #[must_use]
    pub fn from_error(e: &ApiError) -> Self {
        Self::failure(e.id(), e.to_string())
    }

    #[must_use]
    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    /// Merge every key of a JSON object into the details map; non-objects are ignored.
    #[must_use]
    pub fn with_details(mut self, extra: Value) -> Self {
        if let Value::Object(obj) = extra {
            self.details.extend(obj);
        }
        self
    }

    #[must_use]
    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details.get(key)
    }

    #[must_use]
    pub fn error_id(&self) -> Option<ErrorId> {
        self.error
    }
}
