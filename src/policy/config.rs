use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::constants::DEFAULT_LOCK_TIMEOUT_MS;
use crate::types::errors::{Error, ErrorKind, Result};

use super::types::{BackupPolicy, Concurrency, Preflight};

/// Policy governs pre-flight gates, concurrency limits and backup behavior.
///
/// Grouped fields provide clearer ownership and ergonomics. Every field has a default, so
/// a configuration file only needs to name what it overrides.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Policy {
    pub concurrency: Concurrency,
    pub preflight: Preflight,
    pub backup: BackupPolicy,
    /// Bounded wait for the application-root lock when an engine is built.
    pub lock_timeout_ms: u64,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            concurrency: Concurrency::default(),
            preflight: Preflight::default(),
            backup: BackupPolicy::default(),
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
        }
    }
}

impl Policy {
    /// Construct a Policy configured with recommended **production defaults**.
    ///
    /// Enables:
    /// - `backup.capture_restore_snapshot = true` (a failed revert is itself undoable)
    /// - `concurrency.max_in_flight = 2`
    ///
    /// # Example
    /// ```rust
    /// use tweakyard::policy::Policy;
    /// let mut policy = Policy::production_preset();
    /// policy.preflight.critical_processes.push("steam".to_string());
    /// # let _ = policy;
    /// ```
    #[must_use]
    pub fn production_preset() -> Self {
        let mut p = Self::default();
        p.apply_production_preset();
        p
    }

    /// Mutate this Policy to apply the recommended **production defaults**.
    pub fn apply_production_preset(&mut self) -> &mut Self {
        self.backup.capture_restore_snapshot = true;
        self.concurrency.max_in_flight = 2;
        self
    }

    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.concurrency.default_timeout_ms)
    }

    #[must_use]
    pub const fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.concurrency.cancel_grace_ms)
    }

    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Parse a policy from YAML text (JSON is a subset and parses too).
    ///
    /// # Errors
    ///
    /// Returns `ErrorKind::Policy` on syntax errors, unknown fields or invalid values.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let p: Self = serde_yaml::from_str(text)
            .map_err(|e| Error::new(ErrorKind::Policy, format!("invalid policy: {e}")))?;
        p.validate()?;
        Ok(p)
    }

    /// Load a policy file; `.json` files are parsed as JSON, anything else as YAML.
    ///
    /// # Errors
    ///
    /// Returns `ErrorKind::Io` if the file cannot be read and `ErrorKind::Policy` if it is invalid.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            let p: Self = serde_json::from_str(&text)
                .map_err(|e| Error::new(ErrorKind::Policy, format!("invalid policy: {e}")))?;
            p.validate()?;
            Ok(p)
        } else {
            Self::from_yaml_str(&text)
        }
    }

    fn validate(&self) -> Result<()> {
        if self.concurrency.max_in_flight == 0 {
            return Err(Error::new(
                ErrorKind::Policy,
                "concurrency.max_in_flight must be at least 1",
            ));
        }
        if self.concurrency.default_timeout_ms == 0 {
            return Err(Error::new(
                ErrorKind::Policy,
                "concurrency.default_timeout_ms must be positive",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::ResourceKind;

    #[test]
    fn yaml_overrides_only_named_fields() {
        let p = Policy::from_yaml_str(
            "concurrency:\n  max_in_flight: 1\npreflight:\n  critical_processes: [steam]\n",
        )
        .unwrap();
        assert_eq!(p.concurrency.max_in_flight, 1);
        assert_eq!(p.concurrency.default_timeout_ms, 30_000);
        assert_eq!(p.preflight.critical_processes, vec!["steam".to_string()]);
        assert!(p
            .preflight
            .require_elevation_for
            .contains(&ResourceKind::Registry));
    }

    #[test]
    fn unknown_fields_and_zero_cap_are_rejected() {
        let e = Policy::from_yaml_str("concurrency:\n  max_in_fligth: 2\n").unwrap_err();
        assert_eq!(e.kind, ErrorKind::Policy);
        let e = Policy::from_yaml_str("concurrency:\n  max_in_flight: 0\n").unwrap_err();
        assert_eq!(e.kind, ErrorKind::Policy);
    }

    #[test]
    fn load_picks_parser_by_extension() {
        let td = tempfile::tempdir().unwrap();
        let j = td.path().join("policy.json");
        std::fs::write(&j, r#"{"backup": {"capture_restore_snapshot": true}}"#).unwrap();
        assert!(Policy::load(&j).unwrap().backup.capture_restore_snapshot);
        let y = td.path().join("policy.yaml");
        std::fs::write(&y, "lock_timeout_ms: 100\n").unwrap();
        assert_eq!(Policy::load(&y).unwrap().lock_timeout(), Duration::from_millis(100));
        let missing = Policy::load(&td.path().join("nope.yaml")).unwrap_err();
        assert_eq!(missing.kind, ErrorKind::NotFound);
    }

    #[test]
    fn production_preset_enables_restore_snapshot() {
        let p = Policy::production_preset();
        assert!(p.backup.capture_restore_snapshot);
        assert_eq!(p.concurrency.max_in_flight, 2);
    }
}
