use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub const TS_ZERO: &str = "1970-01-01T00:00:00Z";

pub fn now_iso() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| TS_ZERO.to_string())
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    u64::try_from(nanos).unwrap_or(0)
}

/// Normalize a fact for comparison in tests: zero the timestamp and drop fields
/// that differ between runs (ids, timings, checksums).
pub fn redact_event(mut v: Value) -> Value {
    if let Some(obj) = v.as_object_mut() {
        obj.insert("ts".into(), Value::String(TS_ZERO.to_string()));
        obj.remove("txn_id");
        obj.remove("backup_id");
        obj.remove("duration_ms");
        obj.remove("lock_wait_ms");
        if let Some(details) = obj.get_mut("details").and_then(Value::as_object_mut) {
            details.remove("checksum");
            details.remove("timestamp");
        }
    }
    v
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redact_zeroes_ts_and_drops_volatile_fields() {
        let input = json!({
            "ts": "2025-01-01T12:00:00Z",
            "txn_id": "5b0c",
            "backup_id": "9f1e",
            "duration_ms": 123,
            "mutation_id": "clean-temp",
            "details": {"checksum": "abc", "bytes": 10}
        });
        let out = redact_event(input);
        assert_eq!(out["ts"], json!(TS_ZERO));
        assert!(out.get("txn_id").is_none());
        assert!(out.get("backup_id").is_none());
        assert!(out.get("duration_ms").is_none());
        assert_eq!(out["mutation_id"], json!("clean-temp"));
        assert!(out["details"].get("checksum").is_none());
        assert_eq!(out["details"]["bytes"], json!(10));
    }

    #[test]
    fn now_iso_parses_back() {
        let s = now_iso();
        assert!(OffsetDateTime::parse(&s, &Rfc3339).is_ok());
        assert!(now_ms() > 0);
    }
}
