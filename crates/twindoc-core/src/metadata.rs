//! Per-property metadata: last-update timestamp and version
//!
//! Timestamps follow the wire format `yyyy-MM-ddTHH:mm:ss.ssssZ` (UTC,
//! four fractional-second digits).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Tracks when a property last changed and under which document version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    #[serde(rename = "$lastUpdated")]
    last_updated: String,

    #[serde(rename = "$lastUpdatedVersion", skip_serializing_if = "Option::is_none")]
    last_updated_version: Option<i64>,
}

impl MetadataRecord {
    /// Create a record stamped with the current time.
    pub fn stamped(version: Option<i64>) -> Self {
        Self {
            last_updated: now_utc_iso(),
            last_updated_version: version,
        }
    }

    /// Re-stamp with the current time and the supplied version.
    pub fn stamp(&mut self, version: Option<i64>) {
        self.last_updated = now_utc_iso();
        self.last_updated_version = version;
    }

    /// Overwrite both fields from an incoming `$metadata` entry.
    ///
    /// The returned flag reports whether anything differed from the
    /// stored state; it does not gate the write, which always happens.
    pub fn apply(&mut self, last_updated: &str, version: Option<i64>) -> bool {
        let changed = self.last_updated != last_updated
            || match (self.last_updated_version, version) {
                (None, None) => false,
                (Some(ours), Some(theirs)) => ours != theirs,
                _ => true,
            };

        self.last_updated = last_updated.to_string();
        self.last_updated_version = version;

        changed
    }

    pub fn last_updated(&self) -> &str {
        &self.last_updated
    }

    pub fn last_updated_version(&self) -> Option<i64> {
        self.last_updated_version
    }

    /// Wire shape: `$lastUpdatedVersion` is omitted when absent.
    pub fn to_json(&self) -> Value {
        let mut obj = json!({ "$lastUpdated": self.last_updated });
        if let Some(version) = self.last_updated_version {
            obj["$lastUpdatedVersion"] = json!(version);
        }
        obj
    }
}

/// Current time in the twin wire format.
pub fn now_utc_iso() -> String {
    format_timestamp(Utc::now())
}

/// Format a timestamp as `yyyy-MM-ddTHH:mm:ss.ssssZ`.
///
/// chrono has no four-digit fractional specifier, so the sub-second part
/// is truncated by hand.
pub fn format_timestamp(instant: DateTime<Utc>) -> String {
    let fraction = instant.timestamp_subsec_nanos() % 1_000_000_000 / 100_000;
    format!("{}.{:04}Z", instant.format("%Y-%m-%dT%H:%M:%S"), fraction)
}
