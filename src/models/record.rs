// Cached collector result for one (host, collector) pair

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Immutable snapshot of one collection attempt.
///
/// A record with an error always carries an empty object payload. `last_success_at`
/// survives failures so consumers can tell how old the last good data was.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub host: String,
    pub collector: String,
    pub payload: Value,
    pub captured_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success_at: Option<DateTime<Utc>>,
}

impl MetricRecord {
    pub fn success(host: &str, collector: &str, payload: Value) -> Self {
        let now = Utc::now();
        Self {
            host: host.to_string(),
            collector: collector.to_string(),
            payload,
            captured_at: now,
            error: None,
            last_success_at: Some(now),
        }
    }

    pub fn failure(host: &str, collector: &str, error: impl Into<String>) -> Self {
        Self {
            host: host.to_string(),
            collector: collector.to_string(),
            payload: Value::Object(Map::new()),
            captured_at: Utc::now(),
            error: Some(error.into()),
            last_success_at: None,
        }
    }

    /// Carry the last-success timestamp over from the record this one replaces.
    pub fn carrying_success_from(mut self, previous: Option<&MetricRecord>) -> Self {
        if self.error.is_some() {
            self.last_success_at = previous.and_then(|p| p.last_success_at);
        }
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Time since capture; clock skew backwards counts as zero.
    pub fn age(&self) -> Duration {
        (Utc::now() - self.captured_at).to_std().unwrap_or_default()
    }

    pub fn is_stale(&self, max_age: Duration) -> bool {
        self.age() > max_age
    }
}
