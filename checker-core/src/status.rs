//! Check status records and the shared status store.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::metrics;

/// The state of a single check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Status {
    /// Whether the last execution passed.
    pub ok: bool,
    /// Error message explaining why the check failed.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
    /// When the check was last run.
    pub timestamp: DateTime<Utc>,
    /// How long the last execution took, serialized as nanoseconds.
    #[serde(with = "duration_nanos")]
    pub duration: Duration,
    /// Number of failures observed in a row.
    pub contiguous_failures: u32,
    /// When the current failure streak started.
    #[serde(with = "zero_time")]
    pub time_of_first_failure: Option<DateTime<Utc>>,
}

pub type Statuses = HashMap<String, Status>;

/// Fold the status map into `(all_failed, any_failed)`.
///
/// The fold starts from `all_failed = true`, so an empty map yields
/// `(true, false)`.
#[must_use]
pub fn evaluate(statuses: &Statuses) -> (bool, bool) {
    let mut all_failed = true;
    let mut any_failed = false;
    for status in statuses.values() {
        if status.ok {
            all_failed = false;
        } else {
            any_failed = true;
        }
    }
    (all_failed, any_failed)
}

/// Thread-safe map of check name to [`Status`].
///
/// Every `set` atomically replaces the entry and updates the check metrics
/// for the key.
#[derive(Debug, Default)]
pub struct StatusStore {
    inner: RwLock<Statuses>,
}

impl StatusStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, name: &str) -> Option<Status> {
        self.inner.read().await.get(name).cloned()
    }

    pub async fn set(&self, name: &str, status: Status) {
        update_metrics(name, &status);
        self.inner.write().await.insert(name.to_string(), status);
    }

    pub async fn delete(&self, name: &str) {
        self.inner.write().await.remove(name);
    }

    pub async fn snapshot(&self) -> Statuses {
        self.inner.read().await.clone()
    }

    pub async fn evaluate(&self) -> (bool, bool) {
        evaluate(&*self.inner.read().await)
    }
}

fn update_metrics(name: &str, status: &Status) {
    let (value, outcome) = if status.ok { (1.0, "success") } else { (0.0, "error") };
    metrics::CHECK_STATUS_UP.with_label_values(&[name]).set(value);
    metrics::CHECK_STATUS_TOTAL
        .with_label_values(&[name, outcome])
        .inc();
    metrics::CHECK_DURATION_MS
        .with_label_values(&[name])
        .observe(status.duration.as_secs_f64() * 1000.0);
}

mod duration_nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(duration.as_nanos().min(i64::MAX as u128) as i64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let nanos = i64::deserialize(deserializer)?;
        Ok(Duration::from_nanos(nanos.max(0) as u64))
    }
}

/// Serializes `None` as the zero time (`0001-01-01T00:00:00Z`) so that a
/// check that never failed still carries an explicit first-failure field.
mod zero_time {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    const ZERO: &str = "0001-01-01T00:00:00Z";

    pub fn serialize<S: Serializer>(
        time: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match time {
            Some(t) => t.serialize(serializer),
            None => serializer.serialize_str(ZERO),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw == ZERO {
            return Ok(None);
        }
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_status() -> Status {
        Status {
            ok: true,
            ..Status::default()
        }
    }

    fn failed_status() -> Status {
        Status {
            ok: false,
            error: "boom".to_string(),
            contiguous_failures: 1,
            time_of_first_failure: Some(Utc::now()),
            ..Status::default()
        }
    }

    #[test]
    fn test_evaluate_all_ok() {
        let statuses = Statuses::from([("foo".to_string(), ok_status())]);
        assert_eq!(evaluate(&statuses), (false, false));
    }

    #[test]
    fn test_evaluate_all_failed() {
        let statuses = Statuses::from([("foo".to_string(), failed_status())]);
        assert_eq!(evaluate(&statuses), (true, true));
    }

    #[test]
    fn test_evaluate_one_failed() {
        let statuses = Statuses::from([
            ("foo".to_string(), ok_status()),
            ("bar".to_string(), failed_status()),
        ]);
        assert_eq!(evaluate(&statuses), (false, true));
    }

    #[test]
    fn test_evaluate_empty_map() {
        // The default-true fold makes an empty map read as all-failed.
        assert_eq!(evaluate(&Statuses::new()), (true, false));
    }

    #[test]
    fn test_status_json_shape() {
        let fixture = r#"{"ok":true,"timestamp":"2022-10-31T22:43:56.715843212Z","duration":918525104,"contiguousFailures":0,"timeOfFirstFailure":"0001-01-01T00:00:00Z"}"#;
        let status: Status = serde_json::from_str(fixture).unwrap();
        assert!(status.ok);
        assert_eq!(status.duration, Duration::from_nanos(918_525_104));
        assert_eq!(status.contiguous_failures, 0);
        assert_eq!(status.time_of_first_failure, None);

        // Round-trips to the same value.
        let encoded = serde_json::to_string(&status).unwrap();
        let decoded: Status = serde_json::from_str(&encoded).unwrap();
        assert_eq!(status, decoded);
        // The empty error message is omitted from the wire form.
        assert!(!encoded.contains("\"error\""));
    }

    #[tokio::test]
    async fn test_store_set_get_delete() {
        let store = StatusStore::new();
        assert!(store.get("missing").await.is_none());

        store.set("a", ok_status()).await;
        assert!(store.get("a").await.unwrap().ok);

        store.set("a", failed_status()).await;
        assert_eq!(store.get("a").await.unwrap().contiguous_failures, 1);

        store.delete("a").await;
        assert!(store.get("a").await.is_none());
    }
}
