//! # Queue data types.
//!
//! Jobs carry an opaque JSON payload. The producer layer identifies payloads
//! by a configurable unique-key field (default `"_id"`), addressed with a
//! dot path into the JSON document.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state of a job inside a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Enqueued, not yet picked up.
    Waiting,
    /// Scheduled for a later time.
    Delayed,
    /// Leased by a worker.
    Active,
    /// Finished successfully; awaiting reconciliation.
    Completed,
    /// Finished with an error; awaiting reconciliation.
    Failed,
}

impl JobState {
    /// Stable lowercase form for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Delayed => "delayed",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

/// One enqueue request inside an `add_bulk` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkJobOp {
    /// Job name under which workers consume the payload.
    pub name: String,
    /// Opaque JSON payload.
    pub data: Value,
    /// Explicit job id; `None` lets the queue assign one.
    ///
    /// Producers set this to the payload's unique-key value so re-enqueueing
    /// the same item is idempotent at the queue.
    pub job_id: Option<String>,
}

/// A job as stored by a queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Queue-wide unique id.
    pub id: String,
    /// Job name.
    pub name: String,
    /// Opaque JSON payload.
    pub data: Value,
    /// Failure message, set once the job reaches [`JobState::Failed`].
    pub failed_reason: Option<String>,
}

impl Job {
    /// Extracts the unique-key value of this job's payload, rendered as a
    /// string. `None` when the dot path does not resolve to a scalar.
    pub fn unique_value(&self, key: &str) -> Option<String> {
        value_at_path(&self.data, key).and_then(render_scalar)
    }
}

/// Resolves a dot path (`"meta.user.id"`) inside a JSON document.
pub(crate) fn value_at_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Renders a scalar JSON value for ids and metric label values.
pub(crate) fn render_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unique_value_from_top_level_key() {
        let job = Job {
            id: "1".into(),
            name: "sync".into(),
            data: json!({ "_id": "abc" }),
            failed_reason: None,
        };
        assert_eq!(job.unique_value("_id").as_deref(), Some("abc"));
    }

    #[test]
    fn test_unique_value_follows_dot_path() {
        let job = Job {
            id: "1".into(),
            name: "sync".into(),
            data: json!({ "meta": { "user": { "id": 42 } } }),
            failed_reason: None,
        };
        assert_eq!(job.unique_value("meta.user.id").as_deref(), Some("42"));
    }

    #[test]
    fn test_unique_value_missing_path_is_none() {
        let job = Job {
            id: "1".into(),
            name: "sync".into(),
            data: json!({ "x": 1 }),
            failed_reason: None,
        };
        assert_eq!(job.unique_value("_id"), None);
        assert_eq!(job.unique_value("x.y"), None);
    }

    #[test]
    fn test_non_scalar_unique_value_is_none() {
        let job = Job {
            id: "1".into(),
            name: "sync".into(),
            data: json!({ "_id": { "nested": true } }),
            failed_reason: None,
        };
        assert_eq!(job.unique_value("_id"), None);
    }
}
