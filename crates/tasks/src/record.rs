//! Task records and the status state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reason written by startup reconciliation when it invalidates records left
/// behind by a previous process.
pub const REASON_INVALIDATED_TASK: &str = "InvalidatedTask";

/// Observable status of a task.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl TaskStatus {
    /// Whether the status is write-once terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage lifecycle bucket a record lives under. Distinct from
/// [`TaskStatus`]: all terminal statuses share the `completed` prefix, which
/// is what makes reconciliation a prefix scan over pending work only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    Queued,
    Running,
    Completed,
}

impl TaskState {
    pub const ALL: [TaskState; 3] = [Self::Queued, Self::Running, Self::Completed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted task record: immutable identity plus mutable progress.
///
/// Encoded as a self-describing JSON document. Fields written by other
/// plugin versions are captured in `extra` and rewritten verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub uuid: Uuid,
    pub status: TaskStatus,

    /// Free-text explanation, set when the status is `Failed` or `Canceled`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    /// Captured job output, persisted at completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TaskRecord {
    /// Creates a fresh queued record with a new uuid.
    pub fn new() -> Self {
        Self {
            uuid: Uuid::new_v4(),
            status: TaskStatus::Queued,
            reason: String::new(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            log: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Transitions `Queued -> Running` and stamps `started_at`.
    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.transition(TaskStatus::Running);
        self.started_at = Some(now);
    }

    /// Transitions into a terminal status and stamps `finished_at`.
    pub fn complete(
        &mut self,
        status: TaskStatus,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        self.transition(status);
        self.reason = reason.into();
        self.finished_at = Some(now);
    }

    /// Applies a status transition, aborting the process on an illegal one.
    /// The transition table is the safety net against logic bugs elsewhere;
    /// a violation means task bookkeeping can no longer be trusted.
    fn transition(&mut self, to: TaskStatus) {
        let legal = matches!(
            (self.status, to),
            (TaskStatus::Queued, TaskStatus::Running)
                | (TaskStatus::Queued, TaskStatus::Canceled)
                | (TaskStatus::Running, TaskStatus::Succeeded)
                | (TaskStatus::Running, TaskStatus::Failed)
                | (TaskStatus::Running, TaskStatus::Canceled)
        );
        if !legal {
            panic!("illegal task transition {} -> {}", self.status, to);
        }
        self.status = to;
    }

    /// Encodes the record as its storage representation.
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Decodes a record from its storage representation.
    pub fn decode(data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(data)
    }
}

impl Default for TaskRecord {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_queued() {
        let record = TaskRecord::new();
        assert_eq!(record.status, TaskStatus::Queued);
        assert!(record.started_at.is_none());
        assert!(record.finished_at.is_none());
        assert!(!record.status.is_terminal());
    }

    #[test]
    fn test_legal_lifecycle() {
        let mut record = TaskRecord::new();
        record.mark_running(Utc::now());
        assert_eq!(record.status, TaskStatus::Running);
        assert!(record.started_at.is_some());

        record.complete(TaskStatus::Succeeded, "", Utc::now());
        assert_eq!(record.status, TaskStatus::Succeeded);
        assert!(record.finished_at.is_some());
    }

    #[test]
    fn test_queued_can_cancel_directly() {
        let mut record = TaskRecord::new();
        record.complete(TaskStatus::Canceled, "canceled before start", Utc::now());
        assert_eq!(record.status, TaskStatus::Canceled);
        assert_eq!(record.reason, "canceled before start");
    }

    #[test]
    #[should_panic(expected = "illegal task transition")]
    fn test_terminal_is_write_once() {
        let mut record = TaskRecord::new();
        record.mark_running(Utc::now());
        record.complete(TaskStatus::Failed, "boom", Utc::now());
        record.complete(TaskStatus::Succeeded, "", Utc::now());
    }

    #[test]
    #[should_panic(expected = "illegal task transition")]
    fn test_queued_cannot_succeed_directly() {
        let mut record = TaskRecord::new();
        record.complete(TaskStatus::Succeeded, "", Utc::now());
    }

    #[test]
    fn test_unknown_fields_preserved_across_rewrite() {
        let mut record = TaskRecord::new();
        record.extra.insert(
            "operator_note".to_owned(),
            serde_json::Value::String("keep me".to_owned()),
        );

        let decoded = TaskRecord::decode(&record.encode().unwrap()).unwrap();
        let rewritten = TaskRecord::decode(&decoded.encode().unwrap()).unwrap();
        assert_eq!(
            rewritten.extra.get("operator_note").and_then(|v| v.as_str()),
            Some("keep me")
        );
    }

    #[test]
    fn test_status_wire_names() {
        let record = TaskRecord::new();
        let doc: serde_json::Value =
            serde_json::from_slice(&record.encode().unwrap()).unwrap();
        assert_eq!(doc["status"], "QUEUED");
    }
}
