use crate::WorkflowStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type WorkflowId = String;

/// Identifies one execution attempt of a workflow
pub type RunId = Uuid;

/// Durable description of a unit of work.
///
/// This is the workflow's checkpoint: it names a task type registered with the
/// runtime and carries everything needed to run it again after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub task_type: String,
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl TaskSpec {
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            args: serde_json::Value::Null,
            retry_policy: None,
            timeout_ms: None,
        }
    }

    pub fn with_args(mut self, args: serde_json::Value) -> Self {
        self.args = args;
        self
    }

    /// Set a single argument, turning `args` into an object if needed
    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        if !self.args.is_object() {
            self.args = serde_json::Value::Object(serde_json::Map::new());
        }
        if let serde_json::Value::Object(map) = &mut self.args {
            map.insert(key.into(), value.into());
        }
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, delay_ms: u64) -> Self {
        self.retry_policy = Some(RetryPolicy {
            max_attempts,
            delay_ms,
            backoff_multiplier: 1.0,
        });
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// Retry policy applied by the executor within a single execution attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> u64 {
        let factor = self.backoff_multiplier.max(1.0).powi(retry.saturating_sub(1) as i32);
        (self.delay_ms as f64 * factor) as u64
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 1000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Outcome stored on a record after its last RUNNING -> terminal transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RecordOutcome {
    Success(serde_json::Value),
    Failure(String),
}

/// One entry of the workflow registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub id: WorkflowId,
    pub status: WorkflowStatus,
    pub checkpoint: TaskSpec,
    #[serde(default)]
    pub outcome: Option<RecordOutcome>,
    /// Number of times the workflow entered RUNNING
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRecord {
    /// A freshly submitted record, already RUNNING
    pub fn new(id: impl Into<WorkflowId>, checkpoint: TaskSpec) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            status: WorkflowStatus::Running,
            checkpoint,
            outcome: None,
            attempts: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn result(&self) -> Option<&serde_json::Value> {
        match &self.outcome {
            Some(RecordOutcome::Success(value)) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            Some(RecordOutcome::Failure(error)) => Some(error),
            _ => None,
        }
    }
}

/// What a waiter on a workflow handle eventually observes
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowOutcome {
    Succeeded(serde_json::Value),
    Failed(String),
    Canceled,
}

impl WorkflowOutcome {
    pub fn status(&self) -> WorkflowStatus {
        match self {
            WorkflowOutcome::Succeeded(_) => WorkflowStatus::Successful,
            WorkflowOutcome::Failed(_) => WorkflowStatus::Failed,
            WorkflowOutcome::Canceled => WorkflowStatus::Canceled,
        }
    }
}
