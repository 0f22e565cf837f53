use crate::{events::EventEmitter, TaskError};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Core trait that all executable units of work implement
#[async_trait]
pub trait Task: Send + Sync {
    /// Unique type identifier (e.g., "debug.echo", "time.delay")
    fn task_type(&self) -> &str;

    /// Run the unit of work. The returned value becomes the workflow result.
    async fn run(&self, ctx: TaskContext) -> Result<serde_json::Value, TaskError>;
}

/// Execution context passed to each task run
#[derive(Clone)]
pub struct TaskContext {
    pub workflow_id: String,

    /// Workflow-level attempt (1 on submit, +1 per resume)
    pub attempt: u32,

    /// Executor-level retry within the attempt, starting at 1
    pub try_number: u32,

    /// Arguments from the checkpoint
    pub args: serde_json::Value,

    /// Event emitter for progress updates
    pub events: EventEmitter,

    /// Fired when the workflow is canceled or the engine shuts down
    pub cancellation: CancellationToken,
}

impl TaskContext {
    pub fn new(workflow_id: impl Into<String>, args: serde_json::Value, events: EventEmitter) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            attempt: 1,
            try_number: 1,
            args,
            events,
            cancellation: CancellationToken::new(),
        }
    }

    /// Get required argument or return error
    pub fn require_arg(&self, name: &str) -> Result<&serde_json::Value, TaskError> {
        self.args
            .get(name)
            .ok_or_else(|| TaskError::MissingArgument(name.to_string()))
    }

    pub fn arg_str(&self, name: &str) -> Option<&str> {
        self.args.get(name).and_then(|v| v.as_str())
    }

    pub fn arg_u64(&self, name: &str) -> Option<u64> {
        self.args.get(name).and_then(|v| v.as_u64())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
