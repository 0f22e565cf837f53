use crate::WorkflowStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("Workflow already exists: {0}")]
    AlreadyExists(String),

    #[error("Workflow already running: {0}")]
    AlreadyRunning(String),

    #[error("Cannot {operation} workflow '{id}' while {status}")]
    InvalidState {
        id: String,
        status: WorkflowStatus,
        operation: &'static str,
    },

    #[error("Invalid workflow id: {0:?}")]
    InvalidId(String),

    #[error("Unknown workflow status: {0}")]
    InvalidStatus(String),

    #[error("Unknown task type: {0}")]
    UnknownTaskType(String),

    #[error("Workflow '{id}' failed: {error}")]
    WorkflowFailed { id: String, error: String },

    #[error("Workflow '{0}' was canceled")]
    Canceled(String),

    #[error("Workflow '{0}' was interrupted before it finished")]
    Interrupted(String),

    #[error("Engine is shut down")]
    ShutDown,

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Storage error: {0}")]
    Storage(#[source] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Errors `resume_all` drops silently when a workflow left the snapshot state
    pub fn is_raced(&self) -> bool {
        matches!(
            self,
            EngineError::NotFound(_) | EngineError::InvalidState { .. } | EngineError::AlreadyRunning(_)
        )
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => EngineError::NotFound(id),
            StoreError::AlreadyExists(id) => EngineError::AlreadyExists(id),
            other => EngineError::Storage(other),
        }
    }
}

impl From<std::convert::Infallible> for EngineError {
    fn from(never: std::convert::Infallible) -> Self {
        match never {}
    }
}

/// Failure of a unit of work. Recorded on the workflow, never raised by the engine itself.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskError {
    #[error("Missing required argument: {0}")]
    MissingArgument(String),

    #[error("Invalid argument '{field}': expected {expected}")]
    InvalidArgument { field: String, expected: String },

    #[error("Task initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timeout after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Cancelled")]
    Cancelled,
}

/// Errors from the workflow registry
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// Registry contents violate an engine invariant
    #[error("corrupted registry: {0}")]
    Corrupted(String),
}
