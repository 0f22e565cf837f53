//! Core abstractions for the keel workflow engine
//!
//! Statuses, registry records, checkpoints, the task trait and the error
//! taxonomy shared by the runtime, the built-in tasks and the CLI.

mod error;
pub mod events;
mod record;
mod status;
mod task;

pub use error::{EngineError, StoreError, TaskError};
pub use events::{EventBus, EventEmitter, TaskEvent, WorkflowEvent};
pub use record::{
    RecordOutcome, RetryPolicy, RunId, TaskSpec, WorkflowId, WorkflowOutcome, WorkflowRecord,
};
pub use status::{StatusFilter, WorkflowStatus};
pub use task::{Task, TaskContext};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
