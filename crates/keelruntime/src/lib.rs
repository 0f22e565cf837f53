//! Workflow execution runtime
//!
//! This crate provides the engine that runs workflows: the durable registry,
//! the lifecycle state machine, live execution tracking, resume and cancel.

mod config;
mod engine;
mod executor;
mod handle;
mod index;
mod lifecycle;
mod manager;
mod registry;
mod resume;
pub mod store;

pub use config::{EngineConfig, StorageConfig};
pub use engine::WorkflowEngine;
pub use executor::{
    LocalExecutor, PendingTask, TaskCanceller, TaskExecutor, TaskFuture, TaskOutcome, TaskRequest,
};
pub use handle::WorkflowHandle;
pub use index::StatusIndex;
pub use lifecycle::{IdGuard, LifecycleController};
pub use manager::{Admission, ExecutionManager};
pub use registry::{TaskFactory, TaskMetadata, TaskRegistry};
pub use resume::ResumeCoordinator;
pub use store::{MemoryStore, RedbStore, WorkflowStore};
