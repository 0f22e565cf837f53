use crate::handle::WorkflowHandle;
use crate::index::StatusIndex;
use crate::lifecycle::LifecycleController;
use crate::manager::{Admission, ExecutionManager};
use keelcore::{EngineError, Result, StatusFilter, WorkflowStatus};
use std::sync::Arc;

/// Re-enters FAILED, CANCELED and stale RUNNING workflows into RUNNING
pub struct ResumeCoordinator {
    lifecycle: Arc<LifecycleController>,
    manager: Arc<ExecutionManager>,
    index: StatusIndex,
}

impl ResumeCoordinator {
    pub fn new(lifecycle: Arc<LifecycleController>, manager: Arc<ExecutionManager>, index: StatusIndex) -> Self {
        Self {
            lifecycle,
            manager,
            index,
        }
    }

    /// Resume one workflow from its checkpoint.
    ///
    /// Concurrent calls for the same ID serialize on its lock: the first
    /// starts an attempt, the others find it RUNNING and get `InvalidState`.
    /// A RUNNING record with no live attempt in this engine is stale and is
    /// recovered.
    pub async fn resume(&self, id: &str) -> Result<WorkflowHandle> {
        let guard = self.lifecycle.acquire(id).await;
        let record = self.lifecycle.get(id).await?;

        match record.status {
            WorkflowStatus::Successful => Err(EngineError::InvalidState {
                id: record.id,
                status: record.status,
                operation: "resume",
            }),
            WorkflowStatus::Running if self.manager.is_live(id) => Err(EngineError::InvalidState {
                id: record.id,
                status: record.status,
                operation: "resume",
            }),
            status => {
                if status == WorkflowStatus::Running {
                    tracing::warn!("Workflow {} was left RUNNING without an execution, recovering", id);
                }
                tracing::info!("Resuming workflow {} from {}", id, status);
                self.manager.start(&guard, Admission::Resume(record)).await
            }
        }
    }

    /// Resume everything resumable at one point in time.
    ///
    /// The candidate set is a single snapshot of CANCELED (plus FAILED when
    /// `include_failed`) workflows. Candidates that left that state before
    /// their turn are skipped, not retried.
    pub async fn resume_all(&self, include_failed: bool) -> Result<Vec<(String, WorkflowHandle)>> {
        let mut filter = StatusFilter::only(WorkflowStatus::Canceled);
        if include_failed {
            filter = filter.with(WorkflowStatus::Failed);
        }
        self.resume_snapshot(&filter).await
    }

    /// Resume every RUNNING workflow that has no live attempt in this
    /// engine, typically those interrupted by a previous process.
    pub async fn recover_stale(&self) -> Result<Vec<(String, WorkflowHandle)>> {
        self.resume_snapshot(&StatusFilter::only(WorkflowStatus::Running)).await
    }

    /// Resume each workflow of one `filter` snapshot in turn.
    ///
    /// A candidate that cannot be resumed does not stop the others; it is
    /// logged and left as it is. Only shutting down ends the pass early.
    async fn resume_snapshot(&self, filter: &StatusFilter) -> Result<Vec<(String, WorkflowHandle)>> {
        let candidates: Vec<String> = self
            .index
            .list(filter)
            .await?
            .into_iter()
            .filter(|(id, status)| *status != WorkflowStatus::Running || !self.manager.is_live(id))
            .map(|(id, _)| id)
            .collect();

        tracing::info!("Resuming {} workflows", candidates.len());

        let mut resumed = Vec::with_capacity(candidates.len());
        for id in candidates {
            match self.resume(&id).await {
                Ok(handle) => resumed.push((id, handle)),
                Err(e) if e.is_raced() => {
                    tracing::debug!("Skipping workflow {}: {}", id, e);
                }
                Err(EngineError::ShutDown) => {
                    tracing::warn!("Engine shut down after resuming {} workflows", resumed.len());
                    break;
                }
                Err(e) => {
                    tracing::warn!("Could not resume workflow {}: {}", id, e);
                }
            }
        }
        Ok(resumed)
    }
}
