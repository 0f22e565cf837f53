use keelcore::{EngineError, Result, RunId, WorkflowOutcome};
use tokio::sync::watch;

/// Handle on one execution attempt of a workflow.
///
/// Cloneable; every clone observes the same outcome. If the attempt stops
/// being tracked without an outcome (engine shutdown, failure to record the
/// result), waiters get [`EngineError::Interrupted`].
#[derive(Clone)]
pub struct WorkflowHandle {
    workflow_id: String,
    run_id: RunId,
    outcome: watch::Receiver<Option<WorkflowOutcome>>,
}

impl WorkflowHandle {
    pub(crate) fn new(
        workflow_id: impl Into<String>,
        run_id: RunId,
        outcome: watch::Receiver<Option<WorkflowOutcome>>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id,
            outcome,
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Non-blocking check for the outcome
    pub fn try_outcome(&self) -> Option<WorkflowOutcome> {
        self.outcome.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    /// Wait for the attempt to reach a terminal status
    pub async fn outcome(&self) -> Result<WorkflowOutcome> {
        let mut rx = self.outcome.clone();
        let outcome = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| EngineError::Interrupted(self.workflow_id.clone()))?;
        outcome
            .clone()
            .ok_or_else(|| EngineError::Interrupted(self.workflow_id.clone()))
    }

    /// Wait for the result. Failures of the unit of work surface here as
    /// [`EngineError::WorkflowFailed`].
    pub async fn wait(&self) -> Result<serde_json::Value> {
        match self.outcome().await? {
            WorkflowOutcome::Succeeded(value) => Ok(value),
            WorkflowOutcome::Failed(error) => Err(EngineError::WorkflowFailed {
                id: self.workflow_id.clone(),
                error,
            }),
            WorkflowOutcome::Canceled => Err(EngineError::Canceled(self.workflow_id.clone())),
        }
    }
}

impl std::fmt::Debug for WorkflowHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowHandle")
            .field("workflow_id", &self.workflow_id)
            .field("run_id", &self.run_id)
            .field("finished", &self.is_finished())
            .finish()
    }
}
