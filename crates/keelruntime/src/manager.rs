//! Live executions.
//!
//! The manager maps each running workflow ID to the one execution attempt
//! allowed to finish it. Entries are added and removed only while the
//! caller holds that ID's [`IdGuard`]; a completion whose entry is gone
//! (canceled, superseded, or shut down) is discarded without touching the
//! registry.

use crate::executor::{TaskCanceller, TaskExecutor, TaskOutcome, TaskRequest};
use crate::handle::WorkflowHandle;
use crate::lifecycle::{IdGuard, LifecycleController};
use chrono::Utc;
use keelcore::{
    EngineError, EventBus, RecordOutcome, Result, RunId, TaskSpec, WorkflowEvent, WorkflowOutcome,
    WorkflowRecord, WorkflowStatus,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

/// How a workflow enters RUNNING
pub enum Admission {
    /// First submission; creates the record
    Submit(TaskSpec),
    /// Re-run of an existing record from its checkpoint
    Resume(WorkflowRecord),
}

struct LiveEntry {
    run_id: RunId,
    canceller: TaskCanceller,
    outcome: watch::Sender<Option<WorkflowOutcome>>,
}

pub struct ExecutionManager {
    lifecycle: Arc<LifecycleController>,
    executor: Arc<dyn TaskExecutor>,
    events: Arc<EventBus>,
    live: Mutex<HashMap<String, LiveEntry>>,
    watchers: TaskTracker,
    closed: AtomicBool,
}

impl ExecutionManager {
    pub fn new(
        lifecycle: Arc<LifecycleController>,
        executor: Arc<dyn TaskExecutor>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            lifecycle,
            executor,
            events,
            live: Mutex::new(HashMap::new()),
            watchers: TaskTracker::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn live(&self) -> MutexGuard<'_, HashMap<String, LiveEntry>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether an execution attempt is currently live for `id`
    pub fn is_live(&self, id: &str) -> bool {
        self.live().contains_key(id)
    }

    pub fn live_count(&self) -> usize {
        self.live().len()
    }

    /// A new handle on the live attempt for `id`, if any
    pub fn subscribe(&self, id: &str) -> Option<WorkflowHandle> {
        self.live()
            .get(id)
            .map(|entry| WorkflowHandle::new(id, entry.run_id, entry.outcome.subscribe()))
    }

    /// Start an execution attempt and move the workflow to RUNNING.
    ///
    /// The executor accepts the unit of work before the status changes, so a
    /// checkpoint it rejects leaves the record untouched. The work is only
    /// spawned once RUNNING has committed.
    pub async fn start(self: &Arc<Self>, guard: &IdGuard, admission: Admission) -> Result<WorkflowHandle> {
        let id = guard.id().to_string();

        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::ShutDown);
        }
        if self.is_live(&id) {
            return Err(EngineError::AlreadyRunning(id));
        }

        let (spec, attempt) = match &admission {
            Admission::Submit(spec) => (spec.clone(), 1),
            Admission::Resume(record) => (record.checkpoint.clone(), record.attempts + 1),
        };
        let run_id = Uuid::new_v4();
        let pending = self.executor.submit(TaskRequest {
            workflow_id: id.clone(),
            run_id,
            attempt,
            spec,
        })?;

        let entered = match admission {
            Admission::Submit(spec) => self.lifecycle.create(guard, spec).await,
            Admission::Resume(record) => {
                self.lifecycle
                    .transition(guard, record.status, WorkflowStatus::Running, None)
                    .await
            }
        };
        entered?;

        let (tx, rx) = watch::channel(None);
        let future = {
            let mut live = self.live();
            // shutdown() may have drained the map while the transition committed
            if self.closed.load(Ordering::SeqCst) {
                return Err(EngineError::ShutDown);
            }
            let future = pending.start();
            live.insert(
                id.clone(),
                LiveEntry {
                    run_id,
                    canceller: future.canceller(),
                    outcome: tx,
                },
            );
            future
        };

        let manager = Arc::clone(self);
        let watched_id = id.clone();
        self.watchers.spawn(async move {
            let outcome = future.wait().await;
            manager.complete(&watched_id, run_id, outcome).await;
        });

        tracing::info!("Workflow {} started (run {})", id, run_id);
        Ok(WorkflowHandle::new(id, run_id, rx))
    }

    /// Record the outcome of attempt `run_id`, unless it is no longer live
    async fn complete(&self, id: &str, run_id: RunId, outcome: TaskOutcome) {
        let guard = self.lifecycle.acquire(id).await;

        let entry = {
            let mut live = self.live();
            match live.get(id) {
                Some(entry) if entry.run_id == run_id => live.remove(id),
                _ => None,
            }
        };
        let Some(entry) = entry else {
            tracing::debug!("Discarding outcome of workflow {} run {}: no longer live", id, run_id);
            self.events.emit(WorkflowEvent::OutcomeDiscarded {
                workflow_id: id.to_string(),
                run_id,
                timestamp: Utc::now(),
            });
            return;
        };

        let (next, stored, observed) = match outcome {
            Ok(value) => (
                WorkflowStatus::Successful,
                RecordOutcome::Success(value.clone()),
                WorkflowOutcome::Succeeded(value),
            ),
            Err(error) => {
                tracing::info!("Workflow {} failed: {}", id, error);
                (
                    WorkflowStatus::Failed,
                    RecordOutcome::Failure(error.to_string()),
                    WorkflowOutcome::Failed(error.to_string()),
                )
            }
        };

        match self
            .lifecycle
            .transition(&guard, WorkflowStatus::Running, next, Some(stored))
            .await
        {
            Ok(_) => {
                entry.outcome.send_replace(Some(observed));
            }
            Err(e) => {
                // Dropping the entry wakes waiters with Interrupted.
                tracing::error!("Failed to record outcome of workflow {}: {}", id, e);
            }
        }
    }

    /// RUNNING -> CANCELED.
    ///
    /// The live attempt, if any, is asked to stop; the status change does not
    /// wait for it. A RUNNING record with no live attempt (left over from a
    /// previous process) is canceled at the status level only.
    pub async fn cancel(&self, guard: &IdGuard) -> Result<WorkflowRecord> {
        let id = guard.id();
        let record = self.lifecycle.get(id).await?;
        if record.status != WorkflowStatus::Running {
            return Err(EngineError::InvalidState {
                id: record.id,
                status: record.status,
                operation: "cancel",
            });
        }

        let entry = self.live().remove(id);
        match &entry {
            Some(entry) => entry.canceller.cancel(),
            None => tracing::warn!("Workflow {} has no live execution, canceling its record only", id),
        }

        let record = self
            .lifecycle
            .transition(guard, WorkflowStatus::Running, WorkflowStatus::Canceled, None)
            .await?;

        if let Some(entry) = entry {
            entry.outcome.send_replace(Some(WorkflowOutcome::Canceled));
        }
        tracing::info!("Workflow {} canceled", id);
        Ok(record)
    }

    /// Stop every live attempt without touching the registry, then wait for
    /// their completions to be observed and discarded.
    ///
    /// Their records stay RUNNING and can be resumed by the next engine that
    /// opens the same registry. Further starts fail with `ShutDown`.
    pub async fn shutdown(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        let drained: Vec<(String, LiveEntry)> = self.live().drain().collect();
        for (id, entry) in &drained {
            tracing::debug!("Interrupting workflow {} run {}", id, entry.run_id);
            entry.canceller.cancel();
        }
        let interrupted = drained.len();
        drop(drained);

        self.watchers.close();
        self.watchers.wait().await;
        interrupted
    }
}
