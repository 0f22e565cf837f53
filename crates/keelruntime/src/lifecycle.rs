//! Workflow status state machine.
//!
//! All registry mutation goes through [`LifecycleController`]. Callers first
//! take the per-ID lock with [`LifecycleController::acquire`]; the resulting
//! [`IdGuard`] is required by every mutating method, so a read-check-write
//! of one workflow's status is never interleaved with another for the same
//! ID. Unrelated IDs never wait on each other. A per-ID lock lives only as
//! long as someone holds or waits for it.

use crate::store::WorkflowStore;
use chrono::Utc;
use keelcore::{EngineError, EventBus, RecordOutcome, Result, TaskSpec, WorkflowRecord, WorkflowStatus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

/// Proof of exclusive access to one workflow ID
pub struct IdGuard {
    id: String,
    lock: Arc<AsyncMutex<()>>,
    locks: Arc<LockMap>,
    _held: OwnedMutexGuard<()>,
}

impl IdGuard {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for IdGuard {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // The map, `lock` and `_held` account for three references; any
        // more belong to acquirers still waiting for this ID.
        if Arc::strong_count(&self.lock) <= 3 {
            locks.remove(&self.id);
        }
    }
}

pub struct LifecycleController {
    store: Arc<dyn WorkflowStore>,
    events: Arc<EventBus>,
    locks: Arc<LockMap>,
}

impl LifecycleController {
    pub fn new(store: Arc<dyn WorkflowStore>, events: Arc<EventBus>) -> Self {
        Self {
            store,
            events,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Wait for exclusive access to `id`
    pub async fn acquire(&self, id: &str) -> IdGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(id.to_string()).or_default())
        };
        let held = Arc::clone(&lock).lock_owned().await;
        IdGuard {
            id: id.to_string(),
            lock,
            locks: Arc::clone(&self.locks),
            _held: held,
        }
    }

    /// Number of IDs that currently have a lock allocated
    pub fn lock_count(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Last committed record for `id`
    pub async fn get(&self, id: &str) -> Result<WorkflowRecord> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }

    /// (none) -> RUNNING
    pub async fn create(&self, guard: &IdGuard, checkpoint: TaskSpec) -> Result<WorkflowRecord> {
        let record = WorkflowRecord::new(guard.id(), checkpoint);
        self.store.create(&record).await?;

        tracing::debug!("Workflow {}: created as {}", record.id, record.status);
        self.events
            .status_changed(&record.id, None, record.status, record.attempts);
        Ok(record)
    }

    /// Compare-and-set transition from `expected` to `next`.
    ///
    /// Fails with `InvalidState` when the committed status is not `expected`
    /// or the state machine forbids the move. Entering RUNNING bumps the
    /// attempt counter; `outcome`, when given, replaces the stored one.
    pub async fn transition(
        &self,
        guard: &IdGuard,
        expected: WorkflowStatus,
        next: WorkflowStatus,
        outcome: Option<RecordOutcome>,
    ) -> Result<WorkflowRecord> {
        let mut record = self.get(guard.id()).await?;

        if record.status != expected || !record.status.can_transition_to(next) {
            return Err(EngineError::InvalidState {
                id: record.id,
                status: record.status,
                operation: operation_for(next),
            });
        }

        let from = record.status;
        if next == WorkflowStatus::Running {
            record.attempts += 1;
        }
        if outcome.is_some() {
            record.outcome = outcome;
        }
        record.status = next;
        record.updated_at = Utc::now();

        self.store.update(&record).await?;

        tracing::debug!("Workflow {}: {} -> {} (attempt {})", record.id, from, next, record.attempts);
        self.events
            .status_changed(&record.id, Some(from), next, record.attempts);
        Ok(record)
    }
}

fn operation_for(next: WorkflowStatus) -> &'static str {
    match next {
        WorkflowStatus::Running => "resume",
        WorkflowStatus::Canceled => "cancel",
        WorkflowStatus::Successful | WorkflowStatus::Failed => "complete",
    }
}
