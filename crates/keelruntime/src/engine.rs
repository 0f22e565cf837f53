use crate::config::{EngineConfig, StorageConfig};
use crate::executor::{LocalExecutor, TaskExecutor};
use crate::handle::WorkflowHandle;
use crate::index::StatusIndex;
use crate::lifecycle::LifecycleController;
use crate::manager::{Admission, ExecutionManager};
use crate::registry::TaskRegistry;
use crate::resume::ResumeCoordinator;
use crate::store::{MemoryStore, RedbStore, WorkflowStore};
use chrono::Utc;
use keelcore::{
    EngineError, EventBus, Result, StatusFilter, StoreError, TaskSpec, WorkflowEvent, WorkflowRecord,
    WorkflowStatus,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Durable workflow engine.
///
/// Owns the registry for its whole lifetime; every component receives a
/// reference to it. Dropping the engine without [`WorkflowEngine::shutdown`]
/// leaves executions running until they finish.
pub struct WorkflowEngine {
    store: Arc<dyn WorkflowStore>,
    events: Arc<EventBus>,
    index: StatusIndex,
    lifecycle: Arc<LifecycleController>,
    manager: Arc<ExecutionManager>,
    resumer: ResumeCoordinator,
}

impl WorkflowEngine {
    /// Open the configured registry and run tasks from `registry` locally
    pub async fn open(config: EngineConfig, registry: TaskRegistry) -> Result<Self> {
        let store: Arc<dyn WorkflowStore> = match &config.storage {
            StorageConfig::Memory => Arc::new(MemoryStore::new()),
            StorageConfig::Redb { path } => {
                tracing::info!("Opening workflow registry at {}", path.display());
                Arc::new(RedbStore::open(path)?)
            }
        };

        let engine = Self::with_store(&config, store, registry);

        let stale = engine.index.count(&StatusFilter::only(WorkflowStatus::Running)).await?;
        if stale > 0 {
            tracing::warn!(
                "{} workflows were left RUNNING by a previous process; recover them to make progress",
                stale
            );
        }
        Ok(engine)
    }

    /// Build an engine over an existing store with the local executor
    pub fn with_store(config: &EngineConfig, store: Arc<dyn WorkflowStore>, registry: TaskRegistry) -> Self {
        let events = Arc::new(EventBus::new(config.event_buffer_size));
        let executor = LocalExecutor::new(Arc::new(registry), Arc::clone(&events), config.max_concurrent_tasks)
            .with_default_timeout_ms(config.default_task_timeout_ms);
        Self::with_parts(store, Arc::new(executor), events)
    }

    /// Build an engine from explicit parts, e.g. a remote executor
    pub fn with_parts(
        store: Arc<dyn WorkflowStore>,
        executor: Arc<dyn TaskExecutor>,
        events: Arc<EventBus>,
    ) -> Self {
        let index = StatusIndex::new(Arc::clone(&store));
        let lifecycle = Arc::new(LifecycleController::new(Arc::clone(&store), Arc::clone(&events)));
        let manager = Arc::new(ExecutionManager::new(
            Arc::clone(&lifecycle),
            executor,
            Arc::clone(&events),
        ));
        let resumer = ResumeCoordinator::new(Arc::clone(&lifecycle), Arc::clone(&manager), index.clone());

        Self {
            store,
            events,
            index,
            lifecycle,
            manager,
            resumer,
        }
    }

    /// Start a new workflow. Returns once it is RUNNING; the work itself
    /// continues in the background.
    pub async fn submit(&self, id: impl Into<String>, task: TaskSpec) -> Result<WorkflowHandle> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(EngineError::InvalidId(id));
        }

        let guard = self.lifecycle.acquire(&id).await;
        if self.store.get(&id).await?.is_some() {
            return Err(EngineError::AlreadyExists(id));
        }

        tracing::info!("Submitting workflow {} ({})", id, task.task_type);
        self.events.emit(WorkflowEvent::Submitted {
            workflow_id: id.clone(),
            task_type: task.task_type.clone(),
            timestamp: Utc::now(),
        });
        self.manager.start(&guard, Admission::Submit(task)).await
    }

    /// Submit under an engine-generated ID
    pub async fn submit_auto(&self, task: TaskSpec) -> Result<WorkflowHandle> {
        self.submit(Uuid::new_v4().to_string(), task).await
    }

    /// Submit and wait for the result
    pub async fn run(&self, id: impl Into<String>, task: TaskSpec) -> Result<serde_json::Value> {
        self.submit(id, task).await?.wait().await
    }

    pub async fn get_status(&self, id: &str) -> Result<WorkflowStatus> {
        Ok(self.lifecycle.get(id).await?.status)
    }

    /// Full registry record for `id`
    pub async fn get_metadata(&self, id: &str) -> Result<WorkflowRecord> {
        self.lifecycle.get(id).await
    }

    /// Result of the workflow, waiting for the live attempt if there is one
    pub async fn get_output(&self, id: &str) -> Result<serde_json::Value> {
        let record = self.lifecycle.get(id).await?;
        if record.status.is_terminal() {
            return output_of(record);
        }
        if let Some(handle) = self.manager.subscribe(id) {
            return handle.wait().await;
        }

        // The attempt may have finished between the two reads.
        let record = self.lifecycle.get(id).await?;
        match record.status {
            WorkflowStatus::Running => match self.manager.subscribe(id) {
                Some(handle) => handle.wait().await,
                None => Err(EngineError::Interrupted(record.id)),
            },
            _ => output_of(record),
        }
    }

    /// `(id, status)` of workflows matching `filter`, in submission order.
    /// An empty filter lists everything.
    ///
    /// Accepts anything convertible to a [`StatusFilter`], including status
    /// labels such as `"FAILED"` or `["failed", "canceled"]`; an unknown
    /// label fails with `InvalidStatus`.
    pub async fn list_all<F>(&self, filter: F) -> Result<Vec<(String, WorkflowStatus)>>
    where
        F: TryInto<StatusFilter>,
        F::Error: Into<EngineError>,
    {
        let filter = filter.try_into().map_err(|e: F::Error| -> EngineError { e.into() })?;
        self.index.list(&filter).await
    }

    pub async fn resume(&self, id: &str) -> Result<WorkflowHandle> {
        self.resumer.resume(id).await
    }

    pub async fn resume_all(&self, include_failed: bool) -> Result<Vec<(String, WorkflowHandle)>> {
        self.resumer.resume_all(include_failed).await
    }

    pub async fn recover_stale(&self) -> Result<Vec<(String, WorkflowHandle)>> {
        self.resumer.recover_stale().await
    }

    pub async fn cancel(&self, id: &str) -> Result<()> {
        let guard = self.lifecycle.acquire(id).await;
        self.manager.cancel(&guard).await?;
        Ok(())
    }

    /// Number of executions currently live in this engine
    pub fn live_count(&self) -> usize {
        self.manager.live_count()
    }

    /// Subscribe to lifecycle events
    pub fn subscribe_events(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.events.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Interrupt all live executions. Their records stay RUNNING.
    pub async fn shutdown(&self) {
        let interrupted = self.manager.shutdown().await;
        tracing::info!("Engine shut down, interrupted {} workflows", interrupted);
    }
}

fn output_of(record: WorkflowRecord) -> Result<serde_json::Value> {
    match record.status {
        WorkflowStatus::Successful => record.result().cloned().ok_or_else(|| {
            EngineError::Storage(StoreError::Corrupted(format!(
                "workflow {} is SUCCESSFUL without a result",
                record.id
            )))
        }),
        WorkflowStatus::Failed => Err(EngineError::WorkflowFailed {
            error: record.error().unwrap_or_default().to_string(),
            id: record.id,
        }),
        WorkflowStatus::Canceled => Err(EngineError::Canceled(record.id)),
        WorkflowStatus::Running => Err(EngineError::Interrupted(record.id)),
    }
}
