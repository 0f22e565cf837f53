//! Boundary to whatever actually runs units of work.
//!
//! The engine only needs to hand over a checkpoint, get back work it can
//! start once the status change has committed, and then wait on or cancel it. [`LocalExecutor`] is the in-process
//! implementation on top of tokio; anything else implementing
//! [`TaskExecutor`] can be plugged into the engine instead.

use crate::registry::TaskRegistry;
use futures::future::BoxFuture;
use futures::FutureExt;
use keelcore::{EngineError, EventBus, RunId, Task, TaskContext, TaskError, TaskEvent, TaskSpec};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{sleep, timeout, Duration};
use tokio_util::sync::CancellationToken;

/// Result of one unit of work
pub type TaskOutcome = Result<serde_json::Value, TaskError>;

/// Everything an executor needs to run one execution attempt
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub workflow_id: String,
    pub run_id: RunId,
    pub attempt: u32,
    pub spec: TaskSpec,
}

/// Capability the engine requires from an execution facility
pub trait TaskExecutor: Send + Sync {
    /// Prepare the unit of work. Nothing runs until [`PendingTask::start`].
    ///
    /// Fails when the checkpoint cannot be run at all (e.g. an unknown task
    /// type).
    fn submit(&self, request: TaskRequest) -> Result<PendingTask, EngineError>;
}

/// Unit of work that has been accepted but not started. Dropping it
/// discards the work.
pub struct PendingTask {
    work: BoxFuture<'static, TaskOutcome>,
    cancellation: CancellationToken,
}

impl PendingTask {
    pub fn new<F>(cancellation: CancellationToken, work: F) -> Self
    where
        F: Future<Output = TaskOutcome> + Send + 'static,
    {
        Self {
            work: work.boxed(),
            cancellation,
        }
    }

    /// Spawn the work on the current tokio runtime
    pub fn start(self) -> TaskFuture {
        TaskFuture {
            handle: tokio::spawn(self.work),
            cancellation: self.cancellation,
        }
    }
}

/// In-flight unit of work
pub struct TaskFuture {
    handle: JoinHandle<TaskOutcome>,
    cancellation: CancellationToken,
}

impl TaskFuture {

    /// Non-blocking completion check
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Best-effort cancellation
    pub fn cancel(&self) {
        self.canceller().cancel();
    }

    /// Detached handle that can cancel this future after it has been moved
    pub fn canceller(&self) -> TaskCanceller {
        TaskCanceller {
            cancellation: self.cancellation.clone(),
            abort: self.handle.abort_handle(),
        }
    }

    /// Wait for the outcome. Aborted and panicked runs become failures.
    pub async fn wait(self) -> TaskOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => Err(TaskError::Cancelled),
            Err(e) => Err(TaskError::ExecutionFailed(format!("task panicked: {}", e))),
        }
    }
}

/// Cancels a [`TaskFuture`]: signals the task's token, then aborts it at its
/// next suspension point.
#[derive(Clone)]
pub struct TaskCanceller {
    cancellation: CancellationToken,
    abort: AbortHandle,
}

impl TaskCanceller {
    pub fn cancel(&self) {
        self.cancellation.cancel();
        self.abort.abort();
    }
}

/// Runs tasks from a [`TaskRegistry`] as tokio tasks in this process
pub struct LocalExecutor {
    registry: Arc<TaskRegistry>,
    events: Arc<EventBus>,
    permits: Arc<Semaphore>,
    default_timeout_ms: Option<u64>,
}

impl LocalExecutor {
    pub fn new(registry: Arc<TaskRegistry>, events: Arc<EventBus>, max_concurrent_tasks: usize) -> Self {
        Self {
            registry,
            events,
            permits: Arc::new(Semaphore::new(max_concurrent_tasks.max(1))),
            default_timeout_ms: None,
        }
    }

    /// Timeout applied to checkpoints that do not carry their own
    pub fn with_default_timeout_ms(mut self, timeout_ms: Option<u64>) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }
}

impl TaskExecutor for LocalExecutor {
    fn submit(&self, request: TaskRequest) -> Result<PendingTask, EngineError> {
        if !self.registry.contains(&request.spec.task_type) {
            return Err(EngineError::UnknownTaskType(request.spec.task_type));
        }

        let cancellation = CancellationToken::new();
        let mut ctx = TaskContext::new(
            request.workflow_id.clone(),
            request.spec.args.clone(),
            self.events.create_emitter(&request.workflow_id, request.run_id),
        );
        ctx.attempt = request.attempt;
        ctx.cancellation = cancellation.clone();

        let run = LocalRun {
            registry: Arc::clone(&self.registry),
            permits: Arc::clone(&self.permits),
            timeout_ms: request.spec.timeout_ms.or(self.default_timeout_ms),
            spec: request.spec,
            ctx,
        };

        Ok(PendingTask::new(cancellation, run.execute()))
    }
}

/// One execution attempt on the local executor
struct LocalRun {
    registry: Arc<TaskRegistry>,
    permits: Arc<Semaphore>,
    timeout_ms: Option<u64>,
    spec: TaskSpec,
    ctx: TaskContext,
}

impl LocalRun {
    async fn execute(self) -> TaskOutcome {
        let cancellation = self.ctx.cancellation.clone();

        let _permit = tokio::select! {
            _ = cancellation.cancelled() => return Err(TaskError::Cancelled),
            permit = Arc::clone(&self.permits).acquire_owned() => {
                permit.map_err(|_| TaskError::Cancelled)?
            }
        };

        let task = self.registry.create_task(&self.spec).map_err(|e| match e {
            EngineError::Task(inner) => inner,
            other => TaskError::InitializationFailed(other.to_string()),
        })?;

        let max_tries = self
            .spec
            .retry_policy
            .as_ref()
            .map(|p| p.max_attempts.max(1))
            .unwrap_or(1);

        let mut try_number = 1;
        loop {
            let result = self.run_once(task.as_ref(), try_number).await;

            let error = match result {
                Ok(value) => return Ok(value),
                Err(TaskError::Cancelled) => return Err(TaskError::Cancelled),
                Err(e) => e,
            };

            if try_number >= max_tries || self.ctx.is_cancelled() {
                return Err(error);
            }

            let delay_ms = self
                .spec
                .retry_policy
                .as_ref()
                .map(|p| p.delay_for(try_number))
                .unwrap_or(0);
            tracing::warn!(
                "Task {} of workflow {} failed (try {}/{}), retrying in {}ms: {}",
                self.spec.task_type,
                self.ctx.workflow_id,
                try_number,
                max_tries,
                delay_ms,
                error
            );
            self.ctx.events.emit(TaskEvent::Retrying {
                try_number,
                error: error.to_string(),
            });

            tokio::select! {
                _ = cancellation.cancelled() => return Err(TaskError::Cancelled),
                _ = sleep(Duration::from_millis(delay_ms)) => {}
            }
            try_number += 1;
        }
    }

    async fn run_once(&self, task: &dyn Task, try_number: u32) -> TaskOutcome {
        let mut ctx = self.ctx.clone();
        ctx.try_number = try_number;

        match self.timeout_ms {
            Some(millis) => match timeout(Duration::from_millis(millis), task.run(ctx)).await {
                Ok(result) => result,
                Err(_) => Err(TaskError::Timeout { millis }),
            },
            None => task.run(ctx).await,
        }
    }
}
