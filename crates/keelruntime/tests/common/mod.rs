// Shared fixtures for the runtime integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use keelcore::{Task, TaskContext, TaskError};
use keelruntime::{EngineConfig, TaskFactory, TaskRegistry, WorkflowEngine};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

type RunFn = Arc<dyn Fn(TaskContext) -> BoxFuture<'static, Result<Value, TaskError>> + Send + Sync>;

struct FnTask {
    task_type: String,
    run: RunFn,
}

#[async_trait]
impl Task for FnTask {
    fn task_type(&self) -> &str {
        &self.task_type
    }

    async fn run(&self, ctx: TaskContext) -> Result<Value, TaskError> {
        (self.run)(ctx).await
    }
}

struct FnFactory {
    task_type: String,
    run: RunFn,
}

impl TaskFactory for FnFactory {
    fn create(&self, _args: &Value) -> Result<Box<dyn Task>, TaskError> {
        Ok(Box::new(FnTask {
            task_type: self.task_type.clone(),
            run: Arc::clone(&self.run),
        }))
    }

    fn task_type(&self) -> &str {
        &self.task_type
    }
}

/// Factory for a task type whose body is a closure
pub fn fn_factory<F, Fut>(task_type: &str, f: F) -> Arc<dyn TaskFactory>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
{
    Arc::new(FnFactory {
        task_type: task_type.to_string(),
        run: Arc::new(move |ctx| f(ctx).boxed()),
    })
}

/// Controls the `test.gated` task.
///
/// Every run blocks on a read of `lock`, so holding the write side keeps all
/// of them RUNNING. While `fail_even` is set, runs whose `i` argument is even
/// fail; everything else returns 100.
#[derive(Clone)]
pub struct Gate {
    pub lock: Arc<RwLock<()>>,
    pub fail_even: Arc<AtomicBool>,
    pub runs: Arc<AtomicUsize>,
}

impl Gate {
    pub fn new() -> Self {
        Self {
            lock: Arc::new(RwLock::new(())),
            fail_even: Arc::new(AtomicBool::new(true)),
            runs: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_even.store(failing, Ordering::SeqCst);
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    fn factory(&self) -> Arc<dyn TaskFactory> {
        let gate = self.clone();
        fn_factory("test.gated", move |ctx| {
            let gate = gate.clone();
            async move {
                gate.runs.fetch_add(1, Ordering::SeqCst);
                let _open = gate.lock.read().await;

                let i = ctx.arg_u64("i").unwrap_or(1);
                if i % 2 == 0 && gate.fail_even.load(Ordering::SeqCst) {
                    return Err(TaskError::ExecutionFailed(format!(
                        "workflow {} failed on purpose",
                        ctx.workflow_id
                    )));
                }
                Ok(json!(100))
            }
        })
    }
}

/// Registry with the gated task plus a few simple ones:
/// `test.echo` returns its args, `test.fail` always fails,
/// `test.flaky` fails until try `succeed_on`, `test.sleep` sleeps `ms`.
pub fn registry(gate: &Gate) -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    registry.register(gate.factory());
    registry.register(fn_factory("test.echo", |ctx| async move { Ok(ctx.args) }));
    registry.register(fn_factory("test.fail", |_ctx| async move {
        Err(TaskError::ExecutionFailed("boom".to_string()))
    }));
    registry.register(fn_factory("test.flaky", |ctx| async move {
        let succeed_on = ctx.require_arg("succeed_on")?.as_u64().unwrap_or(1) as u32;
        if ctx.try_number < succeed_on {
            return Err(TaskError::ExecutionFailed(format!("try {} is too early", ctx.try_number)));
        }
        Ok(json!(ctx.try_number))
    }));
    registry.register(fn_factory("test.sleep", |ctx| async move {
        let ms = ctx.arg_u64("ms").unwrap_or(10);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(json!(ms))
    }));
    registry
}

pub async fn memory_engine(gate: &Gate) -> WorkflowEngine {
    init_tracing();
    WorkflowEngine::open(EngineConfig::in_memory(), registry(gate))
        .await
        .expect("in-memory engine")
}
