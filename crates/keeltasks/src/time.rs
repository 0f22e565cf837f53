use async_trait::async_trait;
use keelcore::{Task, TaskContext, TaskError};
use keelruntime::{TaskFactory, TaskMetadata};
use serde_json::Value;
use tokio::time::{sleep, Duration};

const DEFAULT_DELAY_MS: u64 = 1000;

/// Sleep for `delay_ms`, then return the args unchanged
pub struct DelayTask {
    delay_ms: u64,
}

impl DelayTask {
    pub fn new(delay_ms: u64) -> Self {
        Self { delay_ms }
    }
}

#[async_trait]
impl Task for DelayTask {
    fn task_type(&self) -> &str {
        "time.delay"
    }

    async fn run(&self, ctx: TaskContext) -> Result<Value, TaskError> {
        ctx.events.info(format!("Delaying for {}ms", self.delay_ms));

        tokio::select! {
            _ = ctx.cancellation.cancelled() => return Err(TaskError::Cancelled),
            _ = sleep(Duration::from_millis(self.delay_ms)) => {}
        }

        ctx.events.progress(100.0, Some(format!("Waited {}ms", self.delay_ms)));
        Ok(ctx.args)
    }
}

pub struct DelayTaskFactory;

impl TaskFactory for DelayTaskFactory {
    fn create(&self, args: &Value) -> Result<Box<dyn Task>, TaskError> {
        let delay_ms = match args.get("delay_ms") {
            None => DEFAULT_DELAY_MS,
            Some(v) => v.as_u64().ok_or_else(|| TaskError::InvalidArgument {
                field: "delay_ms".to_string(),
                expected: "non-negative integer".to_string(),
            })?,
        };
        Ok(Box::new(DelayTask::new(delay_ms)))
    }

    fn task_type(&self) -> &str {
        "time.delay"
    }

    fn metadata(&self) -> TaskMetadata {
        TaskMetadata {
            description: "Delay for the given milliseconds".to_string(),
            category: "time".to_string(),
        }
    }
}
