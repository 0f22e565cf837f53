use async_trait::async_trait;
use keelcore::{Task, TaskContext, TaskError};
use keelruntime::{TaskFactory, TaskMetadata};
use serde_json::Value;

/// Returns `message` (or all of its args) and logs it
pub struct EchoTask;

#[async_trait]
impl Task for EchoTask {
    fn task_type(&self) -> &str {
        "debug.echo"
    }

    async fn run(&self, ctx: TaskContext) -> Result<Value, TaskError> {
        let output = match ctx.args.get("message") {
            Some(message) => message.clone(),
            None => ctx.args.clone(),
        };

        ctx.events.info(format!("ECHO: {}", output));
        if ctx.attempt > 1 {
            ctx.events.info(format!("  attempt: {}", ctx.attempt));
        }

        Ok(output)
    }
}

pub struct EchoTaskFactory;

impl TaskFactory for EchoTaskFactory {
    fn create(&self, _args: &Value) -> Result<Box<dyn Task>, TaskError> {
        Ok(Box::new(EchoTask))
    }

    fn task_type(&self) -> &str {
        "debug.echo"
    }

    fn metadata(&self) -> TaskMetadata {
        TaskMetadata {
            description: "Returns its message and logs it".to_string(),
            category: "debug".to_string(),
        }
    }
}

/// Always fails, with `message` as the error
pub struct FailTask;

#[async_trait]
impl Task for FailTask {
    fn task_type(&self) -> &str {
        "debug.fail"
    }

    async fn run(&self, ctx: TaskContext) -> Result<Value, TaskError> {
        let message = ctx.arg_str("message").unwrap_or("failed on request");
        ctx.events.warn(format!("Failing: {}", message));
        Err(TaskError::ExecutionFailed(message.to_string()))
    }
}

pub struct FailTaskFactory;

impl TaskFactory for FailTaskFactory {
    fn create(&self, _args: &Value) -> Result<Box<dyn Task>, TaskError> {
        Ok(Box::new(FailTask))
    }

    fn task_type(&self) -> &str {
        "debug.fail"
    }

    fn metadata(&self) -> TaskMetadata {
        TaskMetadata {
            description: "Always fails; useful for exercising resume".to_string(),
            category: "debug".to_string(),
        }
    }
}
