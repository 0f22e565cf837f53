use keelcore::{EngineError, Task, TaskError, TaskSpec};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Factory trait for creating task instances from a checkpoint
pub trait TaskFactory: Send + Sync {
    /// Create a new instance of the task for the given arguments
    fn create(&self, args: &serde_json::Value) -> Result<Box<dyn Task>, TaskError>;

    /// Get task type identifier
    fn task_type(&self) -> &str;

    /// Optional: describe the task for listings
    fn metadata(&self) -> TaskMetadata {
        TaskMetadata::default()
    }
}

/// Metadata about a task type
#[derive(Debug, Clone)]
pub struct TaskMetadata {
    pub description: String,
    pub category: String,
}

impl Default for TaskMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
        }
    }
}

/// Registry of available task types.
///
/// Checkpoints only name a task type, so the same registry must be supplied
/// whenever a registry file is reopened and its workflows resumed.
pub struct TaskRegistry {
    factories: BTreeMap<String, Arc<dyn TaskFactory>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Register a task factory, replacing any previous one for the same type
    pub fn register(&mut self, factory: Arc<dyn TaskFactory>) {
        let task_type = factory.task_type().to_string();
        tracing::info!("Registering task type: {}", task_type);
        self.factories.insert(task_type, factory);
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.factories.contains_key(task_type)
    }

    /// Create a task instance for a checkpoint
    pub fn create_task(&self, spec: &TaskSpec) -> Result<Box<dyn Task>, EngineError> {
        let factory = self
            .factories
            .get(&spec.task_type)
            .ok_or_else(|| EngineError::UnknownTaskType(spec.task_type.clone()))?;

        factory.create(&spec.args).map_err(EngineError::Task)
    }

    /// All registered task types, sorted
    pub fn list_task_types(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn get_metadata(&self, task_type: &str) -> Option<TaskMetadata> {
        self.factories.get(task_type).map(|f| f.metadata())
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
