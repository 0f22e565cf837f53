use std::path::PathBuf;

/// Where the workflow registry lives
#[derive(Debug, Clone, PartialEq)]
pub enum StorageConfig {
    /// Lost when the engine is dropped
    Memory,
    /// ReDB file, survives restarts
    Redb { path: PathBuf },
}

/// Configuration for the engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub storage: StorageConfig,
    pub max_concurrent_tasks: usize,
    pub event_buffer_size: usize,
    /// Applied to checkpoints without their own `timeout_ms`
    pub default_task_timeout_ms: Option<u64>,
}

impl EngineConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn durable(path: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig::Redb { path: path.into() },
            ..Self::default()
        }
    }

    pub fn with_max_concurrent_tasks(mut self, max_concurrent_tasks: usize) -> Self {
        self.max_concurrent_tasks = max_concurrent_tasks;
        self
    }

    pub fn with_task_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_task_timeout_ms = Some(timeout_ms);
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::Memory,
            max_concurrent_tasks: 256,
            event_buffer_size: 1000,
            default_task_timeout_ms: None,
        }
    }
}
