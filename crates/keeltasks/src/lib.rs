//! Built-in task library
//!
//! Small tasks that are always available to the engine and the CLI.

mod debug;
mod time;

pub use debug::{EchoTask, FailTask};
pub use time::DelayTask;
use keelruntime::TaskRegistry;

use std::sync::Arc;

/// Register all built-in tasks with a registry
pub fn register_all(registry: &mut TaskRegistry) {
    registry.register(Arc::new(debug::EchoTaskFactory));
    registry.register(Arc::new(debug::FailTaskFactory));
    registry.register(Arc::new(time::DelayTaskFactory));
}

/// A registry holding only the built-in tasks
pub fn builtin_registry() -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    register_all(&mut registry);
    registry
}
