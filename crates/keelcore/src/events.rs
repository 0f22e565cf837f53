use crate::{RunId, WorkflowStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted over a workflow's lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkflowEvent {
    Submitted {
        workflow_id: String,
        task_type: String,
        timestamp: DateTime<Utc>,
    },
    /// A committed status transition
    StatusChanged {
        workflow_id: String,
        from: Option<WorkflowStatus>,
        to: WorkflowStatus,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },
    /// A completion that arrived after the execution stopped being live
    OutcomeDiscarded {
        workflow_id: String,
        run_id: RunId,
        timestamp: DateTime<Utc>,
    },
    Task {
        workflow_id: String,
        run_id: RunId,
        event: TaskEvent,
        timestamp: DateTime<Utc>,
    },
}

impl WorkflowEvent {
    pub fn workflow_id(&self) -> &str {
        match self {
            WorkflowEvent::Submitted { workflow_id, .. }
            | WorkflowEvent::StatusChanged { workflow_id, .. }
            | WorkflowEvent::OutcomeDiscarded { workflow_id, .. }
            | WorkflowEvent::Task { workflow_id, .. } => workflow_id,
        }
    }
}

/// Events emitted by a running task
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum TaskEvent {
    Info { message: String },
    Warning { message: String },
    Progress { percent: f64, message: Option<String> },
    Retrying { try_number: u32, error: String },
}

/// Event emitter handed to tasks
#[derive(Clone)]
pub struct EventEmitter {
    workflow_id: String,
    run_id: RunId,
    sender: broadcast::Sender<WorkflowEvent>,
}

impl EventEmitter {
    pub fn new(workflow_id: impl Into<String>, run_id: RunId, sender: broadcast::Sender<WorkflowEvent>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id,
            sender,
        }
    }

    pub fn emit(&self, event: TaskEvent) {
        let _ = self.sender.send(WorkflowEvent::Task {
            workflow_id: self.workflow_id.clone(),
            run_id: self.run_id,
            event,
            timestamp: Utc::now(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(TaskEvent::Info {
            message: message.into(),
        });
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(TaskEvent::Warning {
            message: message.into(),
        });
    }

    pub fn progress(&self, percent: f64, message: Option<String>) {
        self.emit(TaskEvent::Progress { percent, message });
    }
}

/// Engine-wide event bus. Sends never block; lagging subscribers lose events.
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: WorkflowEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("No event subscribers");
        }
    }

    pub fn status_changed(&self, workflow_id: &str, from: Option<WorkflowStatus>, to: WorkflowStatus, attempt: u32) {
        self.emit(WorkflowEvent::StatusChanged {
            workflow_id: workflow_id.to_string(),
            from,
            to,
            attempt,
            timestamp: Utc::now(),
        });
    }

    pub fn create_emitter(&self, workflow_id: &str, run_id: RunId) -> EventEmitter {
        EventEmitter::new(workflow_id, run_id, self.sender.clone())
    }
}
