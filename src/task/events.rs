use crate::task::types::{Task, TaskResult, TaskStatus};
use anyhow::Result;
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, warn};

/// Notifications emitted by lifecycle machines and the scheduler
#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// Emitted on every status change, before the status-specific event
    TaskStatusChanged { task: Task, status: TaskStatus },
    TaskStarted { task: Task },
    TaskCompleted { task: Task, result: TaskResult },
    TaskFailed { task: Task, error: String },
    TaskPaused { task: Task },
    /// Scheduler armed its timers
    Started,
    /// Scheduler disarmed its timers
    Stopped,
}

/// Handler for task events
pub trait TaskEventHandler: Send + Sync {
    fn handle_event(&self, event: &TaskEvent) -> Result<()>;
}

/// Ordered observer list; handlers run synchronously in registration order
#[derive(Default)]
pub struct EventDispatcher {
    handlers: RwLock<Vec<Arc<dyn TaskEventHandler>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add event handler
    pub fn add_handler(&self, handler: Arc<dyn TaskEventHandler>) {
        match self.handlers.write() {
            Ok(mut handlers) => handlers.push(handler),
            Err(_) => error!("Event handler registry poisoned; handler dropped"),
        }
    }

    /// Emit task event to all handlers
    pub fn emit(&self, event: TaskEvent) {
        let handlers = match self.handlers.read() {
            Ok(handlers) => handlers.clone(),
            Err(_) => {
                error!("Event handler registry poisoned; event dropped");
                return;
            }
        };
        for handler in handlers {
            if let Err(e) = handler.handle_event(&event) {
                error!("Event handler error: {}", e);
            }
        }
    }

    /// Emit the generic status change followed by its status-specific event
    pub fn emit_status(&self, task: &Task, status: TaskStatus, detail: StatusDetail) {
        self.emit(TaskEvent::TaskStatusChanged {
            task: task.clone(),
            status,
        });
        let specific = match (status, detail) {
            (TaskStatus::Running, _) => Some(TaskEvent::TaskStarted { task: task.clone() }),
            (TaskStatus::Completed, StatusDetail::Result(result)) => Some(TaskEvent::TaskCompleted {
                task: task.clone(),
                result,
            }),
            (TaskStatus::Failed, StatusDetail::Error(error)) => Some(TaskEvent::TaskFailed {
                task: task.clone(),
                error,
            }),
            (TaskStatus::Paused, _) => Some(TaskEvent::TaskPaused { task: task.clone() }),
            _ => None,
        };
        if let Some(event) = specific {
            self.emit(event);
        }
    }
}

/// Payload attached to a terminal status notification
#[derive(Debug, Clone)]
pub enum StatusDetail {
    None,
    Result(TaskResult),
    Error(String),
}

/// Simple event handler that logs events
pub struct LoggingEventHandler;

impl TaskEventHandler for LoggingEventHandler {
    fn handle_event(&self, event: &TaskEvent) -> Result<()> {
        match event {
            TaskEvent::TaskStatusChanged { task, status } => {
                debug!("Task {} status: {}", task.id, status);
            }
            TaskEvent::TaskStarted { task } => {
                info!("Task started: {}", task.id);
            }
            TaskEvent::TaskCompleted { task, result } => {
                info!("Task completed: {} (success: {})", task.id, result.success);
            }
            TaskEvent::TaskFailed { task, error } => {
                warn!("Task failed: {} - {}", task.id, error);
            }
            TaskEvent::TaskPaused { task } => {
                info!("Task paused: {}", task.id);
            }
            TaskEvent::Started => info!("Scheduler started"),
            TaskEvent::Stopped => info!("Scheduler stopped"),
        }
        Ok(())
    }
}

/// Handler that keeps every event it sees, in order
#[derive(Default)]
pub struct RecordingEventHandler {
    events: std::sync::Mutex<Vec<TaskEvent>>,
}

impl RecordingEventHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TaskEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Statuses from `TaskStatusChanged` events for `task_id`, in emission order
    pub fn statuses_for(&self, task_id: &str) -> Vec<TaskStatus> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                TaskEvent::TaskStatusChanged { task, status } if task.id == task_id => Some(status),
                _ => None,
            })
            .collect()
    }
}

impl TaskEventHandler for RecordingEventHandler {
    fn handle_event(&self, event: &TaskEvent) -> Result<()> {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
        Ok(())
    }
}
