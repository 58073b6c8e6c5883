use crate::task::lifecycle::{LifecycleEventKind, LifecycleState};
use crate::task::types::TaskId;

/// Structured planning errors; each carries a stable code
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanningError {
    /// Malformed decomposition response. Recovered by rule-based fallback.
    #[error("Failed to parse decomposition response: {0}")]
    Parse(String),

    #[error("Circular dependency detected: {}", path.join(" -> "))]
    CircularDependency { path: Vec<TaskId> },

    #[error("Cannot resolve dependencies (missing or circular) for tasks: {}", stuck.join(", "))]
    DependencyResolutionFailed { stuck: Vec<TaskId> },

    #[error("Missing required collaborator: {0}")]
    MissingCollaborator(&'static str),
}

impl PlanningError {
    pub fn code(&self) -> &'static str {
        match self {
            PlanningError::Parse(_) => "PARSE_ERROR",
            PlanningError::CircularDependency { .. } => "CIRCULAR_DEPENDENCY",
            PlanningError::DependencyResolutionFailed { .. } => "DEPENDENCY_RESOLUTION_FAILED",
            PlanningError::MissingCollaborator(_) => "MISSING_COLLABORATOR",
        }
    }
}

/// Rejected lifecycle transitions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("Event {event:?} is not valid in state {from:?}")]
    InvalidTransition {
        from: LifecycleState,
        event: LifecycleEventKind,
    },

    #[error("Cannot retry: no task reference is held")]
    RetryWithoutTask,
}

/// Errors surfaced by the scheduler's execution path
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchedulerError {
    #[error("Task {0} already has an active execution")]
    AlreadyActive(TaskId),

    #[error("Task {task_id} failed: {error}")]
    TaskFailed { task_id: TaskId, error: String },

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// Rejected cron expressions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CronError {
    #[error("Cron expression must have 5 or 6 fields, found {0}")]
    FieldCount(usize),

    #[error("Invalid {field} field '{value}': {reason}")]
    InvalidField {
        field: &'static str,
        value: String,
        reason: String,
    },
}
