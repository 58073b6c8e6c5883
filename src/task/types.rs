use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Identifier of a task; unique within any plan
pub type TaskId = String;

/// Task priority levels with numeric weights for ordering
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low = 1,
    #[default]
    Medium = 2,
    High = 3,
    Urgent = 4,
}

/// Coarse status carried on a task and reported through progress callbacks
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
}

/// Unit of work handed to the planner or the scheduler
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Tool to invoke instead of the generic operation executor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

/// Outcome of executing a single task; produced once and never mutated
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: TaskId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
    /// Wall-clock duration in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

impl Task {
    /// Create a pending task with medium priority
    pub fn new(id: impl Into<TaskId>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            priority: TaskPriority::default(),
            metadata: None,
            created_at: now,
            updated_at: now,
            tool: None,
            parameters: None,
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tool(mut self, tool: impl Into<String>, parameters: serde_json::Value) -> Self {
        self.tool = Some(tool.into());
        self.parameters = Some(parameters);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }

    /// Derive a subtask with this task's priority and a `parentId` metadata
    /// entry. Tool and parameters are not inherited.
    pub fn derive(&self, id: impl Into<TaskId>, description: impl Into<String>) -> Self {
        let mut child = Task::new(id, description).with_priority(self.priority);
        child.metadata = Some(HashMap::from([(
            "parentId".to_string(),
            serde_json::Value::String(self.id.clone()),
        )]));
        child
    }

    /// Get priority as numeric weight for ordering
    pub fn priority_value(&self) -> u8 {
        self.priority.value()
    }
}

impl TaskPriority {
    /// All priorities from most to least urgent
    pub const TIERS: [TaskPriority; 4] = [
        TaskPriority::Urgent,
        TaskPriority::High,
        TaskPriority::Medium,
        TaskPriority::Low,
    ];

    /// Get numeric weight (urgent=4 .. low=1)
    pub fn value(&self) -> u8 {
        *self as u8
    }

    /// Lenient parse used for LLM output and CLI input
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "urgent" | "critical" => Some(TaskPriority::Urgent),
            "high" => Some(TaskPriority::High),
            "medium" | "normal" => Some(TaskPriority::Medium),
            "low" => Some(TaskPriority::Low),
            _ => None,
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
            TaskPriority::Urgent => "urgent",
        };
        f.pad(name)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        f.pad(name)
    }
}

impl TaskResult {
    pub fn success(task_id: impl Into<TaskId>, data: Option<serde_json::Value>) -> Self {
        Self {
            task_id: task_id.into(),
            success: true,
            data,
            error: None,
            metadata: None,
            duration: None,
        }
    }

    pub fn failure(task_id: impl Into<TaskId>, error: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            success: false,
            data: None,
            error: Some(error.into()),
            metadata: None,
            duration: None,
        }
    }

    pub fn with_duration(mut self, duration: std::time::Duration) -> Self {
        self.duration = Some(duration.as_millis() as u64);
        self
    }

    /// Status to report for this result
    pub fn status(&self) -> TaskStatus {
        if self.success {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        }
    }
}

/// Progress callback: `(task_id, status, progress percentage)`
pub type ProgressCallback = dyn Fn(&str, TaskStatus, Option<u8>) + Send + Sync;
