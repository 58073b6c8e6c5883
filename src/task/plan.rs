//! Plan model produced by the planner.
//!
//! A [`Plan`] is the decomposition output for one task: its subtasks, the
//! dependency mapping between them, the execution strategy chosen at creation
//! time, and an effort estimate.
//!
//! ## Invariants
//!
//! - every id referenced as a dependency exists in `subtasks`
//! - no id appears twice in `subtasks`
//!
//! Plans are not validated on construction; [`Plan::validate`] reports every
//! violated invariant at once without failing, so callers can inspect a plan
//! before running it.
//!
//! ## Example Usage
//!
//! ```rust
//! use taskweave::task::{ExecutionStrategy, Plan, Task};
//!
//! let root = Task::new("t1", "Implement the authentication system");
//! let plan = Plan::new(root.clone())
//!     .with_subtask(Task::new("t1-impl", "Implement: authentication"))
//!     .with_subtask(Task::new("t1-test", "Test: authentication"))
//!     .with_dependency("t1-test", "t1-impl")
//!     .with_strategy(ExecutionStrategy::Sequential);
//!
//! assert!(plan.validate().valid);
//! assert_eq!(plan.execution_order_ids().unwrap(), vec!["t1-impl", "t1-test"]);
//! ```

use crate::task::error::PlanningError;
use crate::task::graph::{DependencyGraph, DependencyMap};
use crate::task::types::{Task, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Algorithm used to order and run a plan's subtasks
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStrategy {
    /// One task at a time in dependency order
    #[default]
    Sequential,
    /// Dependency levels run concurrently, with a barrier between levels
    Parallel,
    /// Priority tiers run in order, each tier sequentially
    Priority,
}

/// Decomposition of one task into dependent subtasks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: String,
    pub original_task: Task,
    pub subtasks: Vec<Task>,
    pub dependencies: DependencyMap,
    pub strategy: ExecutionStrategy,
    pub estimated_effort: f64,
    pub created_at: DateTime<Utc>,
}

/// Findings of [`Plan::validate`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PlanValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl Plan {
    /// Create an empty plan for `original_task` with a unique id
    pub fn new(original_task: Task) -> Self {
        Self {
            id: format!("plan-{}-{}", original_task.id, Uuid::new_v4()),
            original_task,
            subtasks: Vec::new(),
            dependencies: DependencyMap::new(),
            strategy: ExecutionStrategy::default(),
            estimated_effort: 0.0,
            created_at: Utc::now(),
        }
    }

    pub fn with_subtask(mut self, task: Task) -> Self {
        self.subtasks.push(task);
        self
    }

    pub fn with_subtasks(mut self, tasks: Vec<Task>) -> Self {
        self.subtasks.extend(tasks);
        self
    }

    /// Record that `task_id` depends on `depends_on`
    pub fn with_dependency(mut self, task_id: impl Into<TaskId>, depends_on: impl Into<TaskId>) -> Self {
        let deps = self.dependencies.entry(task_id.into()).or_default();
        let depends_on = depends_on.into();
        if !deps.contains(&depends_on) {
            deps.push(depends_on);
        }
        self
    }

    pub fn with_dependencies(mut self, dependencies: DependencyMap) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_estimated_effort(mut self, effort: f64) -> Self {
        self.estimated_effort = effort;
        self
    }

    /// Dependency graph view over this plan
    pub fn graph(&self) -> DependencyGraph<'_> {
        DependencyGraph::new(&self.subtasks, &self.dependencies)
    }

    /// Subtask ids in dependency-respecting order
    pub fn execution_order_ids(&self) -> Result<Vec<TaskId>, PlanningError> {
        self.graph().execution_order_ids()
    }

    pub fn get_subtask(&self, task_id: &str) -> Option<&Task> {
        self.subtasks.iter().find(|t| t.id == task_id)
    }

    pub fn task_count(&self) -> usize {
        self.subtasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subtasks.is_empty()
    }

    /// Number of non-empty dependency entries
    pub fn dependency_entry_count(&self) -> usize {
        self.dependencies.values().filter(|d| !d.is_empty()).count()
    }

    /// Get a summary string describing the plan
    pub fn summary(&self) -> String {
        let strategy = match self.strategy {
            ExecutionStrategy::Sequential => "sequential",
            ExecutionStrategy::Parallel => "parallel",
            ExecutionStrategy::Priority => "priority",
        };
        match (self.task_count(), self.dependency_entry_count()) {
            (0, _) => "Empty plan".to_string(),
            (1, _) => format!("1 task, {} execution", strategy),
            (n, 0) => format!("{} independent tasks, {} execution", n, strategy),
            (n, d) => format!(
                "{} tasks with {} dependency entries, {} execution",
                n, d, strategy
            ),
        }
    }

    /// Check every plan invariant and report all findings together
    pub fn validate(&self) -> PlanValidation {
        let mut errors = Vec::new();

        if self.subtasks.is_empty() {
            errors.push("Plan has no subtasks".to_string());
        }

        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        for task in &self.subtasks {
            if !seen.insert(task.id.as_str()) && !duplicates.contains(&task.id) {
                duplicates.push(task.id.clone());
            }
        }
        for id in &duplicates {
            errors.push(format!("Duplicate subtask id: {}", id));
        }

        if let Err(err) = self.graph().execution_order() {
            errors.push(err.to_string());
        }

        let mut entries: Vec<(&TaskId, &Vec<TaskId>)> = self.dependencies.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        for (task_id, deps) in entries {
            if !seen.contains(task_id.as_str()) {
                errors.push(format!(
                    "Dependency entry for unknown task: {}",
                    task_id
                ));
            }
            for dep in deps {
                if !seen.contains(dep.as_str()) {
                    errors.push(format!(
                        "Task {} depends on missing task {}",
                        task_id, dep
                    ));
                }
            }
        }

        PlanValidation {
            valid: errors.is_empty(),
            errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_with(ids: &[&str]) -> Plan {
        let mut plan = Plan::new(Task::new("root", "root task"));
        for id in ids {
            plan = plan.with_subtask(Task::new(*id, format!("subtask {}", id)));
        }
        plan
    }

    #[test]
    fn test_plan_creation() {
        let plan = plan_with(&[]);
        assert!(plan.is_empty());
        assert_eq!(plan.task_count(), 0);
        assert_eq!(plan.summary(), "Empty plan");
        assert!(plan.id.starts_with("plan-root-"));
    }

    #[test]
    fn test_plan_ids_are_unique_per_call() {
        let task = Task::new("root", "root task");
        assert_ne!(Plan::new(task.clone()).id, Plan::new(task).id);
    }

    #[test]
    fn test_valid_plan() {
        let plan = plan_with(&["a", "b"]).with_dependency("b", "a");
        let validation = plan.validate();
        assert!(validation.valid, "{:?}", validation.errors);
        assert_eq!(plan.summary(), "2 tasks with 1 dependency entries, sequential execution");
    }

    #[test]
    fn test_validation_flags_empty_plan() {
        let validation = plan_with(&[]).validate();
        assert!(!validation.valid);
        assert_eq!(validation.errors, vec!["Plan has no subtasks"]);
    }

    #[test]
    fn test_validation_flags_duplicate_ids() {
        let validation = plan_with(&["a", "a", "b"]).validate();
        assert!(!validation.valid);
        assert_eq!(validation.errors, vec!["Duplicate subtask id: a"]);
    }

    #[test]
    fn test_validation_flags_circular_dependency() {
        let plan = plan_with(&["a", "b"])
            .with_dependency("a", "b")
            .with_dependency("b", "a");
        let validation = plan.validate();
        assert!(!validation.valid);
        assert_eq!(validation.errors.len(), 1);
        assert!(validation.errors[0].contains("Circular dependency"));
    }

    #[test]
    fn test_validation_flags_missing_dependency() {
        let plan = plan_with(&["a"]).with_dependency("a", "ghost");
        let validation = plan.validate();
        assert!(!validation.valid);
        assert_eq!(validation.errors, vec!["Task a depends on missing task ghost"]);
    }

    #[test]
    fn test_validation_reports_all_findings() {
        let plan = plan_with(&["a", "a", "b"])
            .with_dependency("a", "b")
            .with_dependency("b", "a")
            .with_dependency("b", "ghost");
        let validation = plan.validate();
        assert!(!validation.valid);
        assert_eq!(validation.errors.len(), 3);
    }

    #[test]
    fn test_strategy_serialization() {
        assert_eq!(ExecutionStrategy::default(), ExecutionStrategy::Sequential);
        let json = serde_json::to_string(&ExecutionStrategy::Parallel).unwrap();
        assert_eq!(json, "\"parallel\"");
        let parsed: ExecutionStrategy = serde_json::from_str("\"priority\"").unwrap();
        assert_eq!(parsed, ExecutionStrategy::Priority);
    }
}
