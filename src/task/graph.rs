//! Execution ordering over a plan's subtasks.
//!
//! [`DependencyGraph`] borrows a subtask list and a dependency mapping and
//! derives three orderings from them:
//!
//! - **sequential**: depth-first post-order with three-color cycle detection
//! - **levels**: batches whose dependencies are all satisfied, for parallel runs
//! - **priority**: stable priority sort that still honors dependencies between
//!   equally prioritized tasks
//!
//! Dependencies naming ids outside the subtask list are ignored here;
//! [`Plan::validate`](crate::task::Plan::validate) reports them.

use crate::task::error::PlanningError;
use crate::task::types::{Task, TaskId};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Dependency mapping: task id -> ids it depends on
pub type DependencyMap = HashMap<TaskId, Vec<TaskId>>;

#[derive(Clone, Copy, PartialEq, Eq)]
enum VisitState {
    InProgress,
    Done,
}

/// Read-only view over subtasks and their dependencies
#[derive(Debug, Clone, Copy)]
pub struct DependencyGraph<'a> {
    subtasks: &'a [Task],
    dependencies: &'a DependencyMap,
}

impl<'a> DependencyGraph<'a> {
    pub fn new(subtasks: &'a [Task], dependencies: &'a DependencyMap) -> Self {
        Self {
            subtasks,
            dependencies,
        }
    }

    fn index(&self) -> HashMap<&'a str, &'a Task> {
        self.subtasks.iter().map(|t| (t.id.as_str(), t)).collect()
    }

    /// Dependencies of `task_id` that are part of the subtask list
    fn present_dependencies<'b>(
        &'b self,
        task_id: &str,
        index: &'b HashMap<&'a str, &'a Task>,
    ) -> impl Iterator<Item = &'a TaskId> + 'b {
        self.dependencies
            .get(task_id)
            .into_iter()
            .flatten()
            .filter(move |dep| index.contains_key(dep.as_str()))
    }

    /// Dependency-respecting order (depth-first post-order).
    ///
    /// Fails with [`PlanningError::CircularDependency`] carrying the path from
    /// the traversal root to the repeated id.
    pub fn execution_order(&self) -> Result<Vec<&'a Task>, PlanningError> {
        let index = self.index();
        let mut states: HashMap<&'a str, VisitState> = HashMap::new();
        let mut order = Vec::with_capacity(self.subtasks.len());
        let mut path = Vec::new();

        for task in self.subtasks {
            self.visit(task, &index, &mut states, &mut path, &mut order)?;
        }

        Ok(order)
    }

    /// Ids of [`execution_order`](Self::execution_order)
    pub fn execution_order_ids(&self) -> Result<Vec<TaskId>, PlanningError> {
        Ok(self
            .execution_order()?
            .into_iter()
            .map(|t| t.id.clone())
            .collect())
    }

    fn visit(
        &self,
        task: &'a Task,
        index: &HashMap<&'a str, &'a Task>,
        states: &mut HashMap<&'a str, VisitState>,
        path: &mut Vec<TaskId>,
        order: &mut Vec<&'a Task>,
    ) -> Result<(), PlanningError> {
        match states.get(task.id.as_str()) {
            Some(VisitState::Done) => return Ok(()),
            Some(VisitState::InProgress) => {
                let mut cycle = path.clone();
                cycle.push(task.id.clone());
                return Err(PlanningError::CircularDependency { path: cycle });
            }
            None => {}
        }

        states.insert(task.id.as_str(), VisitState::InProgress);
        path.push(task.id.clone());

        for dep_id in self.present_dependencies(&task.id, index) {
            let dep = index[dep_id.as_str()];
            self.visit(dep, index, states, path, order)?;
        }

        path.pop();
        states.insert(task.id.as_str(), VisitState::Done);
        order.push(task);
        Ok(())
    }

    /// Partition into dependency levels for fan-out/fan-in execution.
    ///
    /// Each level holds the not-yet-placed tasks whose dependencies are all
    /// placed already (or lie outside the plan). Tasks keep their relative
    /// input order within a level.
    pub fn levels(&self) -> Result<Vec<Vec<&'a Task>>, PlanningError> {
        let index = self.index();
        let mut placed: HashSet<&str> = HashSet::new();
        let mut remaining: Vec<&'a Task> = self.subtasks.iter().collect();
        let mut levels = Vec::new();

        while !remaining.is_empty() {
            let (ready, blocked): (Vec<&'a Task>, Vec<&'a Task>) =
                remaining.into_iter().partition(|task| {
                    self.present_dependencies(&task.id, &index)
                        .all(|dep| placed.contains(dep.as_str()))
                });

            if ready.is_empty() {
                return Err(PlanningError::DependencyResolutionFailed {
                    stuck: blocked.iter().map(|t| t.id.clone()).collect(),
                });
            }

            placed.extend(ready.iter().map(|t| t.id.as_str()));
            debug!("Dependency level {} holds {} tasks", levels.len(), ready.len());
            levels.push(ready);
            remaining = blocked;
        }

        Ok(levels)
    }

    /// Stable sort by priority weight, descending.
    ///
    /// Within a run of equal priority, a task is never placed before one of
    /// its in-run dependencies; otherwise input order is kept. A cycle inside
    /// a run leaves the cyclic tasks in input order.
    pub fn priority_order(&self) -> Vec<&'a Task> {
        let mut sorted: Vec<&'a Task> = self.subtasks.iter().collect();
        sorted.sort_by(|a, b| b.priority_value().cmp(&a.priority_value()));

        let mut ordered = Vec::with_capacity(sorted.len());
        for run in sorted.chunk_by(|a, b| a.priority == b.priority) {
            ordered.extend(self.order_run(run));
        }
        ordered
    }

    fn order_run(&self, run: &[&'a Task]) -> Vec<&'a Task> {
        let in_run: HashSet<&str> = run.iter().map(|t| t.id.as_str()).collect();
        let mut placed: HashSet<&str> = HashSet::new();
        let mut pending: Vec<&'a Task> = run.to_vec();
        let mut ordered = Vec::with_capacity(run.len());

        while !pending.is_empty() {
            let next = pending.iter().position(|task| {
                self.dependencies
                    .get(&task.id)
                    .into_iter()
                    .flatten()
                    .filter(|dep| in_run.contains(dep.as_str()))
                    .all(|dep| placed.contains(dep.as_str()))
            });

            match next {
                Some(pos) => {
                    let task = pending.remove(pos);
                    placed.insert(task.id.as_str());
                    ordered.push(task);
                }
                None => {
                    ordered.append(&mut pending);
                }
            }
        }

        ordered
    }
}
