//! Decomposition and plan execution.
//!
//! The [`Planner`] turns one [`Task`] into a [`Plan`] by recursive
//! decomposition (bounded by [`PlannerConfig::max_decomposition_depth`]),
//! picks an [`ExecutionStrategy`] from the result's shape, and runs plans
//! against a caller-supplied execute function.
//!
//! ## Decomposition
//!
//! A task whose complexity total is below the decomposition threshold is
//! atomic. Above it, the LLM-assisted path is tried when a [`TextGenerator`]
//! is configured and the total reaches the LLM threshold; any generation or
//! parse failure falls back to the rule-based path. Subtasks that are still
//! complex are decomposed again and spliced in place of their parent.
//!
//! ## Execution
//!
//! Failures of the execute function never escape [`Planner::execute_plan`]:
//! they become `success: false` results. Only structural problems (cycles,
//! unresolvable levels) are returned as errors.

use crate::env::planning::{
    DECOMPOSITION_THRESHOLD, LLM_DECOMPOSITION_THRESHOLD, MAX_DECOMPOSITION_DEPTH,
    PARALLEL_RATIO_THRESHOLD,
};
use crate::llm::TextGenerator;
use crate::task::complexity::{ComplexityEstimator, ComplexityScore};
use crate::task::decomposition::{
    Decomposition, build_decomposition_prompt, decompose_by_rules, dedup_subtasks,
    parse_llm_decomposition,
};
use crate::task::error::PlanningError;
use crate::task::graph::{DependencyGraph, DependencyMap};
use crate::task::plan::{ExecutionStrategy, Plan, PlanValidation};
use crate::task::types::{ProgressCallback, Task, TaskId, TaskPriority, TaskResult, TaskStatus};
use futures::future::{BoxFuture, join_all};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Planner configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlannerConfig {
    pub max_decomposition_depth: u32,
    pub enable_llm_decomposition: bool,
    /// Complexity total below which a task is atomic
    pub decomposition_threshold: f64,
    /// Complexity total from which the text generator is consulted
    pub llm_threshold: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_decomposition_depth: MAX_DECOMPOSITION_DEPTH,
            enable_llm_decomposition: true,
            decomposition_threshold: DECOMPOSITION_THRESHOLD,
            llm_threshold: LLM_DECOMPOSITION_THRESHOLD,
        }
    }
}

/// Builder for [`Planner`]; the complexity estimator is required
#[derive(Default)]
pub struct PlannerBuilder {
    config: PlannerConfig,
    estimator: Option<Arc<dyn ComplexityEstimator>>,
    text_generator: Option<Arc<dyn TextGenerator>>,
}

impl PlannerBuilder {
    pub fn with_config(mut self, config: PlannerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_complexity_estimator(mut self, estimator: Arc<dyn ComplexityEstimator>) -> Self {
        self.estimator = Some(estimator);
        self
    }

    pub fn with_text_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.text_generator = Some(generator);
        self
    }

    pub fn build(self) -> Result<Planner, PlanningError> {
        let estimator = self
            .estimator
            .ok_or(PlanningError::MissingCollaborator("complexity estimator"))?;
        Ok(Planner {
            config: self.config,
            estimator,
            text_generator: self.text_generator,
        })
    }
}

/// Task decomposition planner
pub struct Planner {
    config: PlannerConfig,
    estimator: Arc<dyn ComplexityEstimator>,
    text_generator: Option<Arc<dyn TextGenerator>>,
}

impl Planner {
    pub fn builder() -> PlannerBuilder {
        PlannerBuilder::default()
    }

    /// Planner with default configuration and no text generator
    pub fn new(estimator: Arc<dyn ComplexityEstimator>) -> Self {
        Self {
            config: PlannerConfig::default(),
            estimator,
            text_generator: None,
        }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn analyze_complexity(&self, task: &Task) -> ComplexityScore {
        self.estimator.analyze_complexity(task)
    }

    /// Decompose `task` starting at recursion `depth`
    pub fn decompose<'a>(&'a self, task: &'a Task, depth: u32) -> BoxFuture<'a, Decomposition> {
        Box::pin(async move {
            let complexity = self.analyze_complexity(task);

            if depth >= self.config.max_decomposition_depth {
                debug!("Task {} reached max decomposition depth {}", task.id, depth);
                return Decomposition::atomic(task.clone(), complexity.total);
            }
            if complexity.total < self.config.decomposition_threshold {
                debug!(
                    "Task {} is atomic (complexity {:.1})",
                    task.id, complexity.total
                );
                return Decomposition::atomic(task.clone(), complexity.total);
            }

            let Some((subtasks, mut dependencies)) = self.split(task, &complexity).await else {
                return Decomposition::atomic(task.clone(), complexity.total);
            };

            let mut spliced = Vec::with_capacity(subtasks.len());
            for subtask in subtasks {
                let recurse = subtask.id != task.id
                    && depth + 1 < self.config.max_decomposition_depth
                    && self.analyze_complexity(&subtask).total >= self.config.decomposition_threshold;
                if !recurse {
                    spliced.push(subtask);
                    continue;
                }

                let nested = self.decompose(&subtask, depth + 1).await;
                if nested.is_atomic() {
                    spliced.push(subtask);
                    continue;
                }
                debug!(
                    "Splicing {} nested subtasks in place of {}",
                    nested.subtasks.len(),
                    subtask.id
                );
                splice_nested(&mut dependencies, &subtask.id, &nested);
                spliced.extend(nested.subtasks);
            }

            let (subtasks, dependencies) = dedup_subtasks(spliced, dependencies);
            let total_effort = subtasks
                .iter()
                .map(|t| self.analyze_complexity(t).total)
                .sum();

            Decomposition {
                subtasks,
                dependencies,
                total_effort,
            }
        })
    }

    /// First-level split of a complex task, or `None` when nothing applies
    async fn split(
        &self,
        task: &Task,
        complexity: &ComplexityScore,
    ) -> Option<(Vec<Task>, DependencyMap)> {
        if self.config.enable_llm_decomposition && complexity.total >= self.config.llm_threshold {
            if let Some(generator) = &self.text_generator {
                match self.split_with_generator(generator.as_ref(), task).await {
                    Ok(split) => return Some(split),
                    Err(e) => warn!(
                        "{} decomposition of {} failed [{}]: {}; using rules",
                        generator.provider_name(),
                        task.id,
                        e.code(),
                        e
                    ),
                }
            }
        }
        decompose_by_rules(task)
    }

    async fn split_with_generator(
        &self,
        generator: &dyn TextGenerator,
        task: &Task,
    ) -> Result<(Vec<Task>, DependencyMap), PlanningError> {
        let prompt = build_decomposition_prompt(task);
        let response = generator
            .generate_text(task, &prompt)
            .await
            .map_err(|e| PlanningError::Parse(format!("text generation failed: {}", e)))?;
        parse_llm_decomposition(task, &response)
    }

    /// Decompose `task` and wrap the result in a plan
    pub async fn create_plan(&self, task: Task) -> Plan {
        let decomposition = self.decompose(&task, 0).await;
        let strategy = select_strategy(&decomposition.subtasks, &decomposition.dependencies);
        info!(
            "Created plan for {} with {} subtasks ({:?})",
            task.id,
            decomposition.subtasks.len(),
            strategy
        );

        Plan::new(task)
            .with_subtasks(decomposition.subtasks)
            .with_dependencies(decomposition.dependencies)
            .with_strategy(strategy)
            .with_estimated_effort(decomposition.total_effort)
    }

    pub fn validate_plan(&self, plan: &Plan) -> PlanValidation {
        plan.validate()
    }

    /// Run every subtask of `plan` with `execute` using the plan's strategy.
    ///
    /// `on_progress` receives `(id, running, 0)` before and
    /// `(id, completed|failed, 100)` after each executed task.
    pub async fn execute_plan<F, Fut>(
        &self,
        plan: &Plan,
        execute: F,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<Vec<TaskResult>, PlanningError>
    where
        F: Fn(Task) -> Fut,
        Fut: Future<Output = anyhow::Result<TaskResult>>,
    {
        info!(
            "Executing plan {} ({}, {:?})",
            plan.id,
            plan.summary(),
            plan.strategy
        );
        match plan.strategy {
            ExecutionStrategy::Sequential => {
                run_sequential(&plan.subtasks, &plan.dependencies, &execute, on_progress).await
            }
            ExecutionStrategy::Parallel => {
                run_parallel(&plan.subtasks, &plan.dependencies, &execute, on_progress).await
            }
            ExecutionStrategy::Priority => {
                let mut results = Vec::with_capacity(plan.task_count());
                for tier in TaskPriority::TIERS {
                    let members: Vec<Task> = plan
                        .subtasks
                        .iter()
                        .filter(|t| t.priority == tier)
                        .cloned()
                        .collect();
                    if members.is_empty() {
                        continue;
                    }
                    debug!("Running {} tier ({} tasks)", tier, members.len());
                    results.extend(
                        run_sequential(&members, &plan.dependencies, &execute, on_progress).await?,
                    );
                }
                Ok(results)
            }
        }
    }
}

/// Pick the execution strategy for a decomposition
pub fn select_strategy(subtasks: &[Task], dependencies: &DependencyMap) -> ExecutionStrategy {
    if subtasks.len() <= 1 {
        return ExecutionStrategy::Sequential;
    }

    let has_dependencies = dependencies.values().any(|deps| !deps.is_empty());
    let priorities: HashSet<TaskPriority> = subtasks.iter().map(|t| t.priority).collect();
    if priorities.len() > 1 && !has_dependencies {
        return ExecutionStrategy::Priority;
    }

    let independent = subtasks
        .iter()
        .filter(|t| dependencies.get(&t.id).is_none_or(|deps| deps.is_empty()))
        .count();
    let ratio = independent as f64 / subtasks.len() as f64;
    if ratio >= PARALLEL_RATIO_THRESHOLD && !has_dependencies {
        return ExecutionStrategy::Parallel;
    }

    ExecutionStrategy::Sequential
}

/// Replace `replaced` with the subtasks of `nested` in `dependencies`.
///
/// The first nested subtask inherits the replaced task's dependencies, the
/// rest are chained in execution order, and anything that depended on the
/// replaced task now depends on the last nested subtask.
fn splice_nested(dependencies: &mut DependencyMap, replaced: &TaskId, nested: &Decomposition) {
    let order = DependencyGraph::new(&nested.subtasks, &nested.dependencies)
        .execution_order_ids()
        .unwrap_or_else(|_| nested.subtasks.iter().map(|t| t.id.clone()).collect());
    let (Some(first), Some(last)) = (order.first().cloned(), order.last().cloned()) else {
        return;
    };

    let inherited = dependencies.remove(replaced).unwrap_or_default();
    for deps in dependencies.values_mut() {
        for dep in deps.iter_mut() {
            if dep == replaced {
                *dep = last.clone();
            }
        }
    }

    dependencies.entry(first).or_default().extend(inherited);
    for pair in order.windows(2) {
        dependencies
            .entry(pair[1].clone())
            .or_default()
            .push(pair[0].clone());
    }
    for (id, deps) in &nested.dependencies {
        dependencies
            .entry(id.clone())
            .or_default()
            .extend(deps.iter().cloned());
    }
}

async fn run_sequential<F, Fut>(
    tasks: &[Task],
    dependencies: &DependencyMap,
    execute: &F,
    on_progress: Option<&ProgressCallback>,
) -> Result<Vec<TaskResult>, PlanningError>
where
    F: Fn(Task) -> Fut,
    Fut: Future<Output = anyhow::Result<TaskResult>>,
{
    let order = DependencyGraph::new(tasks, dependencies).execution_order()?;
    let mut results = Vec::with_capacity(order.len());

    for task in order {
        let result = run_one(task, execute, on_progress).await;
        let halt = !result.success && task.priority == TaskPriority::Urgent;
        results.push(result);
        if halt {
            warn!("Urgent task {} failed; stopping remaining tasks", task.id);
            break;
        }
    }
    Ok(results)
}

async fn run_parallel<F, Fut>(
    tasks: &[Task],
    dependencies: &DependencyMap,
    execute: &F,
    on_progress: Option<&ProgressCallback>,
) -> Result<Vec<TaskResult>, PlanningError>
where
    F: Fn(Task) -> Fut,
    Fut: Future<Output = anyhow::Result<TaskResult>>,
{
    let levels = DependencyGraph::new(tasks, dependencies).levels()?;
    let mut results = Vec::with_capacity(tasks.len());

    for (index, level) in levels.into_iter().enumerate() {
        debug!("Running level {} with {} tasks", index, level.len());
        let batch = join_all(
            level
                .into_iter()
                .map(|task| run_one(task, execute, on_progress)),
        )
        .await;
        results.extend(batch);
    }
    Ok(results)
}

async fn run_one<F, Fut>(task: &Task, execute: &F, on_progress: Option<&ProgressCallback>) -> TaskResult
where
    F: Fn(Task) -> Fut,
    Fut: Future<Output = anyhow::Result<TaskResult>>,
{
    report(on_progress, &task.id, TaskStatus::Running, Some(0));
    let started = Instant::now();

    let result = match execute(task.clone()).await {
        Ok(result) => result,
        Err(e) => {
            warn!("Task {} failed: {}", task.id, e);
            TaskResult::failure(task.id.clone(), e.to_string()).with_duration(started.elapsed())
        }
    };

    report(on_progress, &task.id, result.status(), Some(100));
    result
}

fn report(on_progress: Option<&ProgressCallback>, task_id: &str, status: TaskStatus, progress: Option<u8>) {
    if let Some(callback) = on_progress {
        callback(task_id, status, progress);
    }
}
