//! # Taskweave
//!
//! A local-first task orchestrator. A single high-level task description is
//! decomposed into a dependency-aware plan, which is then run to completion
//! with support for pause, resume, cancellation, retry and cron-style
//! recurring invocation.
//!
//! ## Architecture Overview
//!
//! - **[`task`]**: the orchestration engine
//!   - dependency graph ordering, cycle detection and level partitioning
//!   - the [`Planner`](task::Planner): recursive decomposition, strategy
//!     selection and plan execution
//!   - the per-task lifecycle state machine
//!   - the [`Scheduler`](task::Scheduler): cron routines, the running-machine
//!     registry and status notifications
//! - **[`llm`]**: the text generation interface used for LLM-assisted
//!   decomposition
//! - **[`cli`]**: argument parsing and configuration discovery
//! - **[`env`]**: constants and path helpers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use taskweave::task::{
//!     ExecutionServices, HeuristicComplexityEstimator, Planner, Scheduler, SchedulerConfig, Task,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let planner = Planner::builder()
//!         .with_complexity_estimator(Arc::new(HeuristicComplexityEstimator::new()))
//!         .build()?;
//!     let scheduler = Scheduler::new(SchedulerConfig::default(), ExecutionServices::default());
//!
//!     let plan = planner
//!         .create_plan(Task::new("t1", "Implement the authentication system"))
//!         .await;
//!     let results = planner
//!         .execute_plan(
//!             &plan,
//!             |task| {
//!                 let scheduler = scheduler.clone();
//!                 async move { scheduler.execute_task(task).await.map_err(anyhow::Error::from) }
//!             },
//!             None,
//!         )
//!         .await?;
//!
//!     println!("{} tasks executed", results.len());
//!     Ok(())
//! }
//! ```

/// Task orchestration engine.
///
/// Planning, dependency resolution, lifecycle management and scheduling.
pub mod task;

/// Text generation interface used by LLM-assisted decomposition.
pub mod llm;

/// Environment constants and path utilities.
pub mod env;

// CLI module for command-line interface
pub mod cli;

// Re-export main task types
pub use task::{
    ExecutionStrategy, Plan, Planner, PlannerConfig, Scheduler, SchedulerConfig, Task,
    TaskPriority, TaskResult, TaskStatus,
};

// Re-export configuration
pub use cli::{ConfigDiscovery, OrchestratorConfig};
