//! Command line argument parsing
//!
//! Subcommands:
//! - `plan`: Decompose a task description and print the plan
//! - `run`: Plan and execute a task description
//! - `cron`: Validate a cron expression and list upcoming fire times
//! - `show-config`: Show configuration discovery information

use crate::task::{Task, TaskPriority};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "taskweave")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Local-first task orchestrator: plan, run and schedule tasks")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    /// Enable verbose (debug) logging
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Task described on the command line
#[derive(Debug, Clone, ClapArgs)]
pub struct TaskArgs {
    /// Task description
    pub description: String,
    /// Task id
    #[arg(long = "id", default_value = "task")]
    pub id: String,
    /// Priority: urgent, high, medium or low
    #[arg(short = 'p', long = "priority", default_value = "medium", value_parser = parse_priority)]
    pub priority: TaskPriority,
    /// Configuration file path
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,
}

impl TaskArgs {
    pub fn to_task(&self) -> Task {
        Task::new(self.id.clone(), self.description.clone()).with_priority(self.priority)
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Decompose a task and print the plan as JSON
    Plan {
        #[command(flatten)]
        task: TaskArgs,
    },
    /// Plan a task and execute it
    Run {
        #[command(flatten)]
        task: TaskArgs,
    },
    /// Validate a cron expression and show upcoming fire times
    Cron {
        /// Cron expression (5 fields, or 6 with leading seconds)
        expression: String,
        /// Number of fire times to list
        #[arg(short = 'n', long = "count", default_value_t = 5)]
        count: usize,
    },
    /// Show configuration discovery information
    ShowConfig,
}

fn parse_priority(value: &str) -> Result<TaskPriority, String> {
    TaskPriority::parse(value).ok_or_else(|| format!("unknown priority '{}'", value))
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }

    /// Tracing filter implied by the flags
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "taskweave=debug"
        } else {
            crate::env::DEFAULT_LOG_FILTER
        }
    }
}
