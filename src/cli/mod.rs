//! CLI-specific functionality for the task orchestrator
//!
//! This module contains argument parsing and configuration discovery.

pub mod args;
pub mod config;

pub use args::{Args, Commands, TaskArgs};
pub use config::{ConfigDiscovery, OrchestratorConfig};
