//! Environment constants and path utilities for the task orchestrator.
//!
//! Centralizes the configuration file names and the planning constants used
//! throughout the crate, making them easier to maintain and modify.

use std::path::{Path, PathBuf};

/// Main application directory name (hidden directory like .git, .vscode)
pub const TASKWEAVE_DIR_NAME: &str = ".taskweave";

/// Configuration file name inside the application directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration file name looked up directly in the working directory
pub const LOCAL_CONFIG_FILE_NAME: &str = "taskweave.toml";

/// Default tracing filter for the binary
pub const DEFAULT_LOG_FILTER: &str = "taskweave=info";

/// Planning constants
pub mod planning {
    /// Complexity total below which a task is treated as atomic
    pub const DECOMPOSITION_THRESHOLD: f64 = 30.0;

    /// Complexity total from which LLM-assisted decomposition is attempted
    pub const LLM_DECOMPOSITION_THRESHOLD: f64 = 50.0;

    /// Default bound on recursive decomposition
    pub const MAX_DECOMPOSITION_DEPTH: u32 = 3;

    /// Independent-subtask ratio from which a plan runs in parallel
    pub const PARALLEL_RATIO_THRESHOLD: f64 = 0.5;

    /// Minimum length of a split fragment to become its own subtask
    pub const MIN_SPLIT_FRAGMENT_LEN: usize = 10;
}

/// Lifecycle constants
pub mod lifecycle {
    /// Error recorded when a task is cancelled
    pub const CANCELLED_ERROR: &str = "cancelled";
}

/// Scheduler constants
pub mod scheduling {
    /// Default delay before an automatic retry
    pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
}

/// Build the application directory path from a root
pub fn taskweave_dir_path(root: &Path) -> PathBuf {
    root.join(TASKWEAVE_DIR_NAME)
}

/// Build config file path in user's home directory
pub fn user_config_file_path(home_dir: &Path) -> PathBuf {
    taskweave_dir_path(home_dir).join(CONFIG_FILE_NAME)
}

/// Build local config file path in current directory
pub fn local_config_file_path(current_dir: &Path) -> PathBuf {
    taskweave_dir_path(current_dir).join(CONFIG_FILE_NAME)
}
