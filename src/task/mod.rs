pub mod complexity;
pub mod cron;
pub mod decomposition;
pub mod error;
pub mod events;
pub mod execution;
pub mod graph;
pub mod lifecycle;
pub mod plan;
pub mod planner;
pub mod scheduler;
pub mod types;


pub use complexity::*;
pub use cron::CronSchedule;
pub use decomposition::Decomposition;
pub use error::*;
pub use events::*;
pub use execution::*;
pub use graph::*;
pub use lifecycle::{LifecycleEvent, LifecycleHandle, LifecycleState, TaskLifecycle};
pub use plan::*;
pub use planner::*;
pub use scheduler::*;
pub use types::*;
