//! Cron routines and on-demand task execution.
//!
//! The [`Scheduler`] owns two pieces of state:
//!
//! - **scheduled routines**: at most one cron registration per task id, each
//!   with its own timer task while the scheduler is running
//! - **running-machine registry**: one [`LifecycleHandle`] per task id with an
//!   active execution; registration goes through the map's entry API so that a
//!   second start for the same id is rejected atomically
//!
//! Timers and direct calls share one execution path,
//! [`Scheduler::execute_task`].
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use taskweave::task::{ExecutionServices, Scheduler, SchedulerConfig, Task};
//!
//! # async fn demo() {
//! let scheduler = Scheduler::new(SchedulerConfig::default(), ExecutionServices::default());
//! scheduler.schedule("*/5 * * * *", Task::new("sync", "Sync the mirror"));
//! scheduler.start();
//!
//! let result = scheduler.execute_task(Task::new("once", "Run once")).await;
//! assert!(result.is_ok());
//! scheduler.stop();
//! # }
//! ```

use crate::env::lifecycle::CANCELLED_ERROR;
use crate::env::scheduling::DEFAULT_RETRY_DELAY_MS;
use crate::task::cron::CronSchedule;
use crate::task::error::SchedulerError;
use crate::task::events::{EventDispatcher, TaskEvent, TaskEventHandler};
use crate::task::execution::{ExecutionServices, TaskExecutor};
use crate::task::lifecycle::{LifecycleEvent, LifecycleHandle, LifecycleState};
use crate::task::types::{Task, TaskId, TaskResult};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Automatic retries after a failed (not cancelled) run; 0 disables
    pub max_retry_attempts: u32,
    pub retry_delay_ms: u64,
    /// Upper bound of random delay added to each retry
    pub retry_jitter_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: 0,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            retry_jitter_ms: 0,
        }
    }
}

/// Public view of one scheduled routine
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledRoutineInfo {
    pub task_id: TaskId,
    pub cron_expression: String,
    /// Whether a timer is currently armed
    pub armed: bool,
    pub next_fire: Option<DateTime<Utc>>,
}

struct ScheduledRoutine {
    schedule: CronSchedule,
    task: Task,
    timer: Option<JoinHandle<()>>,
}

impl ScheduledRoutine {
    fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    fn info(&self) -> ScheduledRoutineInfo {
        ScheduledRoutineInfo {
            task_id: self.task.id.clone(),
            cron_expression: self.schedule.expression().to_string(),
            armed: self.timer.is_some(),
            next_fire: self.schedule.next_after(Utc::now()),
        }
    }
}

struct SchedulerInner {
    config: SchedulerConfig,
    executor: TaskExecutor,
    events: Arc<EventDispatcher>,
    routines: Mutex<HashMap<TaskId, ScheduledRoutine>>,
    running: DashMap<TaskId, LifecycleHandle>,
    is_running: AtomicBool,
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        let routines = self
            .routines
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for routine in routines.values_mut() {
            routine.disarm();
        }
    }
}

/// Registry entry owned by one execution; deregisters on drop
struct Registration {
    inner: Arc<SchedulerInner>,
    handle: LifecycleHandle,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let handle = &self.handle;
        self.inner
            .running
            .remove_if(handle.task_id(), |_, registered| registered.same_machine(handle));
    }
}

/// Cron and on-demand task scheduler; clones share state
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, services: ExecutionServices) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                executor: TaskExecutor::new(services),
                events: Arc::new(EventDispatcher::new()),
                routines: Mutex::new(HashMap::new()),
                running: DashMap::new(),
                is_running: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Add event handler
    pub fn add_event_handler(&self, handler: Arc<dyn TaskEventHandler>) {
        self.inner.events.add_handler(handler);
    }

    pub fn events(&self) -> Arc<EventDispatcher> {
        self.inner.events.clone()
    }

    pub fn is_running(&self) -> bool {
        self.inner.is_running.load(Ordering::SeqCst)
    }

    fn routines(&self) -> MutexGuard<'_, HashMap<TaskId, ScheduledRoutine>> {
        self.inner
            .routines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register `task` to run on `cron_expression`.
    ///
    /// Returns `false` without side effects for an invalid expression. An
    /// existing registration for the same task id is replaced.
    pub fn schedule(&self, cron_expression: &str, task: Task) -> bool {
        let schedule = match CronSchedule::parse(cron_expression) {
            Ok(schedule) => schedule,
            Err(e) => {
                warn!(
                    "Rejected cron expression '{}' for task {}: {}",
                    cron_expression, task.id, e
                );
                return false;
            }
        };

        let task_id = task.id.clone();
        let mut routines = self.routines();
        if let Some(mut previous) = routines.remove(&task_id) {
            warn!(
                "Task {} already scheduled with '{}'; replacing",
                task_id,
                previous.schedule.expression()
            );
            previous.disarm();
        }

        let mut routine = ScheduledRoutine {
            schedule,
            task,
            timer: None,
        };
        if self.is_running() {
            self.arm(&mut routine);
        }
        info!(
            "Scheduled task {} with '{}'",
            task_id,
            routine.schedule.expression()
        );
        routines.insert(task_id, routine);
        true
    }

    /// Remove the cron registration for `task_id`, if any
    pub fn unschedule(&self, task_id: &str) -> bool {
        match self.routines().remove(task_id) {
            Some(mut routine) => {
                routine.disarm();
                info!("Unscheduled task {}", task_id);
                true
            }
            None => false,
        }
    }

    /// Unschedule `task_id` and cancel its active execution.
    ///
    /// Returns `true` if either had an effect. An in-flight operation is not
    /// aborted; only the recorded outcome changes.
    pub fn cancel_task(&self, task_id: &str) -> bool {
        let unscheduled = self.unschedule(task_id);

        let cancelled = match self.handle(task_id) {
            Some(handle) => match handle.send(LifecycleEvent::Cancel) {
                Ok(_) => {
                    info!("Cancelled task {}", task_id);
                    true
                }
                Err(_) if handle.state() == LifecycleState::Failed => {
                    // Waiting to retry
                    handle.block_retry();
                    info!("Cancelled pending retry of task {}", task_id);
                    true
                }
                Err(e) => {
                    debug!("Cancel ignored for task {}: {}", task_id, e);
                    false
                }
            },
            None => false,
        };

        unscheduled || cancelled
    }

    /// Send `PAUSE` to the active execution of `task_id`
    pub fn pause_task(&self, task_id: &str) -> bool {
        self.signal(task_id, LifecycleEvent::Pause)
    }

    /// Send `RESUME` to the active execution of `task_id`
    pub fn resume_task(&self, task_id: &str) -> bool {
        self.signal(task_id, LifecycleEvent::Resume)
    }

    fn signal(&self, task_id: &str, event: LifecycleEvent) -> bool {
        let Some(handle) = self.handle(task_id) else {
            debug!("No active execution for task {}", task_id);
            return false;
        };
        if let Err(e) = handle.send(event) {
            warn!("Task {}: {}", task_id, e);
        }
        true
    }

    /// Clone of the registered handle, released from the map guard
    fn handle(&self, task_id: &str) -> Option<LifecycleHandle> {
        self.inner.running.get(task_id).map(|entry| entry.value().clone())
    }

    /// Arm every registered timer. Idempotent.
    pub fn start(&self) {
        if self.inner.is_running.swap(true, Ordering::SeqCst) {
            info!("Scheduler already running");
            return;
        }

        let mut routines = self.routines();
        for routine in routines.values_mut() {
            self.arm(routine);
        }
        let armed = routines.len();
        drop(routines);

        info!("Scheduler started with {} routines", armed);
        self.inner.events.emit(TaskEvent::Started);
    }

    /// Disarm every timer without touching in-flight executions. Idempotent.
    pub fn stop(&self) {
        if !self.inner.is_running.swap(false, Ordering::SeqCst) {
            info!("Scheduler already stopped");
            return;
        }

        for routine in self.routines().values_mut() {
            routine.disarm();
        }

        info!("Scheduler stopped");
        self.inner.events.emit(TaskEvent::Stopped);
    }

    fn arm(&self, routine: &mut ScheduledRoutine) {
        routine.disarm();
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!(
                "No async runtime; cannot arm timer for task {}",
                routine.task.id
            );
            return;
        };
        let timer = runtime.spawn(run_timer(
            Arc::downgrade(&self.inner),
            routine.schedule.clone(),
            routine.task.clone(),
        ));
        routine.timer = Some(timer);
    }

    pub fn scheduled_routines(&self) -> Vec<ScheduledRoutineInfo> {
        let mut routines: Vec<ScheduledRoutineInfo> =
            self.routines().values().map(ScheduledRoutine::info).collect();
        routines.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        routines
    }

    pub fn active_task_ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self
            .inner
            .running
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn task_state(&self, task_id: &str) -> Option<LifecycleState> {
        self.handle(task_id).map(|handle| handle.state())
    }

    /// Run `task` through a fresh lifecycle machine and await its outcome.
    ///
    /// Fails with [`SchedulerError::AlreadyActive`] if the id already has an
    /// active execution. The execution runs on its own task: dropping the
    /// returned future does not stop it, and the registry entry is removed
    /// once it reaches a terminal state.
    pub async fn execute_task(&self, task: Task) -> Result<TaskResult, SchedulerError> {
        let task_id = task.id.clone();
        let handle = LifecycleHandle::new(task_id.clone(), self.inner.events.clone());

        match self.inner.running.entry(task_id.clone()) {
            Entry::Occupied(_) => {
                warn!("Task {} is already active; rejecting second start", task_id);
                return Err(SchedulerError::AlreadyActive(task_id));
            }
            Entry::Vacant(slot) => {
                slot.insert(handle.clone());
            }
        }

        let registration = Registration {
            inner: self.inner.clone(),
            handle: handle.clone(),
        };
        let scheduler = self.clone();
        let execution = tokio::spawn(async move {
            let _registration = registration;
            scheduler.drive(&handle, task).await
        });

        match execution.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Execution of task {} aborted: {}", task_id, e);
                Err(SchedulerError::TaskFailed {
                    task_id,
                    error: format!("execution aborted: {}", e),
                })
            }
        }
    }

    async fn drive(&self, handle: &LifecycleHandle, task: Task) -> Result<TaskResult, SchedulerError> {
        handle.send(LifecycleEvent::Start(task.clone()))?;
        let mut attempt = 0;

        loop {
            self.spawn_attempt(handle, &task);

            let error = match handle.wait_terminal().await {
                Ok(result) => return Ok(result),
                Err(error) => error,
            };

            let retryable = error != CANCELLED_ERROR && !handle.is_retry_blocked();
            if !retryable || attempt >= self.inner.config.max_retry_attempts {
                return Err(SchedulerError::TaskFailed {
                    task_id: task.id.clone(),
                    error,
                });
            }

            attempt += 1;
            let delay = self.retry_delay();
            warn!(
                "Task {} failed ({}); retry {}/{} in {:?}",
                task.id, error, attempt, self.inner.config.max_retry_attempts, delay
            );
            tokio::time::sleep(delay).await;

            if handle.is_retry_blocked() {
                return Err(SchedulerError::TaskFailed {
                    task_id: task.id.clone(),
                    error: CANCELLED_ERROR.to_string(),
                });
            }
            handle.send(LifecycleEvent::Retry)?;
        }
    }

    fn spawn_attempt(&self, handle: &LifecycleHandle, task: &Task) {
        let executor = self.inner.executor.clone();
        let handle = handle.clone();
        let task = task.clone();
        tokio::spawn(async move {
            let run = AssertUnwindSafe(executor.execute_task(&task)).catch_unwind();
            let outcome = match run.await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!("Task {} panicked: {}", task.id, message);
                    Err(format!("panicked: {}", message))
                }
            };
            handle.complete(outcome);
        });
    }

    fn retry_delay(&self) -> Duration {
        let config = &self.inner.config;
        let jitter = if config.retry_jitter_ms > 0 {
            rand::rng().random_range(0..=config.retry_jitter_ms)
        } else {
            0
        };
        Duration::from_millis(config.retry_delay_ms + jitter)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Timer body for one routine; exits when the scheduler is dropped
async fn run_timer(inner: Weak<SchedulerInner>, schedule: CronSchedule, task: Task) {
    loop {
        let now = Utc::now();
        let Some(next) = schedule.next_after(now) else {
            warn!(
                "Cron '{}' for task {} has no upcoming fire time",
                schedule.expression(),
                task.id
            );
            return;
        };
        tokio::time::sleep((next - now).to_std().unwrap_or_default()).await;

        let Some(inner) = inner.upgrade() else {
            return;
        };
        let scheduler = Scheduler { inner };
        if !scheduler.is_running() {
            debug!("Scheduler stopped; skipping firing of {}", task.id);
            continue;
        }

        debug!("Cron '{}' fired for task {}", schedule.expression(), task.id);
        let fired = task.clone();
        tokio::spawn(async move {
            if let Err(e) = scheduler.execute_task(fired).await {
                warn!("Scheduled run failed: {}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.max_retry_attempts, 0);
        assert_eq!(config.retry_delay_ms, DEFAULT_RETRY_DELAY_MS);
    }

    #[test]
    fn test_retry_delay_respects_jitter_bound() {
        let scheduler = Scheduler::new(
            SchedulerConfig {
                max_retry_attempts: 1,
                retry_delay_ms: 10,
                retry_jitter_ms: 5,
            },
            ExecutionServices::default(),
        );
        for _ in 0..20 {
            let delay = scheduler.retry_delay();
            assert!(delay >= Duration::from_millis(10));
            assert!(delay <= Duration::from_millis(15));
        }
    }

    #[tokio::test]
    async fn test_schedule_while_stopped_is_not_armed() {
        let scheduler = Scheduler::new(SchedulerConfig::default(), ExecutionServices::default());
        assert!(scheduler.schedule("0 0 * * *", Task::new("nightly", "Nightly job")));

        let routines = scheduler.scheduled_routines();
        assert_eq!(routines.len(), 1);
        assert!(!routines[0].armed);
        assert!(routines[0].next_fire.is_some());

        scheduler.start();
        assert!(scheduler.scheduled_routines()[0].armed);
        scheduler.stop();
        assert!(!scheduler.scheduled_routines()[0].armed);
    }
}
