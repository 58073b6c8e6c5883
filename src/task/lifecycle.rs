//! Per-execution task lifecycle.
//!
//! [`TaskLifecycle`] is a plain finite state machine driven by an explicit
//! `(state, event) -> (state, effects)` table ([`transition`]). It performs no
//! I/O; effects are applied to its own context (task, result, error) and the
//! [`Effect::Execute`] effect is handed back to the caller, which owns the
//! actual run.
//!
//! ```text
//!            SCHEDULE            START
//!   idle ───────────► scheduled ───────► running ◄──── RESUME ──── paused
//!     │                   │               │  │  └────── PAUSE ──────► │
//!     └────── START ──────┼──────────────►│  │                        │
//!                         │     succeeded │  │ failed                 │
//!                         │               ▼  ▼                        │
//!                         │         completed  failed ◄── CANCEL ─────┘
//!                         └──── CANCEL ─────────►│  (also from running)
//!                                                │
//!                                  RETRY (task held) ──► running
//! ```
//!
//! [`LifecycleHandle`] shares one machine between the task runner and
//! external controllers (pause, resume, cancel), emits status notifications,
//! and lets the runner await a terminal state.
//!
//! Notifications are queued under the machine lock in transition order and
//! drained by a single emitter, so concurrent or re-entrant senders (an event
//! handler pausing the task it was notified about) never reorder them.
//!
//! ## Pause semantics
//!
//! Pausing is cooperative. The only suspension point of a run is the call into
//! the operation executor or tool invoker, and that call is never interrupted:
//! `PAUSE`/`RESUME` toggle the machine's status around it. If the call finishes
//! while the machine is paused, its outcome is held and applied on `RESUME`
//! (or discarded by `CANCEL`). Cancelling a running task likewise only changes
//! the recorded outcome; the in-flight call runs to completion.

use crate::env::lifecycle::CANCELLED_ERROR;
use crate::task::error::LifecycleError;
use crate::task::events::{EventDispatcher, StatusDetail, TaskEvent};
use crate::task::types::{Task, TaskId, TaskResult, TaskStatus};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Lifecycle states; `Completed` and `Failed` are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    #[default]
    Idle,
    Scheduled,
    Running,
    Paused,
    Completed,
    Failed,
}

impl LifecycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Completed | LifecycleState::Failed)
    }

    /// Status reported through notifications, if this state has one
    pub fn task_status(&self) -> Option<TaskStatus> {
        match self {
            LifecycleState::Idle | LifecycleState::Scheduled => None,
            LifecycleState::Running => Some(TaskStatus::Running),
            LifecycleState::Paused => Some(TaskStatus::Paused),
            LifecycleState::Completed => Some(TaskStatus::Completed),
            LifecycleState::Failed => Some(TaskStatus::Failed),
        }
    }
}

/// Events accepted by the machine
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Schedule(Task),
    Start(Task),
    Pause,
    Resume,
    Cancel,
    /// The running action finished without error
    Succeed(TaskResult),
    /// The running action raised an error
    Fail(String),
    Retry,
}

/// Payload-free discriminant of [`LifecycleEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEventKind {
    Schedule,
    Start,
    Pause,
    Resume,
    Cancel,
    Succeed,
    Fail,
    Retry,
}

impl LifecycleEvent {
    pub fn kind(&self) -> LifecycleEventKind {
        match self {
            LifecycleEvent::Schedule(_) => LifecycleEventKind::Schedule,
            LifecycleEvent::Start(_) => LifecycleEventKind::Start,
            LifecycleEvent::Pause => LifecycleEventKind::Pause,
            LifecycleEvent::Resume => LifecycleEventKind::Resume,
            LifecycleEvent::Cancel => LifecycleEventKind::Cancel,
            LifecycleEvent::Succeed(_) => LifecycleEventKind::Succeed,
            LifecycleEvent::Fail(_) => LifecycleEventKind::Fail,
            LifecycleEvent::Retry => LifecycleEventKind::Retry,
        }
    }
}

/// Side effects attached to a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    RecordTask,
    ClearOutcome,
    RecordResult,
    RecordError,
    RecordCancellation,
    /// Caller must run the task
    Execute,
}

const NO_EFFECTS: &[Effect] = &[];
const ON_SCHEDULE: &[Effect] = &[Effect::RecordTask];
const ON_START: &[Effect] = &[Effect::RecordTask, Effect::ClearOutcome, Effect::Execute];
const ON_CANCEL: &[Effect] = &[Effect::RecordCancellation];
const ON_SUCCEED: &[Effect] = &[Effect::RecordResult];
const ON_FAIL: &[Effect] = &[Effect::RecordError];
const ON_RETRY: &[Effect] = &[Effect::ClearOutcome, Effect::Execute];

/// The transition table
pub fn transition(
    state: LifecycleState,
    event: LifecycleEventKind,
) -> Option<(LifecycleState, &'static [Effect])> {
    use LifecycleEventKind as E;
    use LifecycleState as S;

    let next = match (state, event) {
        (S::Idle, E::Schedule) => (S::Scheduled, ON_SCHEDULE),
        (S::Idle | S::Scheduled, E::Start) => (S::Running, ON_START),
        (S::Running, E::Pause) => (S::Paused, NO_EFFECTS),
        (S::Paused, E::Resume) => (S::Running, NO_EFFECTS),
        (S::Scheduled | S::Running | S::Paused, E::Cancel) => (S::Failed, ON_CANCEL),
        (S::Running, E::Succeed) => (S::Completed, ON_SUCCEED),
        (S::Running, E::Fail) => (S::Failed, ON_FAIL),
        // Guarded on a held task reference in `TaskLifecycle::send`
        (S::Failed, E::Retry) => (S::Running, ON_RETRY),
        _ => return None,
    };
    Some(next)
}

/// Applied transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: LifecycleState,
    pub to: LifecycleState,
    pub event: LifecycleEventKind,
    pub effects: &'static [Effect],
}

impl Transition {
    pub fn requires_execution(&self) -> bool {
        self.effects.contains(&Effect::Execute)
    }
}

/// Finite state machine for one task execution
#[derive(Debug, Clone, Default)]
pub struct TaskLifecycle {
    state: LifecycleState,
    task: Option<Task>,
    result: Option<TaskResult>,
    error: Option<String>,
}

impl TaskLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn task(&self) -> Option<&Task> {
        self.task.as_ref()
    }

    pub fn result(&self) -> Option<&TaskResult> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Apply `event`, returning the transition taken
    pub fn send(&mut self, event: LifecycleEvent) -> Result<Transition, LifecycleError> {
        let kind = event.kind();
        let (to, effects) = transition(self.state, kind).ok_or(LifecycleError::InvalidTransition {
            from: self.state,
            event: kind,
        })?;

        if kind == LifecycleEventKind::Retry && self.task.is_none() {
            return Err(LifecycleError::RetryWithoutTask);
        }

        let from = self.state;
        for effect in effects {
            match effect {
                Effect::RecordTask => {
                    if let LifecycleEvent::Schedule(task) | LifecycleEvent::Start(task) = &event {
                        self.task = Some(task.clone());
                    }
                }
                Effect::ClearOutcome => {
                    self.result = None;
                    self.error = None;
                }
                Effect::RecordResult => {
                    if let LifecycleEvent::Succeed(result) = &event {
                        self.result = Some(result.clone());
                    }
                }
                Effect::RecordError => {
                    if let LifecycleEvent::Fail(error) = &event {
                        self.error = Some(error.clone());
                    }
                }
                Effect::RecordCancellation => {
                    self.error = Some(CANCELLED_ERROR.to_string());
                }
                Effect::Execute => {}
            }
        }
        self.state = to;

        debug!("Lifecycle {:?} --{:?}--> {:?}", from, kind, to);
        Ok(Transition {
            from,
            to,
            event: kind,
            effects,
        })
    }

    /// Terminal outcome, if the machine is in a terminal state
    pub fn outcome(&self) -> Option<Result<TaskResult, String>> {
        match self.state {
            LifecycleState::Completed => self.result.clone().map(Ok),
            LifecycleState::Failed => Some(Err(self
                .error
                .clone()
                .unwrap_or_else(|| "unknown error".to_string()))),
            _ => None,
        }
    }
}

struct MachineSlot {
    machine: TaskLifecycle,
    /// Outcome that arrived while paused
    deferred: Option<Result<TaskResult, String>>,
    /// Notifications not yet handed to the dispatcher, in transition order
    pending: VecDeque<Notification>,
    /// Set while some caller is draining `pending`
    emitting: bool,
}

struct HandleInner {
    task_id: TaskId,
    slot: Mutex<MachineSlot>,
    state_tx: watch::Sender<LifecycleState>,
    events: Arc<EventDispatcher>,
    retry_blocked: AtomicBool,
}

/// Shared, notifying wrapper around one [`TaskLifecycle`]
#[derive(Clone)]
pub struct LifecycleHandle {
    inner: Arc<HandleInner>,
}

impl LifecycleHandle {
    pub fn new(task_id: impl Into<TaskId>, events: Arc<EventDispatcher>) -> Self {
        let (state_tx, _rx) = watch::channel(LifecycleState::Idle);
        Self {
            inner: Arc::new(HandleInner {
                task_id: task_id.into(),
                slot: Mutex::new(MachineSlot {
                    machine: TaskLifecycle::new(),
                    deferred: None,
                    pending: VecDeque::new(),
                    emitting: false,
                }),
                state_tx,
                events,
                retry_blocked: AtomicBool::new(false),
            }),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.inner.task_id
    }

    fn slot(&self) -> MutexGuard<'_, MachineSlot> {
        self.inner
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> LifecycleState {
        self.slot().machine.state()
    }

    /// Copy of the underlying machine
    pub fn snapshot(&self) -> TaskLifecycle {
        self.slot().machine.clone()
    }

    /// Send an external event (start, pause, resume, cancel, retry)
    pub fn send(&self, event: LifecycleEvent) -> Result<Transition, LifecycleError> {
        let transition = {
            let mut slot = self.slot();
            let transition = slot.machine.send(event)?;
            if let Some(notification) = self.notification(&slot.machine, transition) {
                slot.pending.push_back(notification);
            }

            match transition.event {
                LifecycleEventKind::Cancel => {
                    if slot.deferred.take().is_some() {
                        debug!("Discarding outcome of cancelled task {}", self.task_id());
                    }
                }
                LifecycleEventKind::Resume => {
                    if let Some(outcome) = slot.deferred.take() {
                        match slot.machine.send(outcome_event(outcome)) {
                            Ok(settled) => {
                                if let Some(notification) = self.notification(&slot.machine, settled) {
                                    slot.pending.push_back(notification);
                                }
                            }
                            Err(e) => warn!("Held outcome for {} rejected: {}", self.task_id(), e),
                        }
                    }
                }
                _ => {}
            }
            transition
        };
        self.flush();
        Ok(transition)
    }

    /// Report the outcome of the running action.
    ///
    /// Applied immediately while running, held while paused, and ignored once
    /// the machine is terminal (e.g. after a cancel).
    pub fn complete(&self, outcome: Result<TaskResult, String>) {
        {
            let mut slot = self.slot();
            match slot.machine.state() {
                LifecycleState::Running => match slot.machine.send(outcome_event(outcome)) {
                    Ok(transition) => {
                        if let Some(notification) = self.notification(&slot.machine, transition) {
                            slot.pending.push_back(notification);
                        }
                    }
                    Err(e) => warn!("Task {} outcome rejected: {}", self.task_id(), e),
                },
                LifecycleState::Paused => {
                    debug!("Task {} finished while paused; holding outcome", self.task_id());
                    slot.deferred = Some(outcome);
                }
                state => {
                    debug!(
                        "Ignoring outcome for task {} in state {:?}",
                        self.task_id(),
                        state
                    );
                }
            }
        }
        self.flush();
    }

    /// Whether both handles wrap the same machine
    pub fn same_machine(&self, other: &LifecycleHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Prevent any further `RETRY`; used when cancelling between attempts
    pub fn block_retry(&self) {
        self.inner.retry_blocked.store(true, Ordering::SeqCst);
    }

    pub fn is_retry_blocked(&self) -> bool {
        self.inner.retry_blocked.load(Ordering::SeqCst)
    }

    /// Wait until the machine reaches a terminal state and return its outcome
    pub async fn wait_terminal(&self) -> Result<TaskResult, String> {
        let mut rx = self.inner.state_tx.subscribe();
        if rx.wait_for(|state| state.is_terminal()).await.is_err() {
            return Err("lifecycle closed".to_string());
        }
        self.slot()
            .machine
            .outcome()
            .unwrap_or_else(|| Err("lifecycle left terminal state".to_string()))
    }

    fn notification(&self, machine: &TaskLifecycle, transition: Transition) -> Option<Notification> {
        let task = machine.task()?.clone();
        let detail = match transition.to {
            LifecycleState::Completed => {
                StatusDetail::Result(machine.result().cloned()?)
            }
            LifecycleState::Failed => {
                StatusDetail::Error(machine.error().unwrap_or_default().to_string())
            }
            _ => StatusDetail::None,
        };
        Some(Notification {
            task,
            transition,
            detail,
        })
    }

    /// Drain queued notifications, then publish the latest state to waiters.
    ///
    /// Returns at once if another caller (or an outer frame of this one) is
    /// already draining; that emitter picks up whatever was queued.
    fn flush(&self) {
        {
            let mut slot = self.slot();
            if slot.emitting {
                return;
            }
            slot.emitting = true;
        }

        loop {
            let next = {
                let mut slot = self.slot();
                match slot.pending.pop_front() {
                    Some(notification) => notification,
                    None => {
                        slot.emitting = false;
                        self.inner.state_tx.send_replace(slot.machine.state());
                        return;
                    }
                }
            };
            self.emit(next);
        }
    }

    fn emit(&self, notification: Notification) {
        let Some(status) = notification.transition.to.task_status() else {
            return;
        };
        if notification.transition.event == LifecycleEventKind::Resume {
            self.inner.events.emit(TaskEvent::TaskStatusChanged {
                task: notification.task,
                status,
            });
        } else {
            self.inner
                .events
                .emit_status(&notification.task, status, notification.detail);
        }
    }
}

struct Notification {
    task: Task,
    transition: Transition,
    detail: StatusDetail,
}

fn outcome_event(outcome: Result<TaskResult, String>) -> LifecycleEvent {
    match outcome {
        Ok(result) => LifecycleEvent::Succeed(result),
        Err(error) => LifecycleEvent::Fail(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::events::RecordingEventHandler;

    fn task() -> Task {
        Task::new("t1", "lifecycle test")
    }

    fn handle() -> (LifecycleHandle, Arc<RecordingEventHandler>) {
        let events = Arc::new(EventDispatcher::new());
        let recorder = Arc::new(RecordingEventHandler::new());
        events.add_handler(recorder.clone());
        (LifecycleHandle::new("t1", events), recorder)
    }

    #[test]
    fn test_schedule_then_start_executes() {
        let mut machine = TaskLifecycle::new();
        machine.send(LifecycleEvent::Schedule(task())).unwrap();
        assert_eq!(machine.state(), LifecycleState::Scheduled);

        let transition = machine.send(LifecycleEvent::Start(task())).unwrap();
        assert!(transition.requires_execution());
        assert_eq!(machine.state(), LifecycleState::Running);
    }

    #[test]
    fn test_success_records_result() {
        let mut machine = TaskLifecycle::new();
        machine.send(LifecycleEvent::Start(task())).unwrap();
        machine
            .send(LifecycleEvent::Succeed(TaskResult::success("t1", None)))
            .unwrap();
        assert_eq!(machine.state(), LifecycleState::Completed);
        assert!(machine.outcome().unwrap().is_ok());
    }

    #[test]
    fn test_cancel_records_cancelled_error() {
        let mut machine = TaskLifecycle::new();
        machine.send(LifecycleEvent::Schedule(task())).unwrap();
        machine.send(LifecycleEvent::Cancel).unwrap();
        assert_eq!(machine.state(), LifecycleState::Failed);
        assert_eq!(machine.error(), Some(CANCELLED_ERROR));
    }

    #[test]
    fn test_invalid_events_are_rejected() {
        let mut machine = TaskLifecycle::new();
        assert_eq!(
            machine.send(LifecycleEvent::Pause),
            Err(LifecycleError::InvalidTransition {
                from: LifecycleState::Idle,
                event: LifecycleEventKind::Pause,
            })
        );

        machine.send(LifecycleEvent::Start(task())).unwrap();
        machine
            .send(LifecycleEvent::Succeed(TaskResult::success("t1", None)))
            .unwrap();
        assert!(machine.send(LifecycleEvent::Cancel).is_err());
        assert!(machine.send(LifecycleEvent::Retry).is_err());
    }

    #[test]
    fn test_retry_from_failed_clears_error() {
        let mut machine = TaskLifecycle::new();
        machine.send(LifecycleEvent::Start(task())).unwrap();
        machine.send(LifecycleEvent::Fail("boom".into())).unwrap();
        assert_eq!(machine.error(), Some("boom"));

        let transition = machine.send(LifecycleEvent::Retry).unwrap();
        assert!(transition.requires_execution());
        assert_eq!(machine.state(), LifecycleState::Running);
        assert_eq!(machine.error(), None);
    }

    #[test]
    fn test_table_covers_terminal_states() {
        for kind in [
            LifecycleEventKind::Schedule,
            LifecycleEventKind::Start,
            LifecycleEventKind::Pause,
            LifecycleEventKind::Resume,
            LifecycleEventKind::Cancel,
            LifecycleEventKind::Succeed,
            LifecycleEventKind::Fail,
        ] {
            assert!(transition(LifecycleState::Completed, kind).is_none());
        }
        assert!(transition(LifecycleState::Completed, LifecycleEventKind::Retry).is_none());
        assert!(transition(LifecycleState::Failed, LifecycleEventKind::Retry).is_some());
    }

    #[tokio::test]
    async fn test_handle_emits_running_then_completed() {
        let (handle, recorder) = handle();
        handle.send(LifecycleEvent::Start(task())).unwrap();
        handle.complete(Ok(TaskResult::success("t1", None)));

        let result = handle.wait_terminal().await.unwrap();
        assert!(result.success);
        assert_eq!(
            recorder.statuses_for("t1"),
            vec![TaskStatus::Running, TaskStatus::Completed]
        );
    }

    #[tokio::test]
    async fn test_outcome_held_while_paused() {
        let (handle, recorder) = handle();
        handle.send(LifecycleEvent::Start(task())).unwrap();
        handle.send(LifecycleEvent::Pause).unwrap();
        handle.complete(Ok(TaskResult::success("t1", None)));
        assert_eq!(handle.state(), LifecycleState::Paused);

        handle.send(LifecycleEvent::Resume).unwrap();
        assert_eq!(handle.state(), LifecycleState::Completed);
        assert_eq!(
            recorder.statuses_for("t1"),
            vec![
                TaskStatus::Running,
                TaskStatus::Paused,
                TaskStatus::Running,
                TaskStatus::Completed
            ]
        );
    }

    /// Pauses its task from inside the `Running` notification
    #[derive(Default)]
    struct PauseOnStart {
        handle: Mutex<Option<LifecycleHandle>>,
        events: Mutex<Vec<String>>,
    }

    impl crate::task::events::TaskEventHandler for PauseOnStart {
        fn handle_event(&self, event: &TaskEvent) -> anyhow::Result<()> {
            let label = match event {
                TaskEvent::TaskStatusChanged { status, .. } => format!("status:{}", status),
                TaskEvent::TaskStarted { .. } => "started".to_string(),
                TaskEvent::TaskPaused { .. } => "paused".to_string(),
                other => format!("{:?}", other),
            };
            self.events.lock().unwrap().push(label);

            if matches!(event, TaskEvent::TaskStatusChanged { status: TaskStatus::Running, .. }) {
                let handle = self.handle.lock().unwrap().clone();
                if let Some(handle) = handle {
                    handle.send(LifecycleEvent::Pause)?;
                }
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_reentrant_send_keeps_emission_order() {
        let events = Arc::new(EventDispatcher::new());
        let pauser = Arc::new(PauseOnStart::default());
        events.add_handler(pauser.clone());
        let handle = LifecycleHandle::new("t1", events);
        *pauser.handle.lock().unwrap() = Some(handle.clone());

        handle.send(LifecycleEvent::Start(task())).unwrap();

        assert_eq!(handle.state(), LifecycleState::Paused);
        assert_eq!(
            *pauser.events.lock().unwrap(),
            vec!["status:running", "started", "status:paused", "paused"]
        );
        assert_eq!(*handle.inner.state_tx.borrow(), LifecycleState::Paused);
    }

    #[tokio::test]
    async fn test_concurrent_senders_keep_transition_order() {
        let (handle, recorder) = handle();
        handle.send(LifecycleEvent::Start(task())).unwrap();

        let pauser = handle.clone();
        let pausing = std::thread::spawn(move || {
            for _ in 0..50 {
                let _ = pauser.send(LifecycleEvent::Pause);
                let _ = pauser.send(LifecycleEvent::Resume);
            }
        });
        let finisher = handle.clone();
        let finishing = std::thread::spawn(move || {
            finisher.complete(Ok(TaskResult::success("t1", None)));
        });
        pausing.join().unwrap();
        finishing.join().unwrap();
        if handle.state() == LifecycleState::Paused {
            handle.send(LifecycleEvent::Resume).unwrap();
        }

        handle.wait_terminal().await.unwrap();
        let statuses = recorder.statuses_for("t1");
        assert_eq!(statuses.last(), Some(&TaskStatus::Completed));
        // Every status follows one legal transition from its predecessor
        for pair in statuses.windows(2) {
            let legal = matches!(
                (pair[0], pair[1]),
                (TaskStatus::Running, TaskStatus::Paused)
                    | (TaskStatus::Paused, TaskStatus::Running)
                    | (TaskStatus::Running, TaskStatus::Completed)
            );
            assert!(legal, "illegal order {:?} -> {:?}", pair[0], pair[1]);
        }
    }

    #[tokio::test]
    async fn test_outcome_after_cancel_is_ignored() {
        let (handle, recorder) = handle();
        handle.send(LifecycleEvent::Start(task())).unwrap();
        handle.send(LifecycleEvent::Pause).unwrap();
        handle.send(LifecycleEvent::Cancel).unwrap();
        handle.complete(Ok(TaskResult::success("t1", None)));

        assert_eq!(handle.wait_terminal().await.unwrap_err(), CANCELLED_ERROR);
        assert_eq!(
            recorder.statuses_for("t1"),
            vec![TaskStatus::Running, TaskStatus::Paused, TaskStatus::Failed]
        );
    }
}
