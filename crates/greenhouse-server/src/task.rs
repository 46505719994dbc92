//! Scheduled tasks
//!
//! A [`Task`] pairs a schedule (cron expression or a single instant) with an
//! async action. Started tasks own a driver future that sleeps until the next
//! occurrence and fires the action on its own tokio task, so a slow or
//! failing action never delays the schedule. Every task is kept in the
//! [`TaskPool`] it was created from.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub type TaskId = u64;

pub type TaskAction = Arc<dyn Fn(Arc<Task>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(i64),
}

#[derive(Debug, Clone)]
pub enum TaskSchedule {
    /// Six-field cron expression (with seconds), evaluated in UTC
    Cron(Box<cron::Schedule>),
    /// Fires once
    At(DateTime<Utc>),
}

impl TaskSchedule {
    pub fn cron(expr: &str) -> Result<Self, TaskError> {
        cron::Schedule::from_str(expr)
            .map(|schedule| TaskSchedule::Cron(Box::new(schedule)))
            .map_err(|e| TaskError::InvalidCron {
                expr: expr.to_string(),
                reason: e.to_string(),
            })
    }

    pub fn at(date: DateTime<Utc>) -> Self {
        TaskSchedule::At(date)
    }

    /// Single occurrence at a Unix timestamp (seconds)
    pub fn at_timestamp(secs: i64) -> Result<Self, TaskError> {
        DateTime::<Utc>::from_timestamp(secs, 0)
            .map(TaskSchedule::At)
            .ok_or(TaskError::InvalidTimestamp(secs))
    }

    /// First occurrence strictly after `after`
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            TaskSchedule::Cron(schedule) => schedule.after(&after).next(),
            TaskSchedule::At(date) => (*date > after).then_some(*date),
        }
    }
}

impl FromStr for TaskSchedule {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskSchedule::cron(s)
    }
}

pub struct TaskOptions {
    pub origin: Option<String>,
    pub schedule: TaskSchedule,
    pub action: TaskAction,
    pub auto_start: bool,
}

impl TaskOptions {
    pub fn new<F, Fut>(schedule: TaskSchedule, action: F) -> Self
    where
        F: Fn(Arc<Task>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            origin: None,
            schedule,
            action: Arc::new(move |task| Box::pin(action(task))),
            auto_start: false,
        }
    }

    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }
}

#[derive(Default)]
struct TaskState {
    handle: Option<JoinHandle<()>>,
    last_call: Option<DateTime<Utc>>,
}

pub struct Task {
    id: TaskId,
    origin: Option<String>,
    schedule: TaskSchedule,
    action: TaskAction,
    state: Mutex<TaskState>,
}

/// Task as listed by the operational endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    pub id: TaskId,
    pub origin: Option<String>,
    pub running: bool,
    pub last_call: Option<DateTime<Utc>>,
    pub next_call: Option<DateTime<Utc>>,
}

impl Task {
    fn state(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    pub fn schedule(&self) -> &TaskSchedule {
        &self.schedule
    }

    pub fn last_call(&self) -> Option<DateTime<Utc>> {
        self.state().last_call
    }

    /// Next occurrence from now, whether started or not
    pub fn next_call(&self) -> Option<DateTime<Utc>> {
        self.schedule.next_after(Utc::now())
    }

    pub fn running(&self) -> bool {
        self.state()
            .handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Start firing on schedule; no-op when already running
    pub fn start(self: &Arc<Self>) {
        let mut state = self.state();
        if state.handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        state.handle = Some(tokio::spawn(drive(Arc::downgrade(self))));
        drop(state);
        info!(task = %self, next_call = ?self.next_call(), "task started");
    }

    pub fn stop(&self) {
        if let Some(handle) = self.state().handle.take() {
            handle.abort();
            info!(task = %self, "task stopped");
        }
    }

    /// Fire the action now. `last_call` is recorded before the action runs;
    /// errors and panics are logged and reported as `false`.
    pub async fn run(self: Arc<Self>) -> bool {
        self.state().last_call = Some(Utc::now());
        debug!(task = %self, "performing action");

        let action = (self.action)(Arc::clone(&self));
        match tokio::spawn(action).await {
            Ok(Ok(())) => {
                debug!(task = %self, next_call = ?self.next_call(), "action performed");
                true
            }
            Ok(Err(e)) => {
                error!(task = %self, error = %format!("{e:#}"), "task action failed");
                false
            }
            Err(e) => {
                error!(task = %self, error = %e, "task action panicked");
                false
            }
        }
    }

    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            id: self.id,
            origin: self.origin.clone(),
            running: self.running(),
            last_call: self.last_call(),
            next_call: self.next_call(),
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}({})", self.id, self.origin.as_deref().unwrap_or("orphan"))
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("schedule", &self.schedule)
            .finish()
    }
}

async fn drive(task: Weak<Task>) {
    let mut previous: Option<DateTime<Utc>> = None;
    loop {
        let next = {
            let Some(task) = task.upgrade() else { return };
            let now = Utc::now();
            let from = previous.filter(|p| *p > now).unwrap_or(now);
            match task.schedule.next_after(from) {
                Some(next) => next,
                None => {
                    debug!(task = %task, "no further occurrence");
                    return;
                }
            }
        };

        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;

        let Some(task) = task.upgrade() else { return };
        previous = Some(next);
        tokio::spawn(task.run());
    }
}

#[derive(Default)]
struct PoolInner {
    counter: TaskId,
    tasks: Vec<Arc<Task>>,
}

/// Every task created by the application, for introspection and shutdown
#[derive(Clone, Default)]
pub struct TaskPool {
    inner: Arc<Mutex<PoolInner>>,
}

impl TaskPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a task, starting it if `auto_start` is set
    pub fn create(&self, options: TaskOptions) -> Arc<Task> {
        let task = {
            let mut inner = self.inner();
            let task = Arc::new(Task {
                id: inner.counter,
                origin: options.origin,
                schedule: options.schedule,
                action: options.action,
                state: Mutex::new(TaskState::default()),
            });
            inner.counter += 1;
            inner.tasks.push(Arc::clone(&task));
            task
        };

        debug!(task = %task, "task created");
        if options.auto_start {
            task.start();
        }
        task
    }

    pub fn tasks(&self) -> Vec<Arc<Task>> {
        self.inner().tasks.clone()
    }

    pub fn count(&self) -> usize {
        self.inner().tasks.len()
    }

    /// Tasks created by `origin`; `None` or "orphan" selects tasks without origin
    pub fn from_origin(&self, origin: Option<&str>) -> Vec<Arc<Task>> {
        let wanted = origin.filter(|o| !o.eq_ignore_ascii_case("orphan"));
        self.inner()
            .tasks
            .iter()
            .filter(|task| task.origin() == wanted)
            .cloned()
            .collect()
    }

    pub fn running(&self) -> Vec<Arc<Task>> {
        self.tasks().into_iter().filter(|t| t.running()).collect()
    }

    pub fn stopped(&self) -> Vec<Arc<Task>> {
        self.tasks().into_iter().filter(|t| !t.running()).collect()
    }

    pub fn stop_all(&self) {
        for task in self.tasks() {
            task.stop();
        }
    }
}
