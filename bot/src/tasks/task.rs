//
// Copyright 2025-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Task model: lifecycle, results, pause gate and dependency edges

use super::context::TaskContext;
use crate::priority::Priority;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Default wall time a task may run before it times out
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(30);
/// Default number of retries after the first attempt
pub const DEFAULT_TASK_MAX_RETRIES: u32 = 3;
/// Default delay before a failed task is scheduled again
pub const DEFAULT_TASK_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Held while dependency edges change so two edges cannot close a cycle
/// between them
static DEPENDENCY_GRAPH: Mutex<()> = Mutex::new(());

/// Lifecycle observer; panics are logged and never affect the task
pub type TaskCallback = Arc<dyn Fn(&Task) + Send + Sync>;
/// Observer of the progress a running body reports
pub type ProgressCallback = Arc<dyn Fn(&Task, f64) + Send + Sync>;

type ProgressHook = Arc<dyn Fn(f64) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("Task {id} cannot go from {from} to {to}")]
    InvalidTransition {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },
    #[error("Task {0} cannot depend on itself")]
    SelfDependency(TaskId),
    #[error("Adding dependency {dependency} to {task} would create a cycle")]
    DependencyCycle { task: TaskId, dependency: TaskId },
    #[error("Task queue is full ({0} pending)")]
    QueueFull(usize),
    #[error("Unknown task {0}")]
    NotFound(TaskId),
    #[error("Task manager is not running")]
    NotRunning,
}

/// Unique task identifier of the form `<name>_<8 hex digits>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(String);

impl TaskId {
    pub fn generate(name: &str) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{}_{}", name, &suffix[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
    Timeout,
    Skipped,
}

impl TaskStatus {
    /// Returns true if the transition from self to `next` is valid.
    ///
    /// Finished tasks may only go back to `Pending`, which is how a retry or
    /// an explicit reset re-arms them.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match self {
            Pending => matches!(next, Running | Cancelled | Skipped),
            Running => matches!(
                next,
                Paused | Completed | Failed | Cancelled | Timeout | Skipped
            ),
            Paused => matches!(next, Running | Completed | Failed | Cancelled | Timeout),
            Completed | Failed | Cancelled | Timeout | Skipped => next == Pending,
        }
    }

    pub fn is_finished(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed
                | TaskStatus::Failed
                | TaskStatus::Cancelled
                | TaskStatus::Timeout
                | TaskStatus::Skipped
        )
    }

    pub fn is_active(self) -> bool {
        matches!(self, TaskStatus::Running | TaskStatus::Paused)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Timeout => "timeout",
            TaskStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one task execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub status: TaskStatus,
    pub message: String,
    pub data: BTreeMap<String, Value>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TaskResult {
    pub fn new(status: TaskStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            data: BTreeMap::new(),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(TaskStatus::Completed, message)
    }

    pub fn failure(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            error: Some(error.clone()),
            ..Self::new(TaskStatus::Failed, error)
        }
    }

    pub fn cancelled() -> Self {
        Self::new(TaskStatus::Cancelled, "Task cancelled")
    }

    pub fn timeout(after: Duration) -> Self {
        let message = format!("Task timed out after {after:?}");
        Self {
            error: Some(message.clone()),
            ..Self::new(TaskStatus::Timeout, message)
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::new(TaskStatus::Skipped, reason)
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.status, TaskStatus::Failed | TaskStatus::Timeout)
    }
}

/// Returned by [`TaskControl`] checkpoints once the task was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("task cancelled")]
pub struct Cancelled;

/// Cooperative pause and cancel signals handed to a running task body
///
/// Bodies observe both only at their own yield points: each call to
/// [`TaskControl::checkpoint`] or [`TaskControl::sleep`]. A body that never
/// calls either can still be cancelled, but it only notices once it returns.
#[derive(Clone)]
pub struct TaskControl {
    cancel: CancellationToken,
    paused: Arc<watch::Sender<bool>>,
    progress: Option<ProgressHook>,
}

impl TaskControl {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            cancel: CancellationToken::new(),
            paused: Arc::new(paused),
            progress: None,
        }
    }

    fn with_progress_hook(mut self, hook: ProgressHook) -> Self {
        self.progress = Some(hook);
        self
    }

    /// Report how far the body got, between 0 and 1
    pub fn report_progress(&self, fraction: f64) {
        if let Some(hook) = &self.progress {
            hook(fraction.clamp(0.0, 1.0));
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Wait while paused; fails once the task is cancelled
    pub async fn checkpoint(&self) -> Result<(), Cancelled> {
        let mut paused = self.paused.subscribe();
        loop {
            if self.cancel.is_cancelled() {
                return Err(Cancelled);
            }
            if !*paused.borrow_and_update() {
                return Ok(());
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(Cancelled),
                changed = paused.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Sleep for `duration` unless cancelled first, then pass a checkpoint
    pub async fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        tokio::select! {
            _ = self.cancel.cancelled() => return Err(Cancelled),
            _ = tokio::time::sleep(duration) => {}
        }
        self.checkpoint().await
    }

    pub(crate) fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub(crate) fn resume(&self) {
        self.paused.send_replace(false);
    }

    /// Cancel and release the pause gate so a paused body can unwind
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
        self.paused.send_replace(false);
    }
}

impl Default for TaskControl {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskControl")
            .field("cancelled", &self.is_cancelled())
            .field("paused", &self.is_paused())
            .finish()
    }
}

/// The work a task performs
///
/// One body instance is shared by every attempt of its task, so retries call
/// `execute` again on the same value.
#[async_trait]
pub trait TaskBody: Send + Sync {
    async fn execute(&self, context: &TaskContext, control: &TaskControl) -> TaskResult;

    /// Precondition; a task whose body refuses to run is skipped, not failed
    fn can_execute(&self, _context: &TaskContext) -> bool {
        true
    }

    fn estimated_duration(&self) -> Duration {
        Duration::from_secs(5)
    }

    fn description(&self) -> String {
        String::new()
    }
}

/// Serializable view of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub name: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: Priority,
    pub progress: f64,
    pub retry_count: u32,
    pub max_retries: u32,
    pub timeout: Duration,
    pub elapsed: Duration,
    pub dependencies: Vec<TaskId>,
    pub dependents: Vec<TaskId>,
    pub parameters: BTreeMap<String, Value>,
    pub message: Option<String>,
    pub error: Option<String>,
}

struct TaskState {
    status: TaskStatus,
    retry_count: u32,
    started_at: Option<Instant>,
    completed_at: Option<Instant>,
    result: Option<TaskResult>,
    reported_progress: Option<f64>,
    control: TaskControl,
    dependencies: Vec<Task>,
    dependents: Vec<Weak<TaskShared>>,
}

struct TaskShared {
    id: TaskId,
    name: String,
    created_at: Instant,
    parameters: RwLock<BTreeMap<String, Value>>,
    state: Mutex<TaskState>,
}

#[derive(Clone, Default)]
struct TaskCallbacks {
    on_start: Option<TaskCallback>,
    on_progress: Option<ProgressCallback>,
    on_complete: Option<TaskCallback>,
    on_failure: Option<TaskCallback>,
    on_retry: Option<TaskCallback>,
}

/// A schedulable unit of asynchronous work
///
/// Cloning a task yields another handle to the same task: lifecycle state,
/// result and dependency edges are shared. Settings made through the `with_*`
/// builders belong to the handle and should be applied before the task is
/// scheduled.
#[derive(Clone)]
pub struct Task {
    shared: Arc<TaskShared>,
    body: Arc<dyn TaskBody>,
    priority: Priority,
    timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
    auto_retry: bool,
    callbacks: TaskCallbacks,
}

impl Task {
    pub fn new(name: impl Into<String>, body: impl TaskBody + 'static) -> Self {
        Self::from_arc(name, Arc::new(body))
    }

    pub fn from_arc(name: impl Into<String>, body: Arc<dyn TaskBody>) -> Self {
        let name = name.into();
        Self {
            shared: Arc::new(TaskShared {
                id: TaskId::generate(&name),
                name,
                created_at: Instant::now(),
                parameters: RwLock::new(BTreeMap::new()),
                state: Mutex::new(TaskState {
                    status: TaskStatus::Pending,
                    retry_count: 0,
                    started_at: None,
                    completed_at: None,
                    result: None,
                    reported_progress: None,
                    control: TaskControl::new(),
                    dependencies: Vec::new(),
                    dependents: Vec::new(),
                }),
            }),
            body,
            priority: Priority::Normal,
            timeout: DEFAULT_TASK_TIMEOUT,
            max_retries: DEFAULT_TASK_MAX_RETRIES,
            retry_delay: DEFAULT_TASK_RETRY_DELAY,
            auto_retry: true,
            callbacks: TaskCallbacks::default(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the execution timeout; zero disables it
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_auto_retry(mut self, auto_retry: bool) -> Self {
        self.auto_retry = auto_retry;
        self
    }

    pub fn with_parameter(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_parameter(key, value);
        self
    }

    /// Called when an attempt starts running
    pub fn on_start<F: Fn(&Task) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.callbacks.on_start = Some(Arc::new(f));
        self
    }

    /// Called with each fraction the body reports through its control
    pub fn on_progress<F: Fn(&Task, f64) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.callbacks.on_progress = Some(Arc::new(f));
        self
    }

    pub fn on_complete<F: Fn(&Task) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.callbacks.on_complete = Some(Arc::new(f));
        self
    }

    /// Called when an attempt fails or times out, retried or not
    pub fn on_failure<F: Fn(&Task) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.callbacks.on_failure = Some(Arc::new(f));
        self
    }

    /// Called once a failed task has been re-armed for another attempt
    pub fn on_retry<F: Fn(&Task) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.callbacks.on_retry = Some(Arc::new(f));
        self
    }

    pub fn parameter(&self, key: &str) -> Option<Value> {
        self.parameters_read().get(key).cloned()
    }

    pub fn set_parameter(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.parameters_write().insert(key.into(), value.into());
    }

    pub fn update_parameters<I, K, V>(&self, parameters: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut current = self.parameters_write();
        for (key, value) in parameters {
            current.insert(key.into(), value.into());
        }
    }

    pub fn parameters(&self) -> BTreeMap<String, Value> {
        self.parameters_read().clone()
    }

    pub fn id(&self) -> &TaskId {
        &self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn description(&self) -> String {
        let description = self.body.description();
        if description.is_empty() {
            format!("Task: {}", self.name())
        } else {
            description
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.state().status
    }

    pub fn retry_count(&self) -> u32 {
        self.state().retry_count
    }

    pub fn result(&self) -> Option<TaskResult> {
        self.state().result.clone()
    }

    pub fn created_at(&self) -> Instant {
        self.shared.created_at
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.state().started_at
    }

    pub fn completed_at(&self) -> Option<Instant> {
        self.state().completed_at
    }

    /// Time spent executing, up to now while still running
    pub fn elapsed(&self) -> Duration {
        let state = self.state();
        match state.started_at {
            Some(started) => state
                .completed_at
                .unwrap_or_else(Instant::now)
                .duration_since(started),
            None => Duration::ZERO,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status().is_finished()
    }

    pub fn is_active(&self) -> bool {
        self.status().is_active()
    }

    pub fn can_retry(&self) -> bool {
        let state = self.state();
        self.auto_retry
            && state.retry_count < self.max_retries
            && matches!(state.status, TaskStatus::Failed | TaskStatus::Timeout)
    }

    /// Estimated completion between 0 and 1
    ///
    /// Running tasks use the last fraction their body reported, or elapsed
    /// time against the body's estimate, and never reach 1.0 before they
    /// actually finish.
    pub fn progress(&self) -> f64 {
        let (status, reported) = {
            let state = self.state();
            (state.status, state.reported_progress)
        };
        if status.is_finished() {
            return 1.0;
        }
        if status == TaskStatus::Pending {
            return 0.0;
        }
        if let Some(reported) = reported {
            return reported.min(0.99);
        }
        let estimated = self.body.estimated_duration();
        if estimated.is_zero() {
            return 0.5;
        }
        (self.elapsed().as_secs_f64() / estimated.as_secs_f64()).min(0.99)
    }

    /// Make this task wait for `dependency` to complete
    ///
    /// Fails fast when the edge would close a cycle.
    pub fn add_dependency(&self, dependency: &Task) -> Result<(), TaskError> {
        if dependency.id() == self.id() {
            return Err(TaskError::SelfDependency(self.id().clone()));
        }
        let _graph = DEPENDENCY_GRAPH
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if dependency.depends_on(self.id()) {
            return Err(TaskError::DependencyCycle {
                task: self.id().clone(),
                dependency: dependency.id().clone(),
            });
        }

        {
            let mut state = self.state();
            if state.dependencies.iter().any(|d| d.id() == dependency.id()) {
                return Ok(());
            }
            state.dependencies.push(dependency.clone());
        }
        dependency
            .state()
            .dependents
            .push(Arc::downgrade(&self.shared));
        Ok(())
    }

    /// Drop the edge to a dependency; returns false when there was none
    pub fn remove_dependency(&self, id: &TaskId) -> bool {
        let _graph = DEPENDENCY_GRAPH
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let removed = {
            let mut state = self.state();
            let index = state.dependencies.iter().position(|d| d.id() == id);
            index.map(|i| state.dependencies.remove(i))
        };
        let Some(dependency) = removed else {
            return false;
        };
        dependency
            .state()
            .dependents
            .retain(|w| w.upgrade().is_some_and(|s| s.id != *self.id()));
        true
    }

    pub fn dependencies(&self) -> Vec<TaskId> {
        self.state()
            .dependencies
            .iter()
            .map(|d| d.id().clone())
            .collect()
    }

    pub fn dependents(&self) -> Vec<TaskId> {
        self.state()
            .dependents
            .iter()
            .filter_map(Weak::upgrade)
            .map(|s| s.id.clone())
            .collect()
    }

    pub fn has_dependencies_completed(&self) -> bool {
        let dependencies = self.state().dependencies.clone();
        dependencies
            .iter()
            .all(|d| d.status() == TaskStatus::Completed)
    }

    /// Check for a dependency path from this task to `id`
    fn depends_on(&self, id: &TaskId) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![self.clone()];
        while let Some(task) = stack.pop() {
            if task.id() == id {
                return true;
            }
            if visited.insert(task.id().clone()) {
                stack.extend(task.state().dependencies.clone());
            }
        }
        false
    }

    /// Run one attempt of the task to completion
    ///
    /// Never fails: body errors, panics, timeouts and cancellation all end up
    /// as the returned result, which is also stored on the task.
    pub async fn run(&self, context: Arc<TaskContext>) -> TaskResult {
        let control = {
            let state = self.state();
            if state.status != TaskStatus::Pending {
                return state.result.clone().unwrap_or_else(|| {
                    TaskResult::failure(format!("Task is already {}", state.status))
                });
            }
            state.control.clone()
        };

        if !self.body.can_execute(&context) {
            tracing::debug!("Task {} skipped, preconditions not met", self.id());
            return self.finish(TaskResult::skipped("Preconditions not met"));
        }

        {
            let mut state = self.state();
            if state.status != TaskStatus::Pending {
                return state.result.clone().unwrap_or_else(TaskResult::cancelled);
            }
            state.status = TaskStatus::Running;
            state.started_at = Some(Instant::now());
        }
        tracing::debug!("Task {} started", self.id());
        self.fire(&self.callbacks.on_start, "on_start");

        let reporter = self.clone();
        let control =
            control.with_progress_hook(Arc::new(move |fraction| reporter.record_progress(fraction)));

        let body = Arc::clone(&self.body);
        let execution = async {
            control.checkpoint().await?;
            Ok::<_, Cancelled>(body.execute(&context, &control).await)
        };
        let guarded = AssertUnwindSafe(execution).catch_unwind();
        let outcome = if self.timeout.is_zero() {
            Some(guarded.await)
        } else {
            tokio::time::timeout(self.timeout, guarded).await.ok()
        };

        let result = match outcome {
            None => TaskResult::timeout(self.timeout),
            Some(Ok(Ok(result))) if !control.is_cancelled() => result,
            Some(Ok(_)) => TaskResult::cancelled(),
            Some(Err(panic)) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::warn!("Task {} panicked: {}", self.id(), message);
                TaskResult::failure(format!("Task panicked: {message}"))
            }
        };
        self.finish(result)
    }

    fn finish(&self, mut result: TaskResult) -> TaskResult {
        {
            let mut state = self.state();
            if state.status.is_finished() {
                // Cancelled while the body was still running
                return state.result.clone().unwrap_or(result);
            }
            if !result.status.is_finished() {
                result = TaskResult::failure(format!(
                    "Task body returned non-final status {}",
                    result.status
                ));
            }
            state.status = result.status;
            state.completed_at = Some(Instant::now());
            state.result = Some(result.clone());
        }
        tracing::debug!("Task {} finished: {}", self.id(), result.status);
        if result.is_success() {
            self.fire(&self.callbacks.on_complete, "on_complete");
        } else if result.is_failure() {
            self.fire(&self.callbacks.on_failure, "on_failure");
        }
        result
    }

    fn record_progress(&self, fraction: f64) {
        {
            let mut state = self.state();
            if !state.status.is_active() {
                return;
            }
            state.reported_progress = Some(fraction);
        }
        if let Some(callback) = &self.callbacks.on_progress {
            if catch_unwind(AssertUnwindSafe(|| callback(self, fraction))).is_err() {
                tracing::warn!("Task {} callback on_progress panicked", self.id());
            }
        }
    }

    fn fire(&self, callback: &Option<TaskCallback>, which: &str) {
        if let Some(callback) = callback {
            if catch_unwind(AssertUnwindSafe(|| callback(self))).is_err() {
                tracing::warn!("Task {} callback {} panicked", self.id(), which);
            }
        }
    }

    /// Hold a running task at its next checkpoint
    pub fn pause(&self) -> Result<(), TaskError> {
        let mut state = self.state();
        self.transition(&mut state, TaskStatus::Paused)?;
        state.control.pause();
        Ok(())
    }

    pub fn resume(&self) -> Result<(), TaskError> {
        let mut state = self.state();
        if state.status != TaskStatus::Paused {
            return Err(self.invalid(state.status, TaskStatus::Running));
        }
        state.status = TaskStatus::Running;
        state.control.resume();
        Ok(())
    }

    /// Cancel a pending or active task
    ///
    /// A running body is only signalled; it stops at its next checkpoint.
    pub fn cancel(&self) -> Result<(), TaskError> {
        let mut state = self.state();
        self.transition(&mut state, TaskStatus::Cancelled)?;
        state.control.cancel();
        state.completed_at = Some(Instant::now());
        state.result = Some(TaskResult::cancelled());
        Ok(())
    }

    /// Re-arm a task for another run, keeping its retry count
    pub fn reset(&self) -> Result<(), TaskError> {
        let mut state = self.state();
        if state.status.is_active() {
            return Err(self.invalid(state.status, TaskStatus::Pending));
        }
        state.status = TaskStatus::Pending;
        state.started_at = None;
        state.completed_at = None;
        state.result = None;
        state.reported_progress = None;
        state.control = TaskControl::new();
        Ok(())
    }

    /// Count a retry and re-arm the task
    pub(crate) fn prepare_retry(&self) -> Result<(), TaskError> {
        self.reset()?;
        self.state().retry_count += 1;
        self.fire(&self.callbacks.on_retry, "on_retry");
        Ok(())
    }

    pub fn snapshot(&self) -> TaskInfo {
        let progress = self.progress();
        let elapsed = self.elapsed();
        let dependencies = self.dependencies();
        let dependents = self.dependents();
        let state = self.state();
        TaskInfo {
            id: self.id().clone(),
            name: self.name().to_string(),
            description: self.description(),
            status: state.status,
            priority: self.priority,
            progress,
            retry_count: state.retry_count,
            max_retries: self.max_retries,
            timeout: self.timeout,
            elapsed,
            dependencies,
            dependents,
            parameters: self.parameters(),
            message: state.result.as_ref().map(|r| r.message.clone()),
            error: state.result.as_ref().and_then(|r| r.error.clone()),
        }
    }

    fn transition(&self, state: &mut TaskState, next: TaskStatus) -> Result<(), TaskError> {
        if !state.status.can_transition_to(next) {
            return Err(self.invalid(state.status, next));
        }
        state.status = next;
        Ok(())
    }

    fn invalid(&self, from: TaskStatus, to: TaskStatus) -> TaskError {
        TaskError::InvalidTransition {
            id: self.id().clone(),
            from,
            to,
        }
    }

    fn parameters_read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Value>> {
        self.shared
            .parameters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn parameters_write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Value>> {
        self.shared
            .parameters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> MutexGuard<'_, TaskState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", self.id())
            .field("status", &self.status())
            .field("priority", &self.priority)
            .finish()
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}] {}", self.id(), self.priority, self.status())
    }
}
