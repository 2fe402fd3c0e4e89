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

//! Concurrent task scheduler
//!
//! Tasks wait in a priority ordered pending list until their dependencies
//! have completed, then run as independent tokio tasks. At most
//! `max_concurrent_tasks` run at once. Each scheduling cycle sweeps finished
//! tasks into history, re-arms retry-eligible failures after their retry
//! delay and starts as many ready tasks as there are free slots.

use super::context::TaskContext;
use super::task::{Task, TaskError, TaskId, TaskInfo, TaskStatus};
use crate::config::TaskSettings;
use crate::events::{BotEvent, EventBus};
use crate::priority::{Priority, insertion_index};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Counters kept across the lifetime of a [`TaskManager`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskStatistics {
    pub total_scheduled: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub timeout: u64,
    pub skipped: u64,
    pub retried: u64,
    pub average_execution_time: Duration,
    pub tasks_by_priority: BTreeMap<Priority, u64>,
    /// Completed share of completed, failed and cancelled runs, in percent
    pub success_rate: f64,
}

impl TaskStatistics {
    fn record_completion(&mut self, execution_time: Duration) {
        self.completed += 1;
        let n = self.completed as u32;
        self.average_execution_time = (self.average_execution_time * (n - 1) + execution_time) / n;
    }

    fn compute_success_rate(&mut self) {
        let total = self.completed + self.failed + self.cancelled;
        self.success_rate = if total == 0 {
            0.0
        } else {
            self.completed as f64 / total as f64 * 100.0
        };
    }
}

/// Point in time view of the scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskManagerStatus {
    pub running: bool,
    pub pending_tasks: usize,
    pub running_tasks: usize,
    pub retrying_tasks: usize,
    pub completed_history: usize,
    pub failed_history: usize,
    pub max_concurrent_tasks: usize,
    pub statistics: TaskStatistics,
}

/// What one call to [`TaskManager::run_cycle`] did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub finished: usize,
    pub retries_promoted: usize,
    pub started: usize,
}

struct PendingRetry {
    ready_at: Instant,
    task: Task,
}

#[derive(Default)]
struct Scheduler {
    pending: Vec<Task>,
    running: HashMap<TaskId, Task>,
    retries: Vec<PendingRetry>,
    completed: VecDeque<Task>,
    failed: VecDeque<Task>,
    stats: TaskStatistics,
}

struct Inner {
    max_concurrent_tasks: usize,
    max_queue_size: usize,
    max_history: usize,
    cycle_interval: Duration,
    context: Arc<TaskContext>,
    events: Option<EventBus>,
    scheduler: Mutex<Scheduler>,
    loop_token: Mutex<Option<CancellationToken>>,
}

/// Clonable handle to a task scheduler
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<Inner>,
}

impl TaskManager {
    /// Create a manager with its own empty context and no event bus
    pub fn new(settings: &TaskSettings) -> Self {
        Self::with_context(settings, Arc::new(TaskContext::new()), None)
    }

    /// Create a manager sharing `context` with its tasks
    pub fn with_context(
        settings: &TaskSettings,
        context: Arc<TaskContext>,
        events: Option<EventBus>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                max_concurrent_tasks: settings.max_concurrent_tasks.max(1),
                max_queue_size: settings.max_queue_size,
                max_history: settings.max_history,
                cycle_interval: settings.cycle_interval(),
                context,
                events,
                scheduler: Mutex::new(Scheduler::default()),
                loop_token: Mutex::new(None),
            }),
        }
    }

    /// Context shared by every task this manager runs
    pub fn context(&self) -> Arc<TaskContext> {
        Arc::clone(&self.inner.context)
    }

    /// Queue a pending task
    ///
    /// Fails when the pending list is full or the task was already run.
    pub fn schedule_task(&self, task: Task) -> Result<TaskId, TaskError> {
        let status = task.status();
        if status != TaskStatus::Pending {
            return Err(TaskError::InvalidTransition {
                id: task.id().clone(),
                from: status,
                to: TaskStatus::Running,
            });
        }

        let mut scheduler = self.scheduler();
        if scheduler.pending.len() >= self.inner.max_queue_size {
            tracing::warn!("Task queue full, rejecting {}", task.name());
            return Err(TaskError::QueueFull(scheduler.pending.len()));
        }

        let id = task.id().clone();
        let priority = task.priority();
        scheduler.stats.total_scheduled += 1;
        *scheduler.stats.tasks_by_priority.entry(priority).or_default() += 1;
        let index = insertion_index(&scheduler.pending, priority, Task::priority);
        tracing::debug!("Scheduled task {} ({})", id, priority);
        self.publish(BotEvent::TaskScheduled {
            id: id.clone(),
            name: task.name().to_string(),
            priority,
        });
        scheduler.pending.insert(index, task);
        Ok(id)
    }

    /// Run one scheduling pass: sweep, promote due retries, dispatch
    ///
    /// Must be called from within a tokio runtime; started tasks are spawned
    /// onto it.
    pub fn run_cycle(&self) -> CycleReport {
        let now = Instant::now();
        let mut scheduler = self.scheduler();
        let finished = self.sweep_finished(&mut scheduler);
        let retries_promoted = self.promote_due_retries(&mut scheduler, now);
        let started = self.dispatch(&mut scheduler);
        metrics::gauge!("rokore.tasks.running").set(scheduler.running.len() as f64);
        metrics::gauge!("rokore.tasks.pending").set(scheduler.pending.len() as f64);
        CycleReport {
            finished,
            retries_promoted,
            started,
        }
    }

    fn sweep_finished(&self, scheduler: &mut Scheduler) -> usize {
        let finished: Vec<TaskId> = scheduler
            .running
            .iter()
            .filter(|(_, task)| task.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        for id in &finished {
            if let Some(task) = scheduler.running.remove(id) {
                self.record_finished(scheduler, task);
            }
        }
        finished.len()
    }

    fn record_finished(&self, scheduler: &mut Scheduler, task: Task) {
        let status = task.status();
        let execution_time = task.elapsed();
        match status {
            TaskStatus::Completed => scheduler.stats.record_completion(execution_time),
            TaskStatus::Failed => scheduler.stats.failed += 1,
            TaskStatus::Timeout => scheduler.stats.timeout += 1,
            TaskStatus::Cancelled => scheduler.stats.cancelled += 1,
            TaskStatus::Skipped => scheduler.stats.skipped += 1,
            TaskStatus::Pending | TaskStatus::Running | TaskStatus::Paused => {}
        }
        metrics::counter!("rokore.tasks.finished", "status" => status.as_str()).increment(1);
        metrics::histogram!("rokore.tasks.execution_time").record(execution_time.as_secs_f64());
        tracing::debug!("Task {} finished: {}", task.id(), status);
        self.publish(BotEvent::TaskFinished {
            id: task.id().clone(),
            name: task.name().to_string(),
            status,
        });

        if task.can_retry() {
            match task.prepare_retry() {
                Ok(()) => {
                    tracing::warn!(
                        "Retrying task {} ({}/{}) in {:?}",
                        task.id(),
                        task.retry_count(),
                        task.max_retries(),
                        task.retry_delay()
                    );
                    scheduler.stats.retried += 1;
                    scheduler.retries.push(PendingRetry {
                        ready_at: Instant::now() + task.retry_delay(),
                        task,
                    });
                    return;
                }
                Err(err) => tracing::warn!("Could not re-arm task {}: {}", task.id(), err),
            }
        }

        // Skipped and cancelled tasks are only counted
        let max_history = self.inner.max_history;
        match status {
            TaskStatus::Completed => push_bounded(&mut scheduler.completed, task, max_history),
            TaskStatus::Failed | TaskStatus::Timeout => {
                push_bounded(&mut scheduler.failed, task, max_history)
            }
            _ => {}
        }
    }

    /// Move retries whose delay elapsed back into pending
    ///
    /// A retry stays parked while the pending list is full.
    fn promote_due_retries(&self, scheduler: &mut Scheduler, now: Instant) -> usize {
        let mut promoted = 0;
        let mut index = 0;
        while index < scheduler.retries.len() {
            if scheduler.retries[index].ready_at > now
                || scheduler.pending.len() >= self.inner.max_queue_size
            {
                index += 1;
                continue;
            }
            let task = scheduler.retries.remove(index).task;
            let position = insertion_index(&scheduler.pending, task.priority(), Task::priority);
            scheduler.pending.insert(position, task);
            promoted += 1;
        }
        promoted
    }

    fn dispatch(&self, scheduler: &mut Scheduler) -> usize {
        let slots = self
            .inner
            .max_concurrent_tasks
            .saturating_sub(scheduler.running.len());
        let mut ready = Vec::new();
        let mut index = 0;
        while ready.len() < slots && index < scheduler.pending.len() {
            let task = &scheduler.pending[index];
            if task.is_finished() {
                // Cancelled through a task handle while still queued
                let task = scheduler.pending.remove(index);
                self.record_finished(scheduler, task);
            } else if task.has_dependencies_completed() {
                ready.push(scheduler.pending.remove(index));
            } else {
                index += 1;
            }
        }

        let started = ready.len();
        for task in ready {
            self.launch(scheduler, task);
        }
        started
    }

    fn launch(&self, scheduler: &mut Scheduler, task: Task) {
        let runner = task.clone();
        let context = self.context();
        tokio::spawn(async move {
            runner.run(context).await;
        });

        tracing::info!("Starting task {}", task.name());
        metrics::counter!("rokore.tasks.started").increment(1);
        self.publish(BotEvent::TaskStarted {
            id: task.id().clone(),
            name: task.name().to_string(),
        });
        scheduler.running.insert(task.id().clone(), task);
    }

    /// Cancel a pending, running or retrying task
    ///
    /// A running task is signalled and forgotten at once; its body unwinds at
    /// its next checkpoint. Returns false for unknown or finished tasks.
    pub fn cancel_task(&self, id: &TaskId) -> bool {
        let mut scheduler = self.scheduler();
        let task = if let Some(index) = scheduler.pending.iter().position(|t| t.id() == id) {
            scheduler.pending.remove(index)
        } else if let Some(task) = scheduler.running.remove(id) {
            task
        } else if let Some(index) = scheduler.retries.iter().position(|r| r.task.id() == id) {
            scheduler.retries.remove(index).task
        } else {
            return false;
        };

        match task.cancel() {
            Ok(()) => {
                tracing::info!("Cancelled task {}", task.name());
                self.record_finished(&mut scheduler, task);
                true
            }
            Err(_) => {
                self.record_finished(&mut scheduler, task);
                false
            }
        }
    }

    /// Cancel every known unfinished task, returning how many were cancelled
    pub fn cancel_all_tasks(&self) -> usize {
        let mut scheduler = self.scheduler();
        let mut tasks: Vec<Task> = scheduler.pending.drain(..).collect();
        tasks.extend(scheduler.running.drain().map(|(_, task)| task));
        tasks.extend(scheduler.retries.drain(..).map(|r| r.task));

        let mut cancelled = 0;
        for task in tasks {
            if task.cancel().is_ok() {
                cancelled += 1;
            }
            self.record_finished(&mut scheduler, task);
        }
        if cancelled > 0 {
            tracing::info!("Cancelled {} tasks", cancelled);
        }
        cancelled
    }

    /// Pause a running task at its next checkpoint
    pub fn pause_task(&self, id: &TaskId) -> bool {
        self.scheduler()
            .running
            .get(id)
            .is_some_and(|task| task.pause().is_ok())
    }

    pub fn resume_task(&self, id: &TaskId) -> bool {
        self.scheduler()
            .running
            .get(id)
            .is_some_and(|task| task.resume().is_ok())
    }

    /// Find a task anywhere in the scheduler, history included
    pub fn task(&self, id: &TaskId) -> Option<Task> {
        let scheduler = self.scheduler();
        scheduler
            .running
            .get(id)
            .or_else(|| Self::all_queued(&scheduler).find(|t| t.id() == id))
            .cloned()
    }

    /// All known tasks with the given name
    pub fn find_tasks(&self, name: &str) -> Vec<Task> {
        let scheduler = self.scheduler();
        scheduler
            .running
            .values()
            .chain(Self::all_queued(&scheduler))
            .filter(|t| t.name() == name)
            .cloned()
            .collect()
    }

    fn all_queued(scheduler: &Scheduler) -> impl Iterator<Item = &Task> {
        scheduler
            .pending
            .iter()
            .chain(scheduler.retries.iter().map(|r| &r.task))
            .chain(&scheduler.completed)
            .chain(&scheduler.failed)
    }

    pub fn pending_count(&self) -> usize {
        self.scheduler().pending.len()
    }

    pub fn running_count(&self) -> usize {
        self.scheduler().running.len()
    }

    pub fn is_running(&self, id: &TaskId) -> bool {
        self.scheduler().running.contains_key(id)
    }

    pub fn completed(&self) -> Vec<Task> {
        self.scheduler().completed.iter().cloned().collect()
    }

    pub fn failed(&self) -> Vec<Task> {
        self.scheduler().failed.iter().cloned().collect()
    }

    pub fn statistics(&self) -> TaskStatistics {
        let mut stats = self.scheduler().stats.clone();
        stats.compute_success_rate();
        stats
    }

    pub fn status(&self) -> TaskManagerStatus {
        let running = self.is_started();
        let statistics = self.statistics();
        let scheduler = self.scheduler();
        TaskManagerStatus {
            running,
            pending_tasks: scheduler.pending.len(),
            running_tasks: scheduler.running.len(),
            retrying_tasks: scheduler.retries.len(),
            completed_history: scheduler.completed.len(),
            failed_history: scheduler.failed.len(),
            max_concurrent_tasks: self.inner.max_concurrent_tasks,
            statistics,
        }
    }

    /// Snapshots of running, pending and retrying tasks, in that order
    pub fn summary(&self) -> Vec<TaskInfo> {
        let scheduler = self.scheduler();
        scheduler
            .running
            .values()
            .chain(&scheduler.pending)
            .chain(scheduler.retries.iter().map(|r| &r.task))
            .map(Task::snapshot)
            .collect()
    }

    /// Check if the scheduling loop is running
    pub fn is_started(&self) -> bool {
        self.loop_token().is_some()
    }

    /// Spawn the scheduling loop; returns false when it already runs
    pub fn start(&self) -> bool {
        let mut slot = self.loop_token();
        if slot.is_some() {
            tracing::warn!("Task manager already started");
            return false;
        }
        let token = CancellationToken::new();
        *slot = Some(token.clone());
        drop(slot);

        let interval = self.inner.cycle_interval;
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = timer.tick() => {
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        let manager = TaskManager { inner };
                        manager.run_cycle();
                        if let Some(events) = &manager.inner.events {
                            events.process_events();
                        }
                    }
                }
            }
            tracing::debug!("Task manager loop exited");
        });

        tracing::info!("Task manager started (interval: {:?})", interval);
        self.publish(BotEvent::TaskManagerStarted);
        true
    }

    /// Stop the scheduling loop and cancel every unfinished task
    pub fn stop(&self) -> Result<usize, TaskError> {
        let token = self.loop_token().take().ok_or(TaskError::NotRunning)?;
        token.cancel();
        let cancelled = self.cancel_all_tasks();
        tracing::info!("Task manager stopped, {} tasks cancelled", cancelled);
        self.publish(BotEvent::TaskManagerStopped);
        Ok(cancelled)
    }

    fn publish(&self, event: BotEvent) {
        if let Some(events) = &self.inner.events {
            events.publish(event);
        }
    }

    fn scheduler(&self) -> MutexGuard<'_, Scheduler> {
        self.inner
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn loop_token(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.inner
            .loop_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheduler = self.scheduler();
        f.debug_struct("TaskManager")
            .field("pending", &scheduler.pending.len())
            .field("running", &scheduler.running.len())
            .field("max_concurrent_tasks", &self.inner.max_concurrent_tasks)
            .finish()
    }
}

fn push_bounded(history: &mut VecDeque<Task>, task: Task, max: usize) {
    history.push_back(task);
    while history.len() > max {
        history.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{DelayTask, TaskBody, TaskControl, TaskResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Succeed;

    #[async_trait]
    impl TaskBody for Succeed {
        async fn execute(&self, _context: &TaskContext, _control: &TaskControl) -> TaskResult {
            TaskResult::success("ok")
        }
    }

    /// Fails until it has been attempted `succeed_on` times
    struct Flaky {
        attempts: AtomicU32,
        succeed_on: u32,
    }

    #[async_trait]
    impl TaskBody for Flaky {
        async fn execute(&self, _context: &TaskContext, _control: &TaskControl) -> TaskResult {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt >= self.succeed_on {
                TaskResult::success("finally")
            } else {
                TaskResult::failure(format!("attempt {attempt} failed"))
            }
        }
    }

    fn settings(max_concurrent_tasks: usize) -> TaskSettings {
        TaskSettings {
            max_concurrent_tasks,
            max_queue_size: 10,
            max_history: 3,
            cycle_interval_ms: 100,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test]
    async fn test_queue_full() {
        let manager = TaskManager::new(&TaskSettings {
            max_queue_size: 2,
            ..settings(1)
        });
        manager.schedule_task(Task::new("a", Succeed)).unwrap();
        manager.schedule_task(Task::new("b", Succeed)).unwrap();
        assert_eq!(
            manager.schedule_task(Task::new("c", Succeed)),
            Err(TaskError::QueueFull(2))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_selection() {
        let manager = TaskManager::new(&settings(1));
        let low = manager
            .schedule_task(Task::new("low", Succeed).with_priority(Priority::Low))
            .unwrap();
        let high = manager
            .schedule_task(Task::new("high", Succeed).with_priority(Priority::High))
            .unwrap();

        manager.run_cycle();
        assert!(manager.is_running(&high));
        assert!(!manager.is_running(&low));

        settle().await;
        let report = manager.run_cycle();
        assert_eq!(report.finished, 1);
        assert!(manager.is_running(&low));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_delay() {
        let manager = TaskManager::new(&settings(2));
        let body = Flaky {
            attempts: AtomicU32::new(0),
            succeed_on: 2,
        };
        let id = manager
            .schedule_task(Task::new("flaky", body).with_retry_delay(Duration::from_millis(500)))
            .unwrap();

        manager.run_cycle();
        settle().await;
        manager.run_cycle();
        let task = manager.task(&id).unwrap();
        assert_eq!(task.status(), TaskStatus::Pending);
        assert_eq!(task.retry_count(), 1);
        assert_eq!(manager.status().retrying_tasks, 1);

        // Not due yet
        assert_eq!(manager.run_cycle().retries_promoted, 0);

        tokio::time::advance(Duration::from_millis(500)).await;
        let report = manager.run_cycle();
        assert_eq!(report.retries_promoted, 1);
        assert_eq!(report.started, 1);
        settle().await;
        manager.run_cycle();

        assert_eq!(task.status(), TaskStatus::Completed);
        let stats = manager.statistics();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.retried, 1);
        assert_eq!(stats.success_rate, 50.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_running_and_pending() {
        let manager = TaskManager::new(&settings(1));
        let running = manager
            .schedule_task(Task::new("wait", DelayTask::new(Duration::from_secs(10))))
            .unwrap();
        let queued = manager.schedule_task(Task::new("next", Succeed)).unwrap();
        manager.run_cycle();
        settle().await;

        assert!(manager.cancel_task(&running));
        assert!(!manager.is_running(&running));
        assert!(manager.cancel_task(&queued));
        assert!(!manager.cancel_task(&queued));

        let stats = manager.statistics();
        assert_eq!(stats.cancelled, 2);
        assert_eq!(stats.success_rate, 0.0);
        assert_eq!(manager.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_resume_task() {
        let manager = TaskManager::new(&settings(1));
        let id = manager
            .schedule_task(
                Task::new("wait", DelayTask::new(Duration::from_millis(200)))
                    .with_timeout(Duration::ZERO),
            )
            .unwrap();
        manager.run_cycle();
        settle().await;

        assert!(manager.pause_task(&id));
        tokio::time::sleep(Duration::from_secs(2)).await;
        manager.run_cycle();
        assert!(manager.is_running(&id));

        assert!(manager.resume_task(&id));
        tokio::time::sleep(Duration::from_millis(300)).await;
        manager.run_cycle();
        assert!(!manager.is_running(&id));
        assert_eq!(manager.completed().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_runs_tasks() {
        let events = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        events.subscribe(move |event| sink.lock().unwrap().push(event.name().to_string()));

        let manager =
            TaskManager::with_context(&settings(2), Arc::new(TaskContext::new()), Some(events));
        assert!(manager.start());
        assert!(!manager.start());
        let id = manager.schedule_task(Task::new("quick", Succeed)).unwrap();

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(manager.task(&id).map(|t| t.status()), Some(TaskStatus::Completed));
        assert_eq!(manager.stop(), Ok(0));
        assert_eq!(manager.stop(), Err(TaskError::NotRunning));

        let seen = seen.lock().unwrap();
        assert!(seen.contains(&"task_started".to_string()));
        assert!(seen.contains(&"task_finished".to_string()));
    }
}
