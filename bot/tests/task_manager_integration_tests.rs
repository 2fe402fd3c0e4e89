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


//! Task manager integration tests

use async_trait::async_trait;
use rokore_bot::config::TaskSettings;
use rokore_bot::events::{BotEvent, EventBus};
use rokore_bot::priority::Priority;
use rokore_bot::tasks::{
    DelayTask, Task, TaskBody, TaskContext, TaskControl, TaskError, TaskManager, TaskResult,
    TaskStatus,
};
use serde_json::Value;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Tracks how many bodies run at the same time
struct Gauge {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

#[async_trait]
impl TaskBody for Gauge {
    async fn execute(&self, _context: &TaskContext, control: &TaskControl) -> TaskResult {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let slept = control.sleep(Duration::from_millis(100)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        match slept {
            Ok(()) => TaskResult::success("measured"),
            Err(_) => TaskResult::cancelled(),
        }
    }
}

/// Finishes at once
struct Quick;

#[async_trait]
impl TaskBody for Quick {
    async fn execute(&self, _context: &TaskContext, _control: &TaskControl) -> TaskResult {
        TaskResult::success("done")
    }
}

/// Fails every attempt
struct Failing {
    attempts: Arc<AtomicU32>,
}

#[async_trait]
impl TaskBody for Failing {
    async fn execute(&self, _context: &TaskContext, _control: &TaskControl) -> TaskResult {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        TaskResult::failure(format!("attempt {attempt} failed"))
    }
}

/// Refuses to run
struct Unready;

#[async_trait]
impl TaskBody for Unready {
    async fn execute(&self, _context: &TaskContext, _control: &TaskControl) -> TaskResult {
        TaskResult::success("unreachable")
    }

    fn can_execute(&self, _context: &TaskContext) -> bool {
        false
    }
}

/// Bumps a shared counter in the task context
struct Visit;

#[async_trait]
impl TaskBody for Visit {
    async fn execute(&self, context: &TaskContext, _control: &TaskControl) -> TaskResult {
        let visits = context.get("visits").and_then(|v| v.as_u64()).unwrap_or(0) + 1;
        context.set("visits", visits);
        TaskResult::success("visited").with_data("visits", visits)
    }
}

fn settings(max_concurrent_tasks: usize) -> TaskSettings {
    TaskSettings {
        max_concurrent_tasks,
        cycle_interval_ms: 10,
        ..TaskSettings::default()
    }
}

/// Run scheduling cycles until `done` holds
async fn drive(manager: &TaskManager, done: impl Fn(&TaskManager) -> bool) {
    for _ in 0..1000 {
        manager.run_cycle();
        if done(manager) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("scheduler did not settle: {:?}", manager.status());
}

#[tokio::test(start_paused = true)]
async fn test_dependency_gates_start() {
    let manager = TaskManager::new(&settings(5));
    let first = Task::new("first", DelayTask::new(Duration::from_millis(100)));
    let second = Task::new("second", Quick);
    second.add_dependency(&first).unwrap();
    assert_eq!(first.dependents(), vec![second.id().clone()]);

    // Scheduling order does not matter
    manager.schedule_task(second.clone()).unwrap();
    manager.schedule_task(first.clone()).unwrap();

    let report = manager.run_cycle();
    assert_eq!(report.started, 1);
    assert!(manager.is_running(first.id()));
    assert_eq!(second.status(), TaskStatus::Pending);

    drive(&manager, |m| m.completed().len() == 2).await;
    let first_done = first.completed_at().unwrap();
    let second_started = second.started_at().unwrap();
    assert!(second_started >= first_done);
}

#[tokio::test(start_paused = true)]
async fn test_failed_dependency_keeps_dependent_pending() {
    let manager = TaskManager::new(&settings(5));
    let attempts = Arc::new(AtomicU32::new(0));
    let first = Task::new(
        "doomed",
        Failing {
            attempts: Arc::clone(&attempts),
        },
    )
    .with_max_retries(0);
    let second = Task::new("waiting", Quick);
    second.add_dependency(&first).unwrap();
    manager.schedule_task(first).unwrap();
    manager.schedule_task(second.clone()).unwrap();

    drive(&manager, |m| m.failed().len() == 1).await;
    for _ in 0..5 {
        manager.run_cycle();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(second.status(), TaskStatus::Pending);
    assert_eq!(manager.pending_count(), 1);

    assert!(manager.cancel_task(second.id()));
    assert_eq!(manager.pending_count(), 0);
}

#[test]
fn test_dependency_cycles_are_rejected() {
    let a = Task::new("a", Quick);
    let b = Task::new("b", Quick);
    let c = Task::new("c", Quick);
    b.add_dependency(&a).unwrap();
    c.add_dependency(&b).unwrap();

    assert!(matches!(
        a.add_dependency(&c),
        Err(TaskError::DependencyCycle { .. })
    ));
    assert!(matches!(
        a.add_dependency(&a),
        Err(TaskError::SelfDependency(_))
    ));
    assert!(a.dependencies().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_is_bounded() {
    let manager = TaskManager::new(&settings(2));
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    for index in 0..5 {
        let body = Gauge {
            current: Arc::clone(&current),
            peak: Arc::clone(&peak),
        };
        manager.schedule_task(Task::new(format!("gauge{index}"), body)).unwrap();
    }

    drive(&manager, |m| {
        assert!(m.running_count() <= 2);
        m.completed().len() == 5
    })
    .await;

    assert_eq!(peak.load(Ordering::SeqCst), 2);
    assert_eq!(current.load(Ordering::SeqCst), 0);
    assert_eq!(manager.statistics().completed, 5);
}

#[tokio::test(start_paused = true)]
async fn test_history_is_bounded() {
    let manager = TaskManager::new(&TaskSettings {
        max_history: 3,
        ..settings(5)
    });
    for index in 0..5 {
        manager.schedule_task(Task::new(format!("quick{index}"), Quick)).unwrap();
    }

    drive(&manager, |m| m.statistics().completed == 5).await;
    assert_eq!(manager.completed().len(), 3);
    assert_eq!(manager.status().completed_history, 3);
}

#[tokio::test(start_paused = true)]
async fn test_retries_then_gives_up() {
    let manager = TaskManager::new(&settings(5));
    let attempts = Arc::new(AtomicU32::new(0));
    let task = Task::new(
        "flaky",
        Failing {
            attempts: Arc::clone(&attempts),
        },
    )
    .with_max_retries(2)
    .with_retry_delay(Duration::from_millis(100));
    let id = manager.schedule_task(task).unwrap();

    drive(&manager, |m| m.failed().len() == 1).await;

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    let failed = manager.task(&id).unwrap();
    assert_eq!(failed.status(), TaskStatus::Failed);
    assert_eq!(failed.retry_count(), 2);
    assert_eq!(
        failed.result().and_then(|r| r.error),
        Some("attempt 3 failed".to_string())
    );

    let stats = manager.statistics();
    assert_eq!(stats.failed, 3);
    assert_eq!(stats.retried, 2);
    assert_eq!(stats.success_rate, 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_retry_callback_does_not_stop_retries() {
    let manager = TaskManager::new(&settings(5));
    let attempts = Arc::new(AtomicU32::new(0));
    let retries = Arc::new(AtomicU32::new(0));
    let failures = Arc::new(AtomicU32::new(0));
    let retry_count = Arc::clone(&retries);
    let failure_count = Arc::clone(&failures);
    let task = Task::new(
        "flaky",
        Failing {
            attempts: Arc::clone(&attempts),
        },
    )
    .with_max_retries(2)
    .with_retry_delay(Duration::from_millis(50))
    .on_failure(move |_| {
        failure_count.fetch_add(1, Ordering::SeqCst);
    })
    .on_retry(move |_| {
        retry_count.fetch_add(1, Ordering::SeqCst);
        panic!("retry observer broke");
    });
    manager.schedule_task(task).unwrap();

    drive(&manager, |m| m.failed().len() == 1).await;

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(retries.load(Ordering::SeqCst), 2);
    assert_eq!(failures.load(Ordering::SeqCst), 3);
    assert_eq!(manager.statistics().retried, 2);

    // The scheduler keeps working afterwards
    manager.schedule_task(Task::new("after", Quick)).unwrap();
    drive(&manager, |m| m.completed().len() == 1).await;
}

#[tokio::test(start_paused = true)]
async fn test_complete_callback_fires_once_per_task() {
    let manager = TaskManager::new(&settings(2));
    let completions = Arc::new(Mutex::new(Vec::new()));
    for _ in 0..3 {
        let sink = Arc::clone(&completions);
        let task = Task::new("quick", Quick)
            .with_parameter("origin", "test")
            .on_complete(move |task| sink.lock().unwrap().push(task.id().clone()));
        manager.schedule_task(task).unwrap();
    }

    drive(&manager, |m| m.completed().len() == 3).await;
    for _ in 0..5 {
        manager.run_cycle();
    }

    let mut seen = completions.lock().unwrap().clone();
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 3);
    assert_eq!(completions.lock().unwrap().len(), 3);
    assert!(
        manager
            .completed()
            .iter()
            .all(|t| t.parameter("origin") == Some(Value::from("test")))
    );
}

#[tokio::test(start_paused = true)]
async fn test_skipped_task_is_counted_but_not_kept() {
    let manager = TaskManager::new(&settings(5));
    let task = Task::new("unready", Unready);
    let id = manager.schedule_task(task.clone()).unwrap();

    drive(&manager, |m| m.statistics().skipped == 1).await;
    assert_eq!(task.status(), TaskStatus::Skipped);
    assert!(task.started_at().is_none());
    assert!(manager.completed().is_empty());
    assert!(manager.failed().is_empty());
    assert!(manager.task(&id).is_none());

    let stats = manager.statistics();
    assert_eq!(stats.completed, 0);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.success_rate, 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_tasks_share_context() {
    let context = Arc::new(TaskContext::new());
    let manager = TaskManager::with_context(&settings(1), Arc::clone(&context), None);
    for _ in 0..3 {
        manager.schedule_task(Task::new("visit", Visit)).unwrap();
    }

    drive(&manager, |m| m.completed().len() == 3).await;
    assert_eq!(context.get("visits"), Some(Value::from(3)));
    assert_eq!(manager.find_tasks("visit").len(), 3);
}

#[tokio::test]
async fn test_round_trip_in_real_time() {
    let manager = TaskManager::new(&settings(5));
    let task = Task::new("round_trip", DelayTask::new(Duration::from_millis(20)))
        .with_priority(Priority::High)
        .with_timeout(Duration::from_secs(5));
    let id = manager.schedule_task(task).unwrap();

    drive(&manager, |m| !m.completed().is_empty()).await;

    let done = manager.task(&id).unwrap();
    assert_eq!(done.status(), TaskStatus::Completed);
    assert_eq!(done.priority(), Priority::High);
    assert_eq!(done.timeout(), Duration::from_secs(5));
    assert!(done.result().is_some_and(|r| r.is_success()));
    assert!(done.completed_at().unwrap() > done.started_at().unwrap());

    let completed = manager.completed();
    assert_eq!(completed.iter().filter(|t| t.id() == &id).count(), 1);
    assert_eq!(manager.statistics().tasks_by_priority[&Priority::High], 1);
    assert_eq!(manager.statistics().success_rate, 100.0);
}

#[tokio::test(start_paused = true)]
async fn test_loop_publishes_lifecycle_events() {
    let events = EventBus::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    events.subscribe(move |event: &BotEvent| {
        sink.lock().unwrap().push(event.name().to_string());
    });

    let manager = TaskManager::with_context(
        &settings(2),
        Arc::new(TaskContext::new()),
        Some(events.clone()),
    );
    assert!(manager.start());
    assert!(!manager.start());
    manager
        .schedule_task(Task::new("nap", DelayTask::new(Duration::from_millis(30))))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(manager.statistics().completed, 1);

    let long = manager
        .schedule_task(Task::new("long", DelayTask::new(Duration::from_secs(60))))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(manager.is_running(&long));

    assert_eq!(manager.stop(), Ok(1));
    assert_eq!(manager.stop(), Err(TaskError::NotRunning));
    events.process_events();

    let seen = seen.lock().unwrap();
    for name in [
        "task_manager_started",
        "task_scheduled",
        "task_started",
        "task_finished",
        "task_manager_stopped",
    ] {
        assert!(seen.iter().any(|n| n == name), "missing {name}");
    }
}
