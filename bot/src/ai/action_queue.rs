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

//! Priority action queue with single-flight execution
//!
//! At most one action runs at a time. The backlog is ordered by descending
//! priority with arrival order among equals. Failed actions that still have
//! attempts left wait out their retry delay in a separate list and are put
//! back into the backlog on a later tick, so a delay never stalls the queue.

use super::action::{Action, ActionCallback, ActionId, ActionInfo, ActionKind, ActionStatus};
use crate::effector::Effector;
use crate::events::{BotEvent, EventBus};
use crate::priority::insertion_index;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use tokio::time::Instant;

/// Default backlog capacity
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 100;
/// Default size of the completed and failed histories
pub const DEFAULT_MAX_HISTORY: usize = 50;

/// Counters and sizes of an [`ActionQueue`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub paused: bool,
    pub queue_size: usize,
    pub executing: Option<ActionInfo>,
    pub pending_retries: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub total_executed: u64,
    pub total_failed: u64,
    pub total_cancelled: u64,
    pub total_retries: u64,
    pub total_timeouts: u64,
}

struct PendingRetry {
    ready_at: Instant,
    action: Action,
}

pub struct ActionQueue {
    backlog: Vec<Action>,
    executing: Option<Action>,
    retries: Vec<PendingRetry>,
    completed: VecDeque<Action>,
    failed: VecDeque<Action>,
    max_queue_size: usize,
    max_history: usize,
    auto_retry: bool,
    paused: bool,
    total_executed: u64,
    total_failed: u64,
    total_cancelled: u64,
    total_retries: u64,
    total_timeouts: u64,
    events: Option<EventBus>,
}

impl ActionQueue {
    /// Create a new queue with default limits
    pub fn new() -> Self {
        Self {
            backlog: Vec::new(),
            executing: None,
            retries: Vec::new(),
            completed: VecDeque::new(),
            failed: VecDeque::new(),
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            max_history: DEFAULT_MAX_HISTORY,
            auto_retry: true,
            paused: false,
            total_executed: 0,
            total_failed: 0,
            total_cancelled: 0,
            total_retries: 0,
            total_timeouts: 0,
            events: None,
        }
    }

    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    pub fn with_auto_retry(mut self, auto_retry: bool) -> Self {
        self.auto_retry = auto_retry;
        self
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Queue an action
    ///
    /// Returns false when the backlog is full.
    pub fn add_action(&mut self, action: Action) -> bool {
        if self.backlog.len() >= self.max_queue_size {
            tracing::warn!(
                "Action queue full ({} actions), rejecting {}",
                self.backlog.len(),
                action.name
            );
            return false;
        }

        tracing::debug!("Queued action {} [{}]", action.name, action.priority);
        metrics::gauge!("rokore.actions.queued").set((self.backlog.len() + 1) as f64);
        self.publish(BotEvent::ActionQueued {
            id: action.id,
            name: action.name.clone(),
            priority: action.priority,
        });
        self.insert(action);
        true
    }

    /// Queue several actions, returning how many were accepted
    pub fn add_actions(&mut self, actions: impl IntoIterator<Item = Action>) -> usize {
        actions
            .into_iter()
            .map(|action| self.add_action(action))
            .filter(|added| *added)
            .count()
    }

    /// Queue an action unless the same command is already queued, running
    /// or waiting for a retry
    pub fn add_unique(&mut self, action: Action) -> bool {
        if self.contains_duplicate(&action) {
            tracing::trace!("Skipping duplicate action {}", action.name);
            return false;
        }
        self.add_action(action)
    }

    /// Check if an action issuing the same command is already known
    pub fn contains_duplicate(&self, action: &Action) -> bool {
        self.executing
            .iter()
            .chain(self.backlog.iter())
            .chain(self.retries.iter().map(|r| &r.action))
            .any(|a| a.is_duplicate_of(action))
    }

    fn insert(&mut self, action: Action) {
        let index = insertion_index(&self.backlog, action.priority, |a| a.priority);
        self.backlog.insert(index, action);
    }

    /// Next action that would start, if the queue is not paused
    pub fn peek(&self) -> Option<&Action> {
        if self.paused {
            return None;
        }
        self.backlog.first()
    }

    /// Put actions whose retry delay elapsed back into the backlog
    ///
    /// Returns how many were re-queued. Called automatically by
    /// [`ActionQueue::start_execution`] and [`ActionQueue::execute_current`].
    pub fn promote_due_retries(&mut self) -> usize {
        if self.retries.is_empty() {
            return 0;
        }
        let now = Instant::now();
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.retries)
            .into_iter()
            .partition(|r| r.ready_at <= now);
        self.retries = waiting;

        let mut promoted = 0;
        for retry in due {
            if self.requeue(retry.action) {
                promoted += 1;
            }
        }
        promoted
    }

    fn requeue(&mut self, mut action: Action) -> bool {
        if self.backlog.len() >= self.max_queue_size {
            tracing::warn!("Action queue full, dropping retry of {}", action.name);
            action.mark_failed("queue full");
            self.record_failure(action);
            return false;
        }
        self.insert(action);
        true
    }

    /// Start the head of the backlog if nothing is running
    ///
    /// Does nothing while another action executes or the queue is paused.
    pub fn start_execution(&mut self) -> Option<&Action> {
        self.promote_due_retries();
        if self.executing.is_some() || self.paused || self.backlog.is_empty() {
            return None;
        }

        let mut action = self.backlog.remove(0);
        action.mark_started();
        tracing::debug!(
            "Starting action {} (attempt {})",
            action.name,
            action.retry_count() + 1
        );
        self.publish(BotEvent::ActionStarted {
            id: action.id,
            name: action.name.clone(),
        });
        self.executing = Some(action);
        self.executing.as_ref()
    }

    /// Advance the running action by one tick
    ///
    /// Returns `None` when nothing is running. Otherwise returns the status the
    /// action reached in this tick: `Running` when it needs more ticks, or the
    /// terminal status it finished with. A failed action that gets retried
    /// still reports `Failed` or `Timeout` here.
    pub fn execute_current(&mut self, effector: &mut dyn Effector) -> Option<ActionStatus> {
        self.promote_due_retries();
        let action = self.executing.as_mut()?;

        if action.is_timed_out() {
            tracing::debug!("Action {} timed out after {:?}", action.name, action.elapsed());
            action.mark_timeout();
            self.total_timeouts += 1;
            return Some(self.finish_current());
        }

        let outcome = match &action.kind {
            ActionKind::Wait { duration } => Ok(action.elapsed() >= *duration),
            kind => match catch_unwind(AssertUnwindSafe(|| effector.send_action(kind))) {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(_) => Err("effector panicked".to_string()),
            },
        };

        match outcome {
            Ok(true) => action.mark_completed(),
            Ok(false) => return Some(ActionStatus::Running),
            Err(error) => action.mark_failed(error),
        }
        Some(self.finish_current())
    }

    /// Cancel the running action; it is never retried
    pub fn cancel_current(&mut self) -> bool {
        let Some(action) = self.executing.as_mut() else {
            return false;
        };
        action.mark_cancelled();
        self.finish_current();
        true
    }

    /// Cancel the backlog, pending retries and the running action
    ///
    /// Returns the number of actions cancelled.
    pub fn cancel_all(&mut self) -> usize {
        let mut dropped: Vec<Action> = self.backlog.drain(..).collect();
        dropped.extend(self.retries.drain(..).map(|r| r.action));

        let mut cancelled = dropped.len();
        for mut action in dropped {
            action.mark_cancelled();
            self.record_cancel(&action);
        }
        if self.cancel_current() {
            cancelled += 1;
        }
        if cancelled > 0 {
            tracing::info!("Cancelled {} actions", cancelled);
        }
        cancelled
    }

    /// Cancel every queued, retrying or running action matching `predicate`
    ///
    /// Returns the number of actions cancelled.
    pub fn cancel_matching(&mut self, predicate: impl Fn(&Action) -> bool) -> usize {
        let (mut dropped, kept): (Vec<Action>, Vec<Action>) =
            self.backlog.drain(..).partition(|a| predicate(a));
        self.backlog = kept;
        let (retrying, waiting): (Vec<PendingRetry>, Vec<PendingRetry>) =
            self.retries.drain(..).partition(|r| predicate(&r.action));
        self.retries = waiting;
        dropped.extend(retrying.into_iter().map(|r| r.action));

        let mut cancelled = dropped.len();
        for mut action in dropped {
            action.mark_cancelled();
            self.record_cancel(&action);
        }
        if self.executing.as_ref().is_some_and(&predicate) && self.cancel_current() {
            cancelled += 1;
        }
        cancelled
    }

    fn finish_current(&mut self) -> ActionStatus {
        let Some(mut action) = self.executing.take() else {
            return ActionStatus::Pending;
        };
        let status = action.status();

        match status {
            ActionStatus::Completed => {
                self.total_executed += 1;
                metrics::counter!("rokore.actions.completed").increment(1);
                tracing::debug!("Action completed: {}", action.name);
                run_callback(&action.on_success, &action, "on_success");
                self.publish(BotEvent::ActionCompleted {
                    id: action.id,
                    name: action.name.clone(),
                });
                push_bounded(&mut self.completed, action, self.max_history);
            }
            ActionStatus::Failed | ActionStatus::Timeout => {
                if self.auto_retry && action.can_retry() {
                    action.prepare_retry();
                    self.total_retries += 1;
                    tracing::info!(
                        "Rescheduling action {} (retry {}/{})",
                        action.name,
                        action.retry_count(),
                        action.max_retries
                    );
                    run_callback(&action.on_retry, &action, "on_retry");
                    self.publish(BotEvent::ActionRetrying {
                        id: action.id,
                        name: action.name.clone(),
                        attempt: action.retry_count(),
                    });
                    if action.retry_delay.is_zero() {
                        self.requeue(action);
                    } else {
                        self.retries.push(PendingRetry {
                            ready_at: Instant::now() + action.retry_delay,
                            action,
                        });
                    }
                } else {
                    self.record_failure(action);
                }
            }
            ActionStatus::Cancelled => self.record_cancel(&action),
            ActionStatus::Pending | ActionStatus::Running => {
                tracing::error!("Finishing action {} in non-terminal state {}", action.name, status);
            }
        }
        status
    }

    fn record_failure(&mut self, action: Action) {
        self.total_failed += 1;
        metrics::counter!("rokore.actions.failed").increment(1);
        let error = action.error().unwrap_or("unknown error").to_string();
        tracing::warn!("Action failed: {} - {}", action.name, error);
        run_callback(&action.on_failure, &action, "on_failure");
        self.publish(BotEvent::ActionFailed {
            id: action.id,
            name: action.name.clone(),
            error,
        });
        push_bounded(&mut self.failed, action, self.max_history);
    }

    fn record_cancel(&mut self, action: &Action) {
        self.total_cancelled += 1;
        metrics::counter!("rokore.actions.cancelled").increment(1);
        tracing::debug!("Action cancelled: {}", action.name);
        self.publish(BotEvent::ActionCancelled {
            id: action.id,
            name: action.name.clone(),
        });
    }

    fn publish(&self, event: BotEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }

    pub fn pause(&mut self) {
        self.paused = true;
        tracing::info!("Action queue paused");
    }

    pub fn resume(&mut self) {
        self.paused = false;
        tracing::info!("Action queue resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Drop the backlog, pending retries, histories and counters
    ///
    /// The running action, if any, keeps running.
    pub fn clear(&mut self) {
        self.backlog.clear();
        self.retries.clear();
        self.completed.clear();
        self.failed.clear();
        self.total_executed = 0;
        self.total_failed = 0;
        self.total_cancelled = 0;
        self.total_retries = 0;
        self.total_timeouts = 0;
    }

    pub fn executing(&self) -> Option<&Action> {
        self.executing.as_ref()
    }

    pub fn is_executing(&self) -> bool {
        self.executing.is_some()
    }

    /// Number of actions waiting in the backlog
    pub fn len(&self) -> usize {
        self.backlog.len()
    }

    /// True when nothing is queued, running or waiting for a retry
    pub fn is_empty(&self) -> bool {
        self.backlog.is_empty() && self.executing.is_none() && self.retries.is_empty()
    }

    pub fn pending_retries(&self) -> usize {
        self.retries.len()
    }

    /// Look up a known action by id
    pub fn find(&self, id: ActionId) -> Option<&Action> {
        self.executing
            .iter()
            .chain(self.backlog.iter())
            .chain(self.retries.iter().map(|r| &r.action))
            .chain(self.completed.iter())
            .chain(self.failed.iter())
            .find(|a| a.id == id)
    }

    /// Completed actions, oldest first
    pub fn completed(&self) -> impl Iterator<Item = &Action> {
        self.completed.iter()
    }

    /// Actions that failed for good, oldest first
    pub fn failed(&self) -> impl Iterator<Item = &Action> {
        self.failed.iter()
    }

    pub fn status(&self) -> QueueStatus {
        QueueStatus {
            paused: self.paused,
            queue_size: self.backlog.len(),
            executing: self.executing.as_ref().map(Action::info),
            pending_retries: self.retries.len(),
            completed_count: self.completed.len(),
            failed_count: self.failed.len(),
            total_executed: self.total_executed,
            total_failed: self.total_failed,
            total_cancelled: self.total_cancelled,
            total_retries: self.total_retries,
            total_timeouts: self.total_timeouts,
        }
    }

    /// The backlog in execution order
    pub fn summary(&self) -> Vec<ActionInfo> {
        self.backlog.iter().map(Action::info).collect()
    }
}

impl Default for ActionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ActionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionQueue")
            .field("backlog", &self.backlog.len())
            .field("executing", &self.executing.as_ref().map(|a| &a.name))
            .field("retries", &self.retries.len())
            .field("paused", &self.paused)
            .finish()
    }
}

fn push_bounded(history: &mut VecDeque<Action>, action: Action, max: usize) {
    history.push_back(action);
    while history.len() > max {
        history.pop_front();
    }
}

fn run_callback(callback: &Option<ActionCallback>, action: &Action, which: &str) {
    if let Some(callback) = callback {
        if catch_unwind(AssertUnwindSafe(|| callback(action))).is_err() {
            tracing::warn!("Action {} callback {} panicked", action.name, which);
        }
    }
}
