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

//! Discrete, single-flight units of avatar behaviour

use crate::priority::Priority;
use rokore_common::{ActorId, Position};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Default time an action may run before it times out
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(30);
/// Default number of retries after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default delay before a failed action is queued again
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Parameter holding the id of the actor an action is aimed at
pub const TARGET_PARAMETER: &str = "target";

/// Unique identifier of an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionId(pub Uuid);

impl ActionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Command an action asks the effector to carry out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ActionKind {
    MoveTo { position: Position },
    Attack { target: ActorId },
    UseSkill {
        skill_id: u32,
        level: u32,
        target: Option<ActorId>,
    },
    UseItem { item_id: u32 },
    PickItem { item: ActorId },
    Teleport,
    Sit,
    Stand,
    TalkNpc { npc: ActorId },
    SendChat { message: String },
    /// Completes after the duration without involving the effector
    Wait { duration: Duration },
}

impl ActionKind {
    /// Short label used as default action name
    pub fn label(&self) -> &'static str {
        match self {
            ActionKind::MoveTo { .. } => "move_to",
            ActionKind::Attack { .. } => "attack",
            ActionKind::UseSkill { .. } => "use_skill",
            ActionKind::UseItem { .. } => "use_item",
            ActionKind::PickItem { .. } => "pick_item",
            ActionKind::Teleport => "teleport",
            ActionKind::Sit => "sit",
            ActionKind::Stand => "stand",
            ActionKind::TalkNpc { .. } => "talk_npc",
            ActionKind::SendChat { .. } => "send_chat",
            ActionKind::Wait { .. } => "wait",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKind::MoveTo { position } => write!(f, "move to {}", position),
            ActionKind::Attack { target } => write!(f, "attack #{}", target),
            ActionKind::UseSkill {
                skill_id,
                level,
                target: Some(target),
            } => write!(f, "use skill {} lv {} on #{}", skill_id, level, target),
            ActionKind::UseSkill {
                skill_id, level, ..
            } => write!(f, "use skill {} lv {}", skill_id, level),
            ActionKind::UseItem { item_id } => write!(f, "use item {}", item_id),
            ActionKind::PickItem { item } => write!(f, "pick up #{}", item),
            ActionKind::Teleport => write!(f, "teleport"),
            ActionKind::Sit => write!(f, "sit"),
            ActionKind::Stand => write!(f, "stand"),
            ActionKind::TalkNpc { npc } => write!(f, "talk to #{}", npc),
            ActionKind::SendChat { message } => write!(f, "say \"{}\"", message),
            ActionKind::Wait { duration } => write!(f, "wait {:?}", duration),
        }
    }
}

/// Lifecycle state of an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl ActionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ActionStatus::Pending | ActionStatus::Running)
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionStatus::Pending => write!(f, "pending"),
            ActionStatus::Running => write!(f, "running"),
            ActionStatus::Completed => write!(f, "completed"),
            ActionStatus::Failed => write!(f, "failed"),
            ActionStatus::Cancelled => write!(f, "cancelled"),
            ActionStatus::Timeout => write!(f, "timeout"),
        }
    }
}

/// Observer invoked when an action completes, fails for good or is retried
pub type ActionCallback = Arc<dyn Fn(&Action) + Send + Sync>;

/// A queued effector command with its retry policy
#[derive(Clone)]
pub struct Action {
    pub id: ActionId,
    pub kind: ActionKind,
    pub name: String,
    pub priority: Priority,
    /// Zero disables the timeout
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub parameters: BTreeMap<String, Value>,
    status: ActionStatus,
    retry_count: u32,
    created_at: Instant,
    started_at: Option<Instant>,
    completed_at: Option<Instant>,
    error: Option<String>,
    pub(crate) on_success: Option<ActionCallback>,
    pub(crate) on_failure: Option<ActionCallback>,
    pub(crate) on_retry: Option<ActionCallback>,
}

impl Action {
    /// Create a new pending action with default policy
    pub fn new(kind: ActionKind) -> Self {
        Self {
            id: ActionId::new(),
            name: kind.label().to_string(),
            kind,
            priority: Priority::Normal,
            timeout: DEFAULT_ACTION_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            parameters: BTreeMap::new(),
            status: ActionStatus::Pending,
            retry_count: 0,
            created_at: Instant::now(),
            started_at: None,
            completed_at: None,
            error: None,
            on_success: None,
            on_failure: None,
            on_retry: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

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

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn on_success<F: Fn(&Action) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.on_success = Some(Arc::new(f));
        self
    }

    pub fn on_failure<F: Fn(&Action) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.on_failure = Some(Arc::new(f));
        self
    }

    pub fn on_retry<F: Fn(&Action) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.on_retry = Some(Arc::new(f));
        self
    }

    pub fn status(&self) -> ActionStatus {
        self.status
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<Instant> {
        self.completed_at
    }

    pub fn parameter(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }

    pub fn set_parameter(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.parameters.insert(key.into(), value.into());
    }

    /// Time since the current attempt started, zero when not started
    pub fn elapsed(&self) -> Duration {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => end.duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        }
    }

    /// Check if the running attempt exceeded its timeout
    pub fn is_timed_out(&self) -> bool {
        self.status == ActionStatus::Running
            && !self.timeout.is_zero()
            && self.elapsed() > self.timeout
    }

    /// Check if a failed or timed out action has attempts left
    pub fn can_retry(&self) -> bool {
        matches!(self.status, ActionStatus::Failed | ActionStatus::Timeout)
            && self.retry_count < self.max_retries
    }

    /// Two actions are duplicates when they issue the same command
    pub fn is_duplicate_of(&self, other: &Action) -> bool {
        self.kind == other.kind
    }

    /// Check if the action is aimed at the given actor
    ///
    /// Commands naming the actor match, as do actions tagged with a
    /// [`TARGET_PARAMETER`] such as the walk towards a monster.
    pub fn targets(&self, id: ActorId) -> bool {
        let named = match &self.kind {
            ActionKind::Attack { target }
            | ActionKind::PickItem { item: target }
            | ActionKind::TalkNpc { npc: target } => *target == id,
            ActionKind::UseSkill { target, .. } => *target == Some(id),
            _ => false,
        };
        named
            || self.parameter(TARGET_PARAMETER).and_then(Value::as_u64) == Some(u64::from(id.0))
    }

    pub(crate) fn mark_started(&mut self) {
        self.status = ActionStatus::Running;
        self.started_at = Some(Instant::now());
        self.completed_at = None;
    }

    pub(crate) fn mark_completed(&mut self) {
        self.status = ActionStatus::Completed;
        self.completed_at = Some(Instant::now());
    }

    pub(crate) fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = ActionStatus::Failed;
        self.completed_at = Some(Instant::now());
        self.error = Some(error.into());
    }

    pub(crate) fn mark_cancelled(&mut self) {
        self.status = ActionStatus::Cancelled;
        self.completed_at = Some(Instant::now());
    }

    pub(crate) fn mark_timeout(&mut self) {
        self.status = ActionStatus::Timeout;
        self.completed_at = Some(Instant::now());
        self.error = Some(format!("timed out after {:?}", self.timeout));
    }

    /// Return a failed action to PENDING for another attempt
    pub(crate) fn prepare_retry(&mut self) {
        self.retry_count += 1;
        self.status = ActionStatus::Pending;
        self.started_at = None;
        self.completed_at = None;
    }

    /// Serializable view of the action
    pub fn info(&self) -> ActionInfo {
        ActionInfo {
            id: self.id,
            kind: self.kind.clone(),
            name: self.name.clone(),
            priority: self.priority,
            status: self.status,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            elapsed: self.elapsed(),
            error: self.error.clone(),
        }
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("status", &self.status)
            .field("retry_count", &self.retry_count)
            .field("error", &self.error)
            .finish()
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}] ({})", self.name, self.priority, self.status)
    }
}

/// Snapshot of an action for status reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionInfo {
    pub id: ActionId,
    pub kind: ActionKind,
    pub name: String,
    pub priority: Priority,
    pub status: ActionStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub elapsed: Duration,
    pub error: Option<String>,
}
