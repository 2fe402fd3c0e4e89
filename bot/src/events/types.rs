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

//! Event type definitions

use crate::ai::{ActionId, AiStateKind};
use crate::priority::Priority;
use crate::tasks::{TaskId, TaskStatus};
use serde::{Deserialize, Serialize};

/// Notifications emitted by the AI and task schedulers
///
/// Events are informational. Observers receive them after the fact and
/// cannot veto or alter the scheduling decision that produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BotEvent {
    // AI lifecycle
    AiStarted,
    AiStopped,
    AiStateChanged {
        old: AiStateKind,
        new: AiStateKind,
        forced: bool,
        reason: String,
    },

    // Action queue
    ActionQueued {
        id: ActionId,
        name: String,
        priority: Priority,
    },
    ActionStarted {
        id: ActionId,
        name: String,
    },
    ActionCompleted {
        id: ActionId,
        name: String,
    },
    ActionFailed {
        id: ActionId,
        name: String,
        error: String,
    },
    ActionRetrying {
        id: ActionId,
        name: String,
        attempt: u32,
    },
    ActionCancelled {
        id: ActionId,
        name: String,
    },

    // Task manager
    TaskManagerStarted,
    TaskManagerStopped,
    TaskScheduled {
        id: TaskId,
        name: String,
        priority: Priority,
    },
    TaskStarted {
        id: TaskId,
        name: String,
    },
    TaskFinished {
        id: TaskId,
        name: String,
        status: TaskStatus,
    },

    // Custom events
    Custom {
        event_type: String,
        data: String,
    },
}

impl BotEvent {
    /// Stable snake_case name of the event, as used in log lines
    pub fn name(&self) -> &str {
        match self {
            BotEvent::AiStarted => "ai_started",
            BotEvent::AiStopped => "ai_stopped",
            BotEvent::AiStateChanged { .. } => "ai_state_changed",
            BotEvent::ActionQueued { .. } => "action_queued",
            BotEvent::ActionStarted { .. } => "action_started",
            BotEvent::ActionCompleted { .. } => "action_completed",
            BotEvent::ActionFailed { .. } => "action_failed",
            BotEvent::ActionRetrying { .. } => "action_retrying",
            BotEvent::ActionCancelled { .. } => "action_cancelled",
            BotEvent::TaskManagerStarted => "task_manager_started",
            BotEvent::TaskManagerStopped => "task_manager_stopped",
            BotEvent::TaskScheduled { .. } => "task_scheduled",
            BotEvent::TaskStarted { .. } => "task_started",
            BotEvent::TaskFinished { .. } => "task_finished",
            BotEvent::Custom { event_type, .. } => event_type.as_str(),
        }
    }
}
