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

//! AI state machine, action queue and the manager that ties them together

mod action;
mod action_queue;
mod condition;
mod context;
mod controller;
pub mod handlers;
mod manager;
mod state;
mod state_machine;

pub use action::{
    Action, ActionCallback, ActionId, ActionInfo, ActionKind, ActionStatus,
    DEFAULT_ACTION_TIMEOUT, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY, TARGET_PARAMETER,
};
pub use action_queue::{ActionQueue, QueueStatus};
pub use condition::{AiCondition, AiTransition, PredicateFn, TransitionHook, conditions, hooks};
pub use context::{AiContext, AiMode};
pub use controller::{AiController, AiError, AiResult, AiStatus, default_transitions};
pub use manager::AiManager;
pub use state::{AiState, AiStateKind, StateStats};
pub use state_machine::{StateMachine, StateMachineSummary};
