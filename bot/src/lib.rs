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

//! Rokore Bot Library
//!
//! The decision and scheduling core of the Rokore game client: an AI state
//! machine fed by the visible world, a single-flight priority action queue
//! driving the game connection, and a concurrent task manager for background
//! work.

pub mod ai;
pub mod config;
pub mod effector;
pub mod events;
pub mod priority;
pub mod tasks;

// Re-export commonly used types
pub use ai::{Action, ActionKind, ActionQueue, AiController, AiManager, AiStateKind, StateMachine};
pub use effector::{Effector, EffectorError, LoggingEffector};
pub use events::{BotEvent, EventBus};
pub use priority::Priority;
pub use tasks::{Task, TaskBody, TaskContext, TaskManager, TaskResult, TaskStatus};
