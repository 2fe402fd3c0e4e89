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

//! Boundary to the game connection
//!
//! The AI never talks to the network directly. Every concrete command goes
//! through an [`Effector`], which the connection layer implements.

use crate::ai::ActionKind;
use thiserror::Error;

/// Error reported by an effector while issuing a command
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EffectorError {
    #[error("Not connected to the map server")]
    Disconnected,
    #[error("Command rejected: {0}")]
    Rejected(String),
    #[error("Command failed: {0}")]
    Failed(String),
}

/// Issues game commands on behalf of the AI
///
/// `send_action` is polled once per scheduler tick for the running action.
/// It must not block: it sends or re-checks the command and reports whether
/// the action is now complete. `Ok(false)` keeps the action running, so a walk
/// can report `false` until the avatar arrives.
#[cfg_attr(test, mockall::automock)]
pub trait Effector: Send {
    fn send_action(&mut self, action: &ActionKind) -> Result<bool, EffectorError>;

    /// Whether commands can reach the game at all
    ///
    /// Losing the connection is fatal for the AI: the manager stops and has
    /// to be started again explicitly.
    fn is_connected(&self) -> bool {
        true
    }
}

impl<E: Effector + ?Sized> Effector for Box<E> {
    fn send_action(&mut self, action: &ActionKind) -> Result<bool, EffectorError> {
        (**self).send_action(action)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}

/// Effector that logs each command and reports it complete
///
/// Used when the bot runs without a live connection.
#[derive(Debug, Default)]
pub struct LoggingEffector {
    sent: u64,
}

impl LoggingEffector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of commands issued so far
    pub fn sent(&self) -> u64 {
        self.sent
    }
}

impl Effector for LoggingEffector {
    fn send_action(&mut self, action: &ActionKind) -> Result<bool, EffectorError> {
        self.sent += 1;
        tracing::info!("Effector: {}", action);
        Ok(true)
    }
}
