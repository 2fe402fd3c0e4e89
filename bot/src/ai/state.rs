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

//! AI state values and per-state bookkeeping

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Top-level behaviour mode of the AI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum AiStateKind {
    /// AI disabled; the initial state
    #[default]
    Off,
    /// Player drives; the AI only reacts to death
    Manual,
    /// Roaming and looking for something to do
    Auto,
    /// Engaged with a target
    Combat,
    /// HP critically low, escaping
    Emergency,
    /// Out of danger, recovering HP and SP
    Healing,
    /// Dead; only left through an explicit respawn
    Dead,
}

impl AiStateKind {
    pub const ALL: [AiStateKind; 7] = [
        AiStateKind::Off,
        AiStateKind::Manual,
        AiStateKind::Auto,
        AiStateKind::Combat,
        AiStateKind::Emergency,
        AiStateKind::Healing,
        AiStateKind::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AiStateKind::Off => "off",
            AiStateKind::Manual => "manual",
            AiStateKind::Auto => "auto",
            AiStateKind::Combat => "combat",
            AiStateKind::Emergency => "emergency",
            AiStateKind::Healing => "healing",
            AiStateKind::Dead => "dead",
        }
    }
}

impl std::fmt::Display for AiStateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stay in a state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AiState {
    pub state: AiStateKind,
    pub entered_at: Instant,
    pub entry_count: u64,
}

impl AiState {
    /// Enter a state now
    pub fn new(state: AiStateKind, entry_count: u64) -> Self {
        Self {
            state,
            entered_at: Instant::now(),
            entry_count,
        }
    }

    /// Time spent in this state so far
    pub fn duration(&self) -> Duration {
        self.entered_at.elapsed()
    }
}

/// Cumulative statistics of a single state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateStats {
    /// Time spent in the state across all closed stays
    pub total_time: Duration,
    pub entry_count: u64,
    /// Entries caused by a transition rule, forced entries excluded
    pub transition_count: u64,
    pub last_entered: Option<Instant>,
}
