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

//! Scheduling priorities shared by actions and tasks

use serde::{Deserialize, Serialize};

/// Priority of an action or task
///
/// Variants compare by their numeric value, so `Emergency > High`. Queues
/// break ties between equal priorities by arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Priority {
    Idle,
    Background,
    Low,
    #[default]
    Normal,
    High,
    Critical,
    Emergency,
}

impl Priority {
    /// All priorities from highest to lowest
    pub const ALL: [Priority; 7] = [
        Priority::Emergency,
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
        Priority::Background,
        Priority::Idle,
    ];

    /// Numeric weight of the priority
    pub fn value(self) -> u8 {
        match self {
            Priority::Emergency => 100,
            Priority::Critical => 90,
            Priority::High => 80,
            Priority::Normal => 50,
            Priority::Low => 20,
            Priority::Background => 10,
            Priority::Idle => 1,
        }
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.value().cmp(&other.value())
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Emergency => write!(f, "EMERGENCY"),
            Priority::Critical => write!(f, "CRITICAL"),
            Priority::High => write!(f, "HIGH"),
            Priority::Normal => write!(f, "NORMAL"),
            Priority::Low => write!(f, "LOW"),
            Priority::Background => write!(f, "BACKGROUND"),
            Priority::Idle => write!(f, "IDLE"),
        }
    }
}

/// Index at which an item of `priority` joins a queue sorted high to low
///
/// The item goes in front of the first entry with a strictly lower priority,
/// which keeps arrival order among equals.
pub(crate) fn insertion_index<T>(
    items: &[T],
    priority: Priority,
    priority_of: impl Fn(&T) -> Priority,
) -> usize {
    items
        .iter()
        .position(|item| priority_of(item) < priority)
        .unwrap_or(items.len())
}
