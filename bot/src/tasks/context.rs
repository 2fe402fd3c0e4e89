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

//! Context shared by every task execution

use crate::config::BehaviorConfig;
use chrono::{DateTime, Utc};
use rokore_common::Actor;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

/// Plain data held by a [`TaskContext`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskContextData {
    pub player: Option<Actor>,
    pub target: Option<Actor>,
    pub game_state: BTreeMap<String, Value>,
    pub ai_config: BehaviorConfig,
    pub shared_data: BTreeMap<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl Default for TaskContextData {
    fn default() -> Self {
        Self {
            player: None,
            target: None,
            game_state: BTreeMap::new(),
            ai_config: BehaviorConfig::new(),
            shared_data: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }
}

/// Scratch space shared by all concurrently running tasks
///
/// Every access goes through a read/write lock. Locks are never held across
/// an await point, so tasks read or write a field and move on. Use
/// [`TaskContext::modify`] when several fields must change together.
#[derive(Debug, Default)]
pub struct TaskContext {
    data: RwLock<TaskContextData>,
}

impl TaskContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context from existing data
    pub fn from_data(data: TaskContextData) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Read several fields under a single lock
    pub fn read<R>(&self, f: impl FnOnce(&TaskContextData) -> R) -> R {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        f(&data)
    }

    /// Change several fields under a single lock
    pub fn modify<R>(&self, f: impl FnOnce(&mut TaskContextData) -> R) -> R {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        let result = f(&mut data);
        data.timestamp = Utc::now();
        result
    }

    /// Owned copy of the whole context
    pub fn snapshot(&self) -> TaskContextData {
        self.read(Clone::clone)
    }

    /// Read a shared value
    pub fn get(&self, key: &str) -> Option<Value> {
        self.read(|data| data.shared_data.get(key).cloned())
    }

    /// Store a shared value
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        let (key, value) = (key.into(), value.into());
        self.modify(|data| data.shared_data.insert(key, value));
    }

    /// Store several shared values at once
    pub fn update<I, K, V>(&self, values: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let values: Vec<(String, Value)> = values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.modify(|data| data.shared_data.extend(values));
    }

    /// Remove a shared value, returning it
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.modify(|data| data.shared_data.remove(key))
    }

    pub fn game_state(&self, key: &str) -> Option<Value> {
        self.read(|data| data.game_state.get(key).cloned())
    }

    pub fn set_game_state(&self, key: impl Into<String>, value: impl Into<Value>) {
        let (key, value) = (key.into(), value.into());
        self.modify(|data| data.game_state.insert(key, value));
    }

    pub fn player(&self) -> Option<Actor> {
        self.read(|data| data.player.clone())
    }

    pub fn set_player(&self, player: Option<Actor>) {
        self.modify(|data| data.player = player);
    }

    pub fn target(&self) -> Option<Actor> {
        self.read(|data| data.target.clone())
    }

    pub fn set_target(&self, target: Option<Actor>) {
        self.modify(|data| data.target = target);
    }

    pub fn ai_config(&self) -> BehaviorConfig {
        self.read(|data| data.ai_config.clone())
    }

    pub fn set_ai_config(&self, config: BehaviorConfig) {
        self.modify(|data| data.ai_config = config);
    }

    /// Time of the last write
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.read(|data| data.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rokore_common::Position;
    use std::sync::Arc;

    #[test]
    fn test_shared_values() {
        let ctx = TaskContext::new();
        ctx.set("zeny", 1500);
        ctx.update([("map", "prontera"), ("route", "south")]);

        assert_eq!(ctx.get("zeny"), Some(Value::from(1500)));
        assert_eq!(ctx.get("map"), Some(Value::from("prontera")));
        assert_eq!(ctx.remove("route"), Some(Value::from("south")));
        assert!(ctx.get("route").is_none());
    }

    #[test]
    fn test_player_and_snapshot() {
        let ctx = TaskContext::new();
        let before = ctx.timestamp();
        ctx.set_player(Some(Actor::player(1, "Hero", Position::new(1, 2))));
        ctx.set_game_state("ai_state", "auto");

        let snapshot = ctx.snapshot();
        assert_eq!(snapshot.player.map(|p| p.name), Some("Hero".to_string()));
        assert_eq!(snapshot.game_state.get("ai_state"), Some(&Value::from("auto")));
        assert!(ctx.timestamp() >= before);
    }

    #[test]
    fn test_concurrent_writers() {
        let ctx = Arc::new(TaskContext::new());
        let threads: Vec<_> = (0..8)
            .map(|i| {
                let ctx = Arc::clone(&ctx);
                std::thread::spawn(move || {
                    for j in 0..100 {
                        ctx.modify(|data| {
                            let counter = data
                                .shared_data
                                .get("counter")
                                .and_then(Value::as_u64)
                                .unwrap_or(0);
                            data.shared_data.insert("counter".into(), Value::from(counter + 1));
                        });
                        ctx.set(format!("writer_{i}"), j);
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(ctx.get("counter"), Some(Value::from(800)));
    }
}
