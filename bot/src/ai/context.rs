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

//! Snapshot of everything the AI decides on

use crate::config::BehaviorConfig;
use rokore_common::{Actor, ActorId, WorldSnapshot};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::time::Instant;

/// Who is in control of the character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AiMode {
    #[default]
    Off,
    Manual,
    Auto,
}

impl std::fmt::Display for AiMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AiMode::Off => write!(f, "off"),
            AiMode::Manual => write!(f, "manual"),
            AiMode::Auto => write!(f, "auto"),
        }
    }
}

/// Context consulted by transition conditions and state handlers
///
/// The controller rebuilds the world part every tick; `target` and the free
/// form `values` survive between ticks.
#[derive(Debug, Clone)]
pub struct AiContext {
    pub world: WorldSnapshot,
    pub target: Option<ActorId>,
    pub config: BehaviorConfig,
    pub mode: AiMode,
    pub values: BTreeMap<String, Value>,
    pub updated_at: Instant,
}

impl AiContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self {
            world: WorldSnapshot::new(),
            target: None,
            config: BehaviorConfig::new(),
            mode: AiMode::Off,
            values: BTreeMap::new(),
            updated_at: Instant::now(),
        }
    }

    pub fn with_world(mut self, world: WorldSnapshot) -> Self {
        self.world = world;
        self
    }

    pub fn with_config(mut self, config: BehaviorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_mode(mut self, mode: AiMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn player(&self) -> Option<&Actor> {
        self.world.player.as_ref()
    }

    /// Player HP percentage, 0 without a player
    pub fn hp_percent(&self) -> f64 {
        self.player().map_or(0.0, |p| p.stats.hp_percent())
    }

    /// Player SP percentage, 0 without a player
    pub fn sp_percent(&self) -> f64 {
        self.player().map_or(0.0, |p| p.stats.sp_percent())
    }

    /// Check if the player is dead
    ///
    /// A player whose HP is unknown (max HP of zero) only counts as dead
    /// when flagged so.
    pub fn is_player_dead(&self) -> bool {
        self.player()
            .is_some_and(|p| p.is_dead || (p.stats.max_hp > 0 && p.stats.hp <= 0))
    }

    /// The current target when it is still in sight
    pub fn target_actor(&self) -> Option<&Actor> {
        self.target.and_then(|id| self.world.actor(id))
    }

    /// Configured melee reach in cells
    pub fn attack_distance(&self) -> f64 {
        self.config.get_f64(BehaviorConfig::ATTACK_DISTANCE, 1.0)
    }

    /// First live monster close enough to engage
    ///
    /// Picks in arrival order rather than by distance, so the monster that
    /// has been in sight longest wins.
    pub fn engage_candidate(&self) -> Option<&Actor> {
        self.world
            .live_monsters_within(self.attack_distance() + 3.0)
            .next()
    }

    /// Check if the current target is gone, dead or out of chase range
    pub fn target_lost(&self) -> bool {
        let (Some(player), Some(target)) = (self.player(), self.target_actor()) else {
            return true;
        };
        !target.is_alive() || player.distance_to(target) > self.attack_distance() + 10.0
    }

    /// Read a free form value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Store a free form value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Merge several free form values
    pub fn update<I, K, V>(&mut self, values: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        for (key, value) in values {
            self.set(key, value);
        }
    }
}

impl Default for AiContext {
    fn default() -> Self {
        Self::new()
    }
}
