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

//! Shared actor types

use crate::position::Position;
use serde::{Deserialize, Serialize};

/// Server assigned identifier of a visible actor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(pub u32);

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ActorId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Kind of actor seen on the map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ActorType {
    #[default]
    Unknown,
    Player,
    Monster,
    Npc,
    Item,
    Pet,
    Portal,
}

impl std::fmt::Display for ActorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActorType::Unknown => write!(f, "unknown"),
            ActorType::Player => write!(f, "player"),
            ActorType::Monster => write!(f, "monster"),
            ActorType::Npc => write!(f, "npc"),
            ActorType::Item => write!(f, "item"),
            ActorType::Pet => write!(f, "pet"),
            ActorType::Portal => write!(f, "portal"),
        }
    }
}

/// Vital statistics of an actor
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ActorStats {
    pub hp: i32,
    pub max_hp: i32,
    pub sp: i32,
    pub max_sp: i32,
    pub level: u32,
}

impl ActorStats {
    /// Create stats with full HP and SP
    pub fn new(max_hp: i32, max_sp: i32) -> Self {
        Self {
            hp: max_hp,
            max_hp,
            sp: max_sp,
            max_sp,
            level: 1,
        }
    }

    /// HP as a percentage of maximum, 0 when the maximum is unknown
    pub fn hp_percent(&self) -> f64 {
        if self.max_hp <= 0 {
            return 0.0;
        }
        self.hp as f64 / self.max_hp as f64 * 100.0
    }

    /// SP as a percentage of maximum, 0 when the maximum is unknown
    pub fn sp_percent(&self) -> f64 {
        if self.max_sp <= 0 {
            return 0.0;
        }
        self.sp as f64 / self.max_sp as f64 * 100.0
    }

    pub fn is_alive(&self) -> bool {
        self.hp > 0
    }
}

/// Anything visible on the map: players, monsters, npcs, dropped items
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub actor_type: ActorType,
    pub name: String,
    pub position: Position,
    pub stats: ActorStats,
    pub is_dead: bool,
    pub is_sitting: bool,
}

impl Actor {
    /// Create a new actor at the given position
    pub fn new(
        id: impl Into<ActorId>,
        actor_type: ActorType,
        name: impl Into<String>,
        position: Position,
    ) -> Self {
        Self {
            id: id.into(),
            actor_type,
            name: name.into(),
            position,
            stats: ActorStats::default(),
            is_dead: false,
            is_sitting: false,
        }
    }

    /// Create a player actor
    pub fn player(id: impl Into<ActorId>, name: impl Into<String>, position: Position) -> Self {
        Self::new(id, ActorType::Player, name, position)
    }

    /// Create a monster actor
    pub fn monster(id: impl Into<ActorId>, name: impl Into<String>, position: Position) -> Self {
        Self::new(id, ActorType::Monster, name, position)
    }

    /// Create an npc actor
    pub fn npc(id: impl Into<ActorId>, name: impl Into<String>, position: Position) -> Self {
        Self::new(id, ActorType::Npc, name, position)
    }

    /// Create a dropped item actor
    pub fn item(id: impl Into<ActorId>, name: impl Into<String>, position: Position) -> Self {
        Self::new(id, ActorType::Item, name, position)
    }

    /// Set vital statistics
    pub fn with_stats(mut self, stats: ActorStats) -> Self {
        self.stats = stats;
        self
    }

    /// Distance in cells to another actor
    pub fn distance_to(&self, other: &Actor) -> f64 {
        self.position.distance_to(&other.position)
    }

    /// Distance in cells to a map position
    pub fn distance_to_position(&self, position: &Position) -> f64 {
        self.position.distance_to(position)
    }

    /// Check if another actor is within `range` cells
    pub fn is_in_range(&self, other: &Actor, range: f64) -> bool {
        self.distance_to(other) <= range
    }

    /// Check if the actor is alive
    ///
    /// Items and npcs carry no vital statistics, so only the dead flag counts
    /// for them.
    pub fn is_alive(&self) -> bool {
        if self.is_dead {
            return false;
        }
        match self.actor_type {
            ActorType::Player | ActorType::Monster | ActorType::Pet => {
                self.stats.max_hp <= 0 || self.stats.is_alive()
            }
            _ => true,
        }
    }

    pub fn is_player(&self) -> bool {
        self.actor_type == ActorType::Player
    }

    pub fn is_monster(&self) -> bool {
        self.actor_type == ActorType::Monster
    }

    pub fn is_npc(&self) -> bool {
        self.actor_type == ActorType::Npc
    }

    pub fn is_item(&self) -> bool {
        self.actor_type == ActorType::Item
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} '{}' #{} at {}",
            self.actor_type, self.name, self.id, self.position
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stat_percentages() {
        let mut stats = ActorStats::new(200, 50);
        stats.hp = 50;
        stats.sp = 10;
        assert_eq!(stats.hp_percent(), 25.0);
        assert_eq!(stats.sp_percent(), 20.0);

        let empty = ActorStats::default();
        assert_eq!(empty.hp_percent(), 0.0);
        assert_eq!(empty.sp_percent(), 0.0);
    }

    #[test]
    fn test_actor_liveness() {
        let mut monster = Actor::monster(1, "Poring", Position::new(0, 0))
            .with_stats(ActorStats::new(50, 0));
        assert!(monster.is_alive());

        monster.stats.hp = 0;
        assert!(!monster.is_alive());

        let mut item = Actor::item(2, "Jellopy", Position::new(1, 1));
        assert!(item.is_alive());
        item.is_dead = true;
        assert!(!item.is_alive());
    }

    #[test]
    fn test_actor_serialization() {
        let actor = Actor::npc(7, "Kafra", Position::new(150, 180));
        let json = serde_json::to_string(&actor).unwrap();
        let back: Actor = serde_json::from_str(&json).unwrap();
        assert_eq!(actor, back);
        assert!(back.is_npc());
    }
}
