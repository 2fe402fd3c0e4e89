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

//! Snapshot of what the client currently sees on the map

use crate::actor::{Actor, ActorId, ActorType};
use serde::{Deserialize, Serialize};

/// Player plus the actors currently in sight
///
/// Lists keep arrival order. Lookups that pick "the first match" therefore
/// prefer actors that were seen earlier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub player: Option<Actor>,
    pub monsters: Vec<Actor>,
    pub npcs: Vec<Actor>,
    pub items: Vec<Actor>,
    pub players: Vec<Actor>,
}

impl WorldSnapshot {
    /// Create an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the controlled player
    pub fn set_player(&mut self, player: Actor) {
        self.player = Some(player);
    }

    /// Insert or replace an actor in the list matching its type
    ///
    /// Returns false for actor types the snapshot does not track.
    pub fn upsert_actor(&mut self, actor: Actor) -> bool {
        let Some(list) = self.list_mut(actor.actor_type) else {
            return false;
        };
        match list.iter_mut().find(|a| a.id == actor.id) {
            Some(existing) => *existing = actor,
            None => list.push(actor),
        }
        true
    }

    /// Remove an actor that left sight, returning it when known
    pub fn remove_actor(&mut self, id: ActorId) -> Option<Actor> {
        for list in [
            &mut self.monsters,
            &mut self.npcs,
            &mut self.items,
            &mut self.players,
        ] {
            if let Some(index) = list.iter().position(|a| a.id == id) {
                return Some(list.remove(index));
            }
        }
        None
    }

    /// Flag an actor as dead; returns false when it is not in sight
    pub fn mark_dead(&mut self, id: ActorId) -> bool {
        if let Some(player) = self.player.as_mut().filter(|p| p.id == id) {
            player.is_dead = true;
            player.stats.hp = 0;
            return true;
        }
        for list in [&mut self.monsters, &mut self.players] {
            if let Some(actor) = list.iter_mut().find(|a| a.id == id) {
                actor.is_dead = true;
                actor.stats.hp = 0;
                return true;
            }
        }
        false
    }

    /// Look up any tracked actor by id, including the player
    pub fn actor(&self, id: ActorId) -> Option<&Actor> {
        self.player
            .iter()
            .chain(&self.monsters)
            .chain(&self.npcs)
            .chain(&self.items)
            .chain(&self.players)
            .find(|a| a.id == id)
    }

    /// Monsters within `range` cells of the player, dead or alive
    pub fn monsters_within(&self, range: f64) -> impl Iterator<Item = &Actor> {
        Self::within(self.player.as_ref(), &self.monsters, range)
    }

    /// Live monsters within `range` cells of the player, in arrival order
    pub fn live_monsters_within(&self, range: f64) -> impl Iterator<Item = &Actor> {
        self.monsters_within(range).filter(|m| m.is_alive())
    }

    /// Dropped items within `range` cells of the player
    pub fn items_within(&self, range: f64) -> impl Iterator<Item = &Actor> {
        Self::within(self.player.as_ref(), &self.items, range)
    }

    /// Forget everything, for example on map change
    pub fn clear(&mut self) {
        self.player = None;
        self.monsters.clear();
        self.npcs.clear();
        self.items.clear();
        self.players.clear();
    }

    fn within<'a>(
        player: Option<&'a Actor>,
        actors: &'a [Actor],
        range: f64,
    ) -> impl Iterator<Item = &'a Actor> {
        actors
            .iter()
            .filter(move |a| player.is_some_and(|p| p.is_in_range(a, range)))
    }

    fn list_mut(&mut self, actor_type: ActorType) -> Option<&mut Vec<Actor>> {
        match actor_type {
            ActorType::Monster => Some(&mut self.monsters),
            ActorType::Npc => Some(&mut self.npcs),
            ActorType::Item => Some(&mut self.items),
            ActorType::Player => Some(&mut self.players),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorStats;
    use crate::position::Position;

    fn snapshot() -> WorldSnapshot {
        let mut world = WorldSnapshot::new();
        world.set_player(
            Actor::player(1, "Hero", Position::new(100, 100)).with_stats(ActorStats::new(100, 50)),
        );
        world
    }

    #[test]
    fn test_upsert_and_remove() {
        let mut world = snapshot();
        assert!(world.upsert_actor(Actor::monster(10, "Poring", Position::new(101, 100))));
        assert!(world.upsert_actor(Actor::monster(10, "Poring", Position::new(102, 100))));
        assert_eq!(world.monsters.len(), 1);
        assert_eq!(world.monsters[0].position, Position::new(102, 100));

        assert!(!world.upsert_actor(Actor::new(11, ActorType::Portal, "warp", Position::new(0, 0))));

        assert!(world.remove_actor(ActorId(10)).is_some());
        assert!(world.remove_actor(ActorId(10)).is_none());
    }

    #[test]
    fn test_range_queries_keep_arrival_order() {
        let mut world = snapshot();
        world.upsert_actor(Actor::monster(10, "Far", Position::new(104, 100)));
        world.upsert_actor(Actor::monster(11, "Near", Position::new(101, 100)));
        world.upsert_actor(Actor::monster(12, "Away", Position::new(150, 150)));

        let ids: Vec<_> = world.live_monsters_within(5.0).map(|m| m.id).collect();
        assert_eq!(ids, vec![ActorId(10), ActorId(11)]);

        world.mark_dead(ActorId(10));
        let ids: Vec<_> = world.live_monsters_within(5.0).map(|m| m.id).collect();
        assert_eq!(ids, vec![ActorId(11)]);
        assert_eq!(world.monsters_within(5.0).count(), 2);
    }

    #[test]
    fn test_no_player_sees_nothing() {
        let mut world = WorldSnapshot::new();
        world.upsert_actor(Actor::item(20, "Apple", Position::new(0, 0)));
        assert_eq!(world.items_within(100.0).count(), 0);
        assert!(world.actor(ActorId(20)).is_some());
    }
}
