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

//! Rokore Common Types
//!
//! This crate defines the shared world model consumed by the Rokore bot:
//! - Map positions and directions
//! - Actors (player, monsters, npcs, dropped items) and their vital stats
//! - A snapshot of everything currently in sight

pub mod actor;
pub mod position;
pub mod world;

pub use self::actor::{Actor, ActorId, ActorStats, ActorType};
pub use self::position::{Direction, Position};
pub use self::world::WorldSnapshot;
