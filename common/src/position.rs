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

//! Map cell coordinates and compass directions
//!
//! Coordinates follow the field layout of the game client: X grows to the
//! east and Y grows to the south.

use serde::{Deserialize, Serialize};

/// One of the eight directions an actor can face or move in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
    NorthWest,
}

impl Direction {
    /// Compute the direction pointing from one coordinate towards another
    ///
    /// Identical coordinates have no meaningful heading and yield `South`,
    /// the default facing of a freshly spawned actor.
    pub fn from_coordinates(from_x: i32, from_y: i32, to_x: i32, to_y: i32) -> Self {
        let dx = (to_x - from_x) as f64;
        let dy = (to_y - from_y) as f64;
        if dx == 0.0 && dy == 0.0 {
            return Direction::South;
        }

        let mut degrees = dy.atan2(dx).to_degrees();
        if degrees < 0.0 {
            degrees += 360.0;
        }

        match degrees {
            d if d <= 22.5 => Direction::East,
            d if d <= 67.5 => Direction::SouthEast,
            d if d <= 112.5 => Direction::South,
            d if d <= 157.5 => Direction::SouthWest,
            d if d <= 202.5 => Direction::West,
            d if d <= 247.5 => Direction::NorthWest,
            d if d <= 292.5 => Direction::North,
            d if d <= 337.5 => Direction::NorthEast,
            _ => Direction::East,
        }
    }

    /// Cell offset of a single step in this direction
    pub fn to_offset(self) -> (i32, i32) {
        match self {
            Direction::North => (0, -1),
            Direction::NorthEast => (1, -1),
            Direction::East => (1, 0),
            Direction::SouthEast => (1, 1),
            Direction::South => (0, 1),
            Direction::SouthWest => (-1, 1),
            Direction::West => (-1, 0),
            Direction::NorthWest => (-1, -1),
        }
    }

    /// The direction facing the other way
    pub fn opposite(self) -> Self {
        match self {
            Direction::North => Direction::South,
            Direction::NorthEast => Direction::SouthWest,
            Direction::East => Direction::West,
            Direction::SouthEast => Direction::NorthWest,
            Direction::South => Direction::North,
            Direction::SouthWest => Direction::NorthEast,
            Direction::West => Direction::East,
            Direction::NorthWest => Direction::SouthEast,
        }
    }
}

/// A cell on the current map
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    /// Create a new position
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance in cells
    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = (self.x - other.x) as f64;
        let dy = (self.y - other.y) as f64;
        (dx * dx + dy * dy).sqrt()
    }

    /// Manhattan distance in cells
    pub fn manhattan_distance_to(&self, other: &Position) -> i32 {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }

    /// Direction from this position towards another
    pub fn direction_to(&self, other: &Position) -> Direction {
        Direction::from_coordinates(self.x, self.y, other.x, other.y)
    }

    /// Step `distance` cells in the given direction
    pub fn move_in_direction(&self, direction: Direction, distance: i32) -> Position {
        let (dx, dy) = direction.to_offset();
        Position::new(self.x + dx * distance, self.y + dy * distance)
    }

    /// Check if another position lies within `range` cells
    pub fn is_in_range(&self, other: &Position, range: f64) -> bool {
        self.distance_to(other) <= range
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

impl From<(i32, i32)> for Position {
    fn from((x, y): (i32, i32)) -> Self {
        Self { x, y }
    }
}
