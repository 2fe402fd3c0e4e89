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

//! Per-state decision functions
//!
//! Handlers only decide what to queue. They read the context and the
//! behaviour switches and return actions; the controller de-duplicates and
//! queues them.

use super::action::{Action, ActionKind, TARGET_PARAMETER};
use super::context::AiContext;
use super::state::AiStateKind;
use crate::config::BehaviorConfig;
use crate::priority::Priority;

/// Longest walk a single retreat may ask for, in cells
pub const MAX_RETREAT_DISTANCE: u32 = 30;

/// Actions the given state wants queued this tick
pub fn plan(state: AiStateKind, context: &AiContext) -> Vec<Action> {
    match state {
        AiStateKind::Auto => plan_auto(context),
        AiStateKind::Combat => plan_combat(context),
        AiStateKind::Emergency => plan_emergency(context),
        AiStateKind::Healing => plan_healing(context),
        AiStateKind::Off | AiStateKind::Manual | AiStateKind::Dead => Vec::new(),
    }
}

fn plan_auto(context: &AiContext) -> Vec<Action> {
    let Some(player) = context.player() else {
        return Vec::new();
    };
    let config = &context.config;
    let mut actions = Vec::new();

    if config.get_bool(BehaviorConfig::AUTO_LOOT, true) {
        let range = config.get_f64(BehaviorConfig::LOOT_DISTANCE, 2.0);
        if let Some(item) = context.world.items_within(range).next() {
            actions.push(
                Action::new(ActionKind::PickItem { item: item.id })
                    .with_name(format!("pick up {}", item.name))
                    .with_priority(Priority::Low),
            );
        }
    }

    if config.get_bool(BehaviorConfig::SIT_AUTO, true) && !player.is_sitting {
        let hp = config.get_f64(BehaviorConfig::SIT_HP_PERCENT, 90.0);
        let sp = config.get_f64(BehaviorConfig::SIT_SP_PERCENT, 90.0);
        if context.hp_percent() < hp || context.sp_percent() < sp {
            actions.push(Action::new(ActionKind::Sit).with_priority(Priority::Normal));
        }
    }

    actions
}

fn plan_combat(context: &AiContext) -> Vec<Action> {
    let (Some(player), Some(target)) = (context.player(), context.target_actor()) else {
        return Vec::new();
    };

    let action = if player.distance_to(target) > context.attack_distance() {
        Action::new(ActionKind::MoveTo {
            position: target.position,
        })
        .with_name(format!("approach {}", target.name))
    } else {
        Action::new(ActionKind::Attack { target: target.id })
            .with_name(format!("attack {}", target.name))
    };
    vec![
        action
            .with_priority(Priority::High)
            .with_parameter(TARGET_PARAMETER, target.id.0),
    ]
}

fn plan_emergency(context: &AiContext) -> Vec<Action> {
    let Some(player) = context.player() else {
        return Vec::new();
    };
    let config = &context.config;

    if config.get_bool(BehaviorConfig::TELEPORT_AUTO, true) {
        return vec![Action::new(ActionKind::Teleport).with_priority(Priority::Emergency)];
    }

    // Run directly away from the closest threat
    let safe = config.get_f64(BehaviorConfig::SAFE_DISTANCE, 5.0);
    let threat = context
        .world
        .live_monsters_within(safe)
        .min_by(|a, b| player.distance_to(a).total_cmp(&player.distance_to(b)));
    let Some(threat) = threat else {
        return Vec::new();
    };

    let distance = config
        .get_u32(BehaviorConfig::RETREAT_DISTANCE, 7)
        .min(MAX_RETREAT_DISTANCE) as i32;
    let away = threat.position.direction_to(&player.position);
    let position = player.position.move_in_direction(away, distance);
    vec![
        Action::new(ActionKind::MoveTo { position })
            .with_name(format!("retreat from {}", threat.name))
            .with_priority(Priority::Emergency),
    ]
}

fn plan_healing(context: &AiContext) -> Vec<Action> {
    let Some(player) = context.player() else {
        return Vec::new();
    };
    let config = &context.config;
    let mut actions = Vec::new();

    let heal_below = config.get_f64(BehaviorConfig::HEAL_HP_PERCENT, 50.0);
    if config.get_bool(BehaviorConfig::HEAL_AUTO, true) && context.hp_percent() < heal_below {
        let item_id = config.get_u32(BehaviorConfig::HEAL_ITEM_ID, 501);
        actions.push(
            Action::new(ActionKind::UseItem { item_id })
                .with_name("heal")
                .with_priority(Priority::High),
        );
    }

    let sp_below = config.get_f64(BehaviorConfig::RECOVER_SP_PERCENT, 30.0);
    if context.sp_percent() < sp_below {
        match config.get_u32(BehaviorConfig::SP_ITEM_ID, 0) {
            0 => {}
            item_id => actions.push(
                Action::new(ActionKind::UseItem { item_id })
                    .with_name("recover sp")
                    .with_priority(Priority::Normal),
            ),
        }
    }

    // Regenerate the rest naturally
    if actions.is_empty() && !player.is_sitting {
        actions.push(Action::new(ActionKind::Sit).with_priority(Priority::Low));
    }
    actions
}
