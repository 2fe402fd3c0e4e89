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

//! Transition conditions and edges of the AI state graph

use super::context::{AiContext, AiMode};
use super::state::AiStateKind;
use crate::config::BehaviorConfig;
use crate::priority::Priority;
use std::cell::Cell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

pub type PredicateFn = Arc<dyn Fn(&AiContext) -> bool + Send + Sync>;

/// Hook run when a transition fires
///
/// Hooks may adjust the context (for example to pick a target). Errors and
/// panics are logged and never undo the transition.
pub type TransitionHook = Arc<dyn Fn(&mut AiContext) -> Result<(), String> + Send + Sync>;

/// Named predicate over the AI context
#[derive(Clone)]
pub struct AiCondition {
    pub name: String,
    pub description: String,
    predicate: PredicateFn,
    last_result: Cell<Option<bool>>,
    check_count: Cell<u64>,
}

impl AiCondition {
    /// Create a new condition
    pub fn new<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&AiContext) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            predicate: Arc::new(predicate),
            last_result: Cell::new(None),
            check_count: Cell::new(0),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Evaluate the condition
    ///
    /// A predicate that panics counts as not satisfied.
    pub fn check(&self, context: &AiContext) -> bool {
        self.check_count.set(self.check_count.get() + 1);
        let result = match catch_unwind(AssertUnwindSafe(|| (self.predicate)(context))) {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("Condition '{}' panicked, treating as false", self.name);
                false
            }
        };
        self.last_result.set(Some(result));
        result
    }

    /// Result of the most recent evaluation
    pub fn last_result(&self) -> Option<bool> {
        self.last_result.get()
    }

    /// Number of evaluations so far
    pub fn check_count(&self) -> u64 {
        self.check_count.get()
    }
}

impl std::fmt::Debug for AiCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiCondition")
            .field("name", &self.name)
            .field("last_result", &self.last_result.get())
            .field("check_count", &self.check_count.get())
            .finish()
    }
}

/// Directed, conditioned and prioritised edge between two states
#[derive(Clone)]
pub struct AiTransition {
    pub from: AiStateKind,
    pub to: AiStateKind,
    pub condition: AiCondition,
    pub priority: Priority,
    pub action: Option<TransitionHook>,
    pub trigger_count: u64,
}

impl AiTransition {
    /// Create a new transition
    pub fn new(
        from: AiStateKind,
        to: AiStateKind,
        condition: AiCondition,
        priority: Priority,
    ) -> Self {
        Self {
            from,
            to,
            condition,
            priority,
            action: None,
            trigger_count: 0,
        }
    }

    /// Run a hook whenever this transition fires
    pub fn with_action<F>(mut self, action: F) -> Self
    where
        F: Fn(&mut AiContext) -> Result<(), String> + Send + Sync + 'static,
    {
        self.action = Some(Arc::new(action));
        self
    }

    /// Check if the transition may fire from `current`
    pub fn can_transition(&self, current: AiStateKind, context: &AiContext) -> bool {
        current == self.from && self.condition.check(context)
    }

    /// Run the hook, if any, logging instead of propagating failures
    pub(crate) fn run_action(&self, context: &mut AiContext) {
        let Some(action) = self.action.as_ref() else {
            return;
        };
        match catch_unwind(AssertUnwindSafe(|| action(context))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(
                "Transition {} -> {} action failed: {}",
                self.from,
                self.to,
                e
            ),
            Err(_) => tracing::warn!(
                "Transition {} -> {} action panicked",
                self.from,
                self.to
            ),
        }
    }
}

impl std::fmt::Debug for AiTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiTransition")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("condition", &self.condition.name)
            .field("priority", &self.priority)
            .field("trigger_count", &self.trigger_count)
            .finish()
    }
}

/// Library of the conditions used by the default state graph
pub mod conditions {
    use super::*;

    pub fn hp_below_percent(threshold: f64) -> AiCondition {
        AiCondition::new(format!("hp_below_{threshold}"), move |ctx| {
            ctx.player().is_some() && ctx.hp_percent() < threshold
        })
        .with_description(format!("HP below {threshold}%"))
    }

    pub fn sp_below_percent(threshold: f64) -> AiCondition {
        AiCondition::new(format!("sp_below_{threshold}"), move |ctx| {
            ctx.player().is_some() && ctx.sp_percent() < threshold
        })
        .with_description(format!("SP below {threshold}%"))
    }

    /// HP below the `emergencyHpPercent` setting, read on every check
    pub fn hp_below_emergency() -> AiCondition {
        AiCondition::new("hp_below_emergency", |ctx| {
            let threshold = ctx
                .config
                .get_f64(BehaviorConfig::EMERGENCY_HP_PERCENT, 20.0);
            ctx.player().is_some() && !ctx.is_player_dead() && ctx.hp_percent() < threshold
        })
        .with_description("HP below the emergency threshold")
    }

    pub fn monster_nearby(range: f64) -> AiCondition {
        AiCondition::new(format!("monster_within_{range}"), move |ctx| {
            ctx.world.live_monsters_within(range).next().is_some()
        })
        .with_description(format!("Live monster within {range} cells"))
    }

    /// No live monster within the `safeDistance` setting
    pub fn out_of_danger() -> AiCondition {
        AiCondition::new("out_of_danger", |ctx| {
            let range = ctx.config.get_f64(BehaviorConfig::SAFE_DISTANCE, 5.0);
            ctx.world.live_monsters_within(range).next().is_none()
        })
        .with_description("No live monster within the safe distance")
    }

    pub fn no_monster_within(range: f64) -> AiCondition {
        AiCondition::new(format!("no_monster_within_{range}"), move |ctx| {
            ctx.world.live_monsters_within(range).next().is_none()
        })
        .with_description(format!("No live monster within {range} cells"))
    }

    pub fn hp_sp_recovered(hp: f64, sp: f64) -> AiCondition {
        AiCondition::new(format!("hp_{hp}_sp_{sp}_recovered"), move |ctx| {
            ctx.player().is_some() && ctx.hp_percent() >= hp && ctx.sp_percent() >= sp
        })
        .with_description(format!("HP at least {hp}% and SP at least {sp}%"))
    }

    pub fn is_dead() -> AiCondition {
        AiCondition::new("is_dead", |ctx| ctx.is_player_dead())
            .with_description("Player is dead")
    }

    pub fn ai_manual() -> AiCondition {
        AiCondition::new("ai_manual", |ctx| ctx.mode == AiMode::Manual)
            .with_description("AI in manual mode")
    }

    pub fn ai_auto() -> AiCondition {
        AiCondition::new("ai_auto", |ctx| ctx.mode == AiMode::Auto)
            .with_description("AI in automatic mode")
    }

    pub fn has_target() -> AiCondition {
        AiCondition::new("has_target", |ctx| ctx.target_actor().is_some())
            .with_description("A target is selected and in sight")
    }

    pub fn target_in_range(range: f64) -> AiCondition {
        AiCondition::new(format!("target_within_{range}"), move |ctx| {
            match (ctx.player(), ctx.target_actor()) {
                (Some(player), Some(target)) => player.is_in_range(target, range),
                _ => false,
            }
        })
        .with_description(format!("Target within {range} cells"))
    }

    /// HP and SP both recovered to at least the `recoverHpPercent` and
    /// `recoverSpPercentExit` settings
    pub fn vitals_recovered() -> AiCondition {
        AiCondition::new("vitals_recovered", |ctx| {
            let hp = ctx.config.get_f64(BehaviorConfig::RECOVER_HP_PERCENT, 80.0);
            let sp = ctx
                .config
                .get_f64(BehaviorConfig::RECOVER_SP_PERCENT_EXIT, 50.0);
            ctx.player().is_some() && ctx.hp_percent() >= hp && ctx.sp_percent() >= sp
        })
        .with_description("HP and SP recovered")
    }

    /// Auto attack enabled and a live monster close enough to engage
    pub fn should_attack() -> AiCondition {
        AiCondition::new("should_attack", |ctx| {
            ctx.config.get_bool(BehaviorConfig::ATTACK_AUTO, true)
                && ctx.engage_candidate().is_some()
        })
        .with_description("A monster is within engage range")
    }

    pub fn lost_target() -> AiCondition {
        AiCondition::new("lost_target", |ctx| ctx.target_lost())
            .with_description("Target dead, gone or out of chase range")
    }
}

/// Library of transition hooks used by the default state graph
pub mod hooks {
    use super::*;

    /// Select the current engage candidate as target
    pub fn acquire_target(context: &mut AiContext) -> Result<(), String> {
        let candidate = context
            .engage_candidate()
            .map(|m| m.id)
            .ok_or_else(|| "no monster left to engage".to_string())?;
        context.target = Some(candidate);
        Ok(())
    }

    pub fn clear_target(context: &mut AiContext) -> Result<(), String> {
        context.target = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rokore_common::{Actor, ActorId, ActorStats, Position, WorldSnapshot};

    fn context(hp: i32) -> AiContext {
        let mut world = WorldSnapshot::new();
        let mut stats = ActorStats::new(100, 100);
        stats.hp = hp;
        world.set_player(Actor::player(1, "Hero", Position::new(0, 0)).with_stats(stats));
        world.upsert_actor(Actor::monster(2, "Poring", Position::new(2, 0)));
        AiContext::new().with_world(world)
    }

    #[test]
    fn test_condition_diagnostics() {
        let condition = conditions::hp_below_percent(50.0);
        assert_eq!(condition.last_result(), None);

        assert!(condition.check(&context(10)));
        assert!(!condition.check(&context(90)));
        assert_eq!(condition.check_count(), 2);
        assert_eq!(condition.last_result(), Some(false));
    }

    #[test]
    fn test_panicking_condition_is_false() {
        let condition = AiCondition::new("broken", |_| panic!("bad predicate"));
        assert!(!condition.check(&context(100)));
        assert_eq!(condition.last_result(), Some(false));
    }

    #[test]
    fn test_can_transition_requires_source_state() {
        let transition = AiTransition::new(
            AiStateKind::Auto,
            AiStateKind::Dead,
            conditions::is_dead(),
            Priority::Emergency,
        );
        let ctx = context(0);
        assert!(transition.can_transition(AiStateKind::Auto, &ctx));
        assert!(!transition.can_transition(AiStateKind::Combat, &ctx));
    }

    #[test]
    fn test_failing_hook_is_swallowed() {
        let transition = AiTransition::new(
            AiStateKind::Auto,
            AiStateKind::Combat,
            conditions::should_attack(),
            Priority::High,
        )
        .with_action(|_| Err("nope".to_string()));
        let mut ctx = context(100);
        transition.run_action(&mut ctx);

        let panicking = transition.clone().with_action(|_| panic!("hook exploded"));
        panicking.run_action(&mut ctx);
    }

    #[test]
    fn test_acquire_target_hook() {
        let mut ctx = context(100);
        assert!(conditions::should_attack().check(&ctx));
        hooks::acquire_target(&mut ctx).unwrap();
        assert_eq!(ctx.target, Some(ActorId(2)));
        assert!(conditions::has_target().check(&ctx));
        assert!(!conditions::target_in_range(1.0).check(&ctx));
        assert!(conditions::target_in_range(2.0).check(&ctx));

        hooks::clear_target(&mut ctx).unwrap();
        assert!(conditions::lost_target().check(&ctx));
    }
}
