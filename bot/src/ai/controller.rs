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

//! Synchronous core of the AI manager
//!
//! [`AiController`] owns the state machine, the action queue and the
//! effector. One call to [`AiController::tick`] runs a full decision cycle,
//! which keeps the behaviour testable without a runtime; the async
//! [`AiManager`](super::AiManager) only calls it on an interval.

use super::action_queue::{ActionQueue, QueueStatus};
use super::condition::{AiTransition, conditions, hooks};
use super::context::AiMode;
use super::handlers;
use super::state::AiStateKind;
use super::state_machine::{StateMachine, StateMachineSummary};
use crate::config::{AiSettings, BehaviorConfig};
use crate::effector::Effector;
use crate::events::{BotEvent, EventBus};
use crate::priority::Priority;
use crate::tasks::TaskContext;
use rokore_common::{Actor, ActorId, WorldSnapshot};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AiError {
    #[error("Effector lost its connection to the game")]
    Disconnected,
    #[error("AI tick panicked: {0}")]
    TickPanicked(String),
    #[error("AI is already running")]
    AlreadyRunning,
}

pub type AiResult<T> = Result<T, AiError>;

/// Snapshot reported by [`AiController::status`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiStatus {
    pub enabled: bool,
    pub mode: AiMode,
    pub state: AiStateKind,
    pub state_duration: Duration,
    pub target: Option<ActorId>,
    pub queue: QueueStatus,
    pub state_machine: StateMachineSummary,
}

/// The standard state graph
///
/// Death is checked first from every live state. OFF is left only through
/// the mode switches and DEAD only through a respawn.
pub fn default_transitions() -> Vec<AiTransition> {
    use AiStateKind::*;

    let mut transitions: Vec<AiTransition> = [Auto, Combat, Emergency, Healing, Manual]
        .into_iter()
        .map(|from| AiTransition::new(from, Dead, conditions::is_dead(), Priority::Emergency))
        .collect();

    transitions.extend([
        AiTransition::new(Off, Manual, conditions::ai_manual(), Priority::High),
        AiTransition::new(Off, Auto, conditions::ai_auto(), Priority::High),
        AiTransition::new(Manual, Auto, conditions::ai_auto(), Priority::High),
        AiTransition::new(
            Auto,
            Emergency,
            conditions::hp_below_emergency(),
            Priority::Emergency,
        ),
        AiTransition::new(
            Combat,
            Emergency,
            conditions::hp_below_emergency(),
            Priority::Emergency,
        ),
        AiTransition::new(Auto, Combat, conditions::should_attack(), Priority::High)
            .with_action(hooks::acquire_target),
        AiTransition::new(Combat, Auto, conditions::lost_target(), Priority::Normal)
            .with_action(hooks::clear_target),
        AiTransition::new(
            Emergency,
            Healing,
            conditions::out_of_danger(),
            Priority::High,
        ),
        AiTransition::new(
            Healing,
            Auto,
            conditions::vitals_recovered(),
            Priority::Normal,
        ),
    ]);
    transitions
}

pub struct AiController {
    state_machine: StateMachine,
    queue: ActionQueue,
    effector: Box<dyn Effector>,
    world: WorldSnapshot,
    config: BehaviorConfig,
    mode: AiMode,
    enabled: bool,
    events: EventBus,
    task_context: Option<Arc<TaskContext>>,
}

impl AiController {
    /// Create a controller with default settings and behaviour
    pub fn new(effector: Box<dyn Effector>, events: EventBus) -> Self {
        Self::from_settings(&AiSettings::default(), BehaviorConfig::new(), effector, events)
    }

    pub fn from_settings(
        settings: &AiSettings,
        config: BehaviorConfig,
        effector: Box<dyn Effector>,
        events: EventBus,
    ) -> Self {
        let mut state_machine = StateMachine::new()
            .with_update_interval(settings.state_update_interval())
            .with_max_history(settings.max_state_history)
            .with_event_bus(events.clone());
        state_machine.add_transitions(default_transitions());

        let queue = ActionQueue::new()
            .with_max_queue_size(settings.max_queue_size)
            .with_max_history(settings.max_action_history)
            .with_auto_retry(settings.auto_retry)
            .with_event_bus(events.clone());

        Self {
            state_machine,
            queue,
            effector,
            world: WorldSnapshot::new(),
            config,
            mode: AiMode::Auto,
            enabled: false,
            events,
            task_context: None,
        }
    }

    /// Mirror player, target and AI state into a task context every tick
    pub fn with_task_context(mut self, context: Arc<TaskContext>) -> Self {
        self.task_context = Some(context);
        self
    }

    /// Run one decision cycle
    ///
    /// Does nothing while stopped. An error means the AI cannot go on and
    /// the caller should stop it.
    pub fn tick(&mut self) -> AiResult<()> {
        if !self.enabled {
            return Ok(());
        }
        if !self.effector.is_connected() {
            return Err(AiError::Disconnected);
        }

        let previous_target = self.state_machine.context().target;
        self.refresh_context();

        let before = self.state_machine.current_state();
        if self.state_machine.update() {
            self.on_state_entered(before, self.state_machine.current_state(), previous_target);
        }

        let state = self.state_machine.current_state();
        for action in handlers::plan(state, self.state_machine.context()) {
            self.queue.add_unique(action);
        }

        self.queue.execute_current(self.effector.as_mut());
        if !self.queue.is_executing() {
            self.queue.start_execution();
        }

        self.mirror_task_context();
        Ok(())
    }

    fn refresh_context(&mut self) {
        let world = self.world.clone();
        let config = self.config.clone();
        let mode = self.mode;
        self.state_machine.update_context(|ctx| {
            ctx.world = world;
            ctx.config = config;
            ctx.mode = mode;
            if ctx.target.is_some() && ctx.target_lost() {
                tracing::debug!("Target lost, clearing");
                ctx.target = None;
            }
        });
    }

    fn on_state_entered(
        &mut self,
        from: AiStateKind,
        to: AiStateKind,
        previous_target: Option<ActorId>,
    ) {
        match to {
            AiStateKind::Dead => {
                tracing::warn!("Player died, AI waits for respawn");
                self.queue.cancel_all();
            }
            AiStateKind::Emergency => {
                // Let the escape action run next instead of finishing a walk
                if self
                    .queue
                    .executing()
                    .is_some_and(|a| a.priority < Priority::Emergency)
                {
                    self.queue.cancel_current();
                }
            }
            AiStateKind::Auto if from == AiStateKind::Combat => {
                // The fight is over; stale walks and swings would block the slot
                if let Some(target) = previous_target {
                    let dropped = self.queue.cancel_matching(|a| a.targets(target));
                    if dropped > 0 {
                        tracing::debug!("Dropped {} actions aimed at #{}", dropped, target);
                    }
                }
            }
            _ => {}
        }
        tracing::debug!("Entered {} from {}", to, from);
    }

    fn mirror_task_context(&self) {
        let Some(task_context) = &self.task_context else {
            return;
        };
        let context = self.state_machine.context();
        let player = context.player().cloned();
        let target = context.target_actor().cloned();
        let state = self.state_machine.current_state().as_str();
        let config = self.config.clone();
        task_context.modify(|data| {
            data.player = player;
            data.target = target;
            data.ai_config = config;
            data.game_state
                .insert("ai_state".to_string(), Value::from(state));
        });
    }

    /// Enable ticking; fails when already running
    pub fn start(&mut self) -> AiResult<()> {
        if self.enabled {
            return Err(AiError::AlreadyRunning);
        }
        self.enabled = true;
        tracing::info!("AI started in {} mode", self.mode);
        self.events.publish(BotEvent::AiStarted);
        Ok(())
    }

    /// Stop ticking, cancel every action and fall back to OFF
    pub fn stop(&mut self) {
        self.queue.cancel_all();
        self.state_machine.force_state(AiStateKind::Off, "AI stopped");
        if self.enabled {
            self.enabled = false;
            tracing::info!("AI stopped");
            self.events.publish(BotEvent::AiStopped);
        }
    }

    /// Disable ticking after a fatal error, keeping state for inspection
    pub(crate) fn halt(&mut self, error: &AiError) {
        self.enabled = false;
        tracing::error!("AI halted: {}", error);
        self.events.publish(BotEvent::AiStopped);
    }

    pub fn enable_auto(&mut self) {
        self.mode = AiMode::Auto;
        tracing::info!("AI mode set to auto");
    }

    /// Hand control to the user; queued actions are dropped
    pub fn enable_manual(&mut self) {
        self.mode = AiMode::Manual;
        self.queue.cancel_all();
        let state = self.state_machine.current_state();
        if state != AiStateKind::Dead {
            self.state_machine
                .force_state(AiStateKind::Manual, "manual mode");
        }
        tracing::info!("AI mode set to manual");
    }

    /// Switch the AI off while the loop keeps running
    pub fn disable(&mut self) {
        self.mode = AiMode::Off;
        self.queue.cancel_all();
        self.state_machine.force_state(AiStateKind::Off, "AI disabled");
        tracing::info!("AI mode set to off");
    }

    /// Leave DEAD after the character respawned
    ///
    /// Returns false when the AI was not dead.
    pub fn respawn(&mut self) -> bool {
        if self.state_machine.current_state() != AiStateKind::Dead {
            return false;
        }
        if let Some(player) = self.world.player.as_mut() {
            player.is_dead = false;
        }
        self.state_machine.update_context(|ctx| ctx.target = None);
        let state = match self.mode {
            AiMode::Auto => AiStateKind::Auto,
            AiMode::Manual => AiStateKind::Manual,
            AiMode::Off => AiStateKind::Off,
        };
        self.state_machine.force_state(state, "respawned")
    }

    pub fn set_player(&mut self, player: Actor) {
        self.world.set_player(player);
    }

    pub fn upsert_actor(&mut self, actor: Actor) -> bool {
        self.world.upsert_actor(actor)
    }

    pub fn remove_actor(&mut self, id: ActorId) -> Option<Actor> {
        self.world.remove_actor(id)
    }

    pub fn actor_died(&mut self, id: ActorId) -> bool {
        self.world.mark_dead(id)
    }

    /// Change one behaviour switch; takes effect on the next tick
    pub fn set_config(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.config.set(key, value);
    }

    pub fn config(&self) -> &BehaviorConfig {
        &self.config
    }

    pub fn world(&self) -> &WorldSnapshot {
        &self.world
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn mode(&self) -> AiMode {
        self.mode
    }

    pub fn current_state(&self) -> AiStateKind {
        self.state_machine.current_state()
    }

    pub fn target(&self) -> Option<ActorId> {
        self.state_machine.context().target
    }

    pub fn state_machine(&self) -> &StateMachine {
        &self.state_machine
    }

    pub fn state_machine_mut(&mut self) -> &mut StateMachine {
        &mut self.state_machine
    }

    pub fn queue(&self) -> &ActionQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut ActionQueue {
        &mut self.queue
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn status(&self) -> AiStatus {
        AiStatus {
            enabled: self.enabled,
            mode: self.mode,
            state: self.state_machine.current_state(),
            state_duration: self.state_machine.state_duration(),
            target: self.target(),
            queue: self.queue.status(),
            state_machine: self.state_machine.summary(),
        }
    }
}

impl std::fmt::Debug for AiController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiController")
            .field("enabled", &self.enabled)
            .field("mode", &self.mode)
            .field("state", &self.state_machine.current_state())
            .field("queue", &self.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::ActionKind;
    use crate::effector::MockEffector;
    use rokore_common::{ActorStats, Position};

    fn settings() -> AiSettings {
        AiSettings {
            state_update_interval_ms: 0,
            ..AiSettings::default()
        }
    }

    fn hero(hp: i32) -> Actor {
        let mut stats = ActorStats::new(100, 100);
        stats.hp = hp;
        Actor::player(1, "Hero", Position::new(50, 50)).with_stats(stats)
    }

    fn controller(effector: MockEffector) -> AiController {
        let mut controller = AiController::from_settings(
            &settings(),
            BehaviorConfig::new(),
            Box::new(effector),
            EventBus::new(),
        );
        controller.set_player(hero(100));
        controller
    }

    fn accepting_effector() -> MockEffector {
        let mut effector = MockEffector::new();
        effector.expect_is_connected().return_const(true);
        effector.expect_send_action().returning(|_| Ok(true));
        effector
    }

    #[test]
    fn test_stopped_controller_does_nothing() {
        let mut effector = MockEffector::new();
        effector.expect_is_connected().never();
        effector.expect_send_action().never();
        let mut controller = controller(effector);

        controller.tick().unwrap();
        assert_eq!(controller.current_state(), AiStateKind::Off);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_enters_auto() {
        let mut controller = controller(accepting_effector());
        controller.start().unwrap();
        assert_eq!(controller.start(), Err(AiError::AlreadyRunning));

        controller.tick().unwrap();
        assert_eq!(controller.current_state(), AiStateKind::Auto);
        assert!(controller.status().enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_fatal() {
        let mut effector = MockEffector::new();
        effector.expect_is_connected().return_const(false);
        let mut controller = controller(effector);
        controller.start().unwrap();
        assert_eq!(controller.tick(), Err(AiError::Disconnected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_engage_and_attack() {
        let mut effector = MockEffector::new();
        effector.expect_is_connected().return_const(true);
        effector
            .expect_send_action()
            .withf(|kind| matches!(kind, ActionKind::Attack { .. }))
            .returning(|_| Ok(false));
        let mut controller = controller(effector);
        controller.upsert_actor(
            Actor::monster(10, "Poring", Position::new(51, 50)).with_stats(ActorStats::new(50, 0)),
        );
        controller.start().unwrap();

        controller.tick().unwrap();
        assert_eq!(controller.current_state(), AiStateKind::Auto);
        controller.tick().unwrap();
        assert_eq!(controller.current_state(), AiStateKind::Combat);
        assert_eq!(controller.target(), Some(ActorId(10)));

        controller.tick().unwrap();
        controller.tick().unwrap();
        let running = controller.queue().executing().map(|a| a.kind.clone());
        assert_eq!(running, Some(ActionKind::Attack { target: ActorId(10) }));
        // Repeated planning does not pile up duplicates
        assert!(controller.queue().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_death_and_respawn() {
        let mut controller = controller(accepting_effector());
        controller.start().unwrap();
        controller.tick().unwrap();

        controller.actor_died(ActorId(1));
        controller.tick().unwrap();
        assert_eq!(controller.current_state(), AiStateKind::Dead);

        controller.tick().unwrap();
        assert_eq!(controller.current_state(), AiStateKind::Dead);
        assert!(controller.queue().is_empty());

        controller.set_player(hero(60));
        assert!(controller.respawn());
        assert_eq!(controller.current_state(), AiStateKind::Auto);
        assert!(!controller.respawn());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_and_disable() {
        let mut controller = controller(accepting_effector());
        controller.start().unwrap();
        controller.tick().unwrap();

        controller.enable_manual();
        controller.tick().unwrap();
        assert_eq!(controller.current_state(), AiStateKind::Manual);

        controller.disable();
        controller.tick().unwrap();
        assert_eq!(controller.current_state(), AiStateKind::Off);

        controller.enable_auto();
        controller.tick().unwrap();
        assert_eq!(controller.current_state(), AiStateKind::Auto);
        assert_eq!(controller.state_machine().forced_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_context_mirroring() {
        let task_context = Arc::new(TaskContext::new());
        let mut controller =
            controller(accepting_effector()).with_task_context(Arc::clone(&task_context));
        controller.start().unwrap();
        controller.tick().unwrap();

        assert_eq!(task_context.player().map(|p| p.name), Some("Hero".to_string()));
        assert_eq!(task_context.game_state("ai_state"), Some(Value::from("auto")));
    }
}
