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

//! Async driver for the AI controller

use super::controller::{AiController, AiError, AiResult, AiStatus};
use super::state::AiStateKind;
use crate::config::{AiSettings, BehaviorConfig};
use crate::effector::Effector;
use crate::events::EventBus;
use crate::tasks::TaskContext;
use rokore_common::{Actor, ActorId};
use serde_json::Value;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

struct ManagerInner {
    controller: Mutex<AiController>,
    tick_interval: Duration,
    events: EventBus,
    loop_state: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl ManagerInner {
    fn controller(&self) -> MutexGuard<'_, AiController> {
        self.controller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Tick once, halting the controller on any error or panic
    fn tick(&self) -> AiResult<()> {
        let mut controller = self.controller();
        let outcome = catch_unwind(AssertUnwindSafe(|| controller.tick())).unwrap_or_else(|panic| {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(AiError::TickPanicked(message))
        });
        if let Err(error) = &outcome {
            controller.halt(error);
        }
        outcome
    }
}

/// Clonable handle running an [`AiController`] on a fixed interval
///
/// The loop ticks the controller and then delivers queued events. Any tick
/// error is fatal: the controller is halted and the loop idles until
/// [`AiManager::start`] is called again.
#[derive(Clone)]
pub struct AiManager {
    inner: Arc<ManagerInner>,
}

impl AiManager {
    pub fn new(controller: AiController, tick_interval: Duration) -> Self {
        let events = controller.events().clone();
        Self {
            inner: Arc::new(ManagerInner {
                controller: Mutex::new(controller),
                tick_interval,
                events,
                loop_state: Mutex::new(None),
            }),
        }
    }

    /// Build a manager and its controller from configuration
    pub fn from_settings(
        settings: &AiSettings,
        behavior: BehaviorConfig,
        effector: Box<dyn Effector>,
        events: EventBus,
        task_context: Option<Arc<TaskContext>>,
    ) -> Self {
        let mut controller = AiController::from_settings(settings, behavior, effector, events);
        if let Some(context) = task_context {
            controller = controller.with_task_context(context);
        }
        Self::new(controller, settings.tick_interval())
    }

    /// Enable the controller and spawn the tick loop
    pub fn start(&self) -> AiResult<()> {
        self.inner.controller().start()?;

        let mut loop_state = self.loop_state();
        if loop_state.is_some() {
            return Ok(());
        }

        let token = CancellationToken::new();
        let loop_token = token.clone();
        let weak = Arc::downgrade(&self.inner);
        let interval = self.inner.tick_interval;
        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = timer.tick() => {
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        let _ = inner.tick();
                        inner.events.process_events();
                    }
                }
            }
            tracing::debug!("AI loop exited");
        });
        *loop_state = Some((token, handle));

        tracing::info!("AI manager started (interval: {:?})", interval);
        Ok(())
    }

    /// Stop the AI and signal the loop to exit
    pub fn stop(&self) {
        self.stop_loop();
    }

    /// Stop and wait for the loop to exit
    pub async fn shutdown(&self) {
        if let Some(handle) = self.stop_loop() {
            if let Err(err) = handle.await {
                tracing::warn!("AI loop ended abnormally: {}", err);
            }
        }
    }

    fn stop_loop(&self) -> Option<JoinHandle<()>> {
        let state = self.loop_state().take();
        self.inner.controller().stop();
        self.inner.events.process_events();
        state.map(|(token, handle)| {
            token.cancel();
            handle
        })
    }

    /// Run one tick outside the loop
    pub fn tick(&self) -> AiResult<()> {
        self.inner.tick()
    }

    /// Run `f` with exclusive access to the controller
    pub fn with_controller<R>(&self, f: impl FnOnce(&mut AiController) -> R) -> R {
        f(&mut self.inner.controller())
    }

    pub fn is_running(&self) -> bool {
        self.inner.controller().is_enabled()
    }

    pub fn current_state(&self) -> AiStateKind {
        self.inner.controller().current_state()
    }

    pub fn status(&self) -> AiStatus {
        self.inner.controller().status()
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn enable_auto(&self) {
        self.inner.controller().enable_auto();
    }

    pub fn enable_manual(&self) {
        self.inner.controller().enable_manual();
    }

    pub fn disable(&self) {
        self.inner.controller().disable();
    }

    pub fn respawn(&self) -> bool {
        self.inner.controller().respawn()
    }

    pub fn set_player(&self, player: Actor) {
        self.inner.controller().set_player(player);
    }

    pub fn upsert_actor(&self, actor: Actor) -> bool {
        self.inner.controller().upsert_actor(actor)
    }

    pub fn remove_actor(&self, id: ActorId) -> Option<Actor> {
        self.inner.controller().remove_actor(id)
    }

    pub fn actor_died(&self, id: ActorId) -> bool {
        self.inner.controller().actor_died(id)
    }

    pub fn set_config(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner.controller().set_config(key, value);
    }

    fn loop_state(&self) -> MutexGuard<'_, Option<(CancellationToken, JoinHandle<()>)>> {
        self.inner
            .loop_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for AiManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiManager")
            .field("tick_interval", &self.inner.tick_interval)
            .field("controller", &*self.inner.controller())
            .finish()
    }
}
