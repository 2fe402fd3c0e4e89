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

//! Polling finite state machine driving the AI mode
//!
//! The machine holds one current [`AiStateKind`] and a table of
//! [`AiTransition`]s. Each [`StateMachine::update`] evaluates the transitions
//! leaving the current state, highest priority first, and fires at most one.

use super::condition::AiTransition;
use super::context::AiContext;
use super::state::{AiState, AiStateKind, StateStats};
use crate::events::{BotEvent, EventBus};
use crate::priority::insertion_index;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

/// Default minimum time between two evaluations
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_millis(100);

/// Default number of past states remembered
pub const DEFAULT_MAX_HISTORY: usize = 100;

/// Read-only overview of the machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMachineSummary {
    pub current_state: AiStateKind,
    pub state_duration: Duration,
    pub total_transitions: u64,
    pub forced_transitions: u64,
    pub states_count: usize,
    pub most_used_state: Option<AiStateKind>,
    pub uptime: Duration,
    pub transitions_registered: usize,
}

pub struct StateMachine {
    current: AiState,
    previous: Option<AiStateKind>,
    transitions: HashMap<AiStateKind, Vec<AiTransition>>,
    history: VecDeque<AiState>,
    max_history: usize,
    stats: BTreeMap<AiStateKind, StateStats>,
    context: AiContext,
    update_interval: Duration,
    last_update: Option<Instant>,
    transition_count: u64,
    forced_count: u64,
    created_at: Instant,
    events: Option<EventBus>,
}

impl StateMachine {
    /// Create a new state machine in the OFF state
    pub fn new() -> Self {
        let initial = AiState::new(AiStateKind::Off, 1);
        let mut stats = BTreeMap::new();
        stats.insert(
            AiStateKind::Off,
            StateStats {
                entry_count: 1,
                last_entered: Some(initial.entered_at),
                ..StateStats::default()
            },
        );

        Self {
            current: initial,
            previous: None,
            transitions: HashMap::new(),
            history: VecDeque::from([initial]),
            max_history: DEFAULT_MAX_HISTORY,
            stats,
            context: AiContext::new(),
            update_interval: DEFAULT_UPDATE_INTERVAL,
            last_update: None,
            transition_count: 0,
            forced_count: 0,
            created_at: initial.entered_at,
            events: None,
        }
    }

    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history.max(1);
        self.trim_history();
        self
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_context(mut self, context: AiContext) -> Self {
        self.context = context;
        self
    }

    /// Register a transition
    ///
    /// Transitions leaving the same state are kept sorted by descending
    /// priority; equal priorities keep registration order.
    pub fn add_transition(&mut self, transition: AiTransition) {
        let list = self.transitions.entry(transition.from).or_default();
        let index = insertion_index(list, transition.priority, |t| t.priority);
        list.insert(index, transition);
    }

    /// Register several transitions
    pub fn add_transitions(&mut self, transitions: impl IntoIterator<Item = AiTransition>) {
        for transition in transitions {
            self.add_transition(transition);
        }
    }

    /// Evaluate the transitions leaving the current state
    ///
    /// Returns false without side effects when called again before the update
    /// interval elapsed. Otherwise fires the first satisfied transition and
    /// returns true, or returns false when none is satisfied.
    pub fn update(&mut self) -> bool {
        let now = Instant::now();
        if let Some(last) = self.last_update {
            if now.duration_since(last) < self.update_interval {
                return false;
            }
        }
        self.last_update = Some(now);

        let from = self.current.state;
        let Some(list) = self.transitions.get_mut(&from) else {
            return false;
        };
        let Some(transition) = list
            .iter_mut()
            .find(|t| t.can_transition(from, &self.context))
        else {
            return false;
        };

        transition.trigger_count += 1;
        let to = transition.to;
        let reason = transition.condition.name.clone();
        transition.run_action(&mut self.context);

        tracing::debug!("Transition {} -> {} ({})", from, to, reason);
        self.change_state(to, false, &reason)
    }

    /// Switch state without consulting any transition
    ///
    /// Statistics and history are updated as for a normal transition, but the
    /// entry does not count as a transition. Forcing the current state is a
    /// no-op and returns false.
    pub fn force_state(&mut self, state: AiStateKind, reason: &str) -> bool {
        tracing::info!("Forcing AI state {} -> {} ({})", self.current.state, state, reason);
        self.change_state(state, true, reason)
    }

    fn change_state(&mut self, state: AiStateKind, forced: bool, reason: &str) -> bool {
        let old = self.current.state;
        if old == state {
            return false;
        }

        let now = Instant::now();
        let old_stats = self.stats.entry(old).or_default();
        old_stats.total_time += now.duration_since(self.current.entered_at);

        let new_stats = self.stats.entry(state).or_default();
        new_stats.entry_count += 1;
        new_stats.last_entered = Some(now);
        if forced {
            self.forced_count += 1;
        } else {
            new_stats.transition_count += 1;
            self.transition_count += 1;
        }

        self.previous = Some(old);
        self.current = AiState {
            state,
            entered_at: now,
            entry_count: new_stats.entry_count,
        };
        self.history.push_back(self.current);
        self.trim_history();

        tracing::info!("AI state changed: {} -> {}", old, state);
        metrics::counter!("rokore.ai.state_changes", "state" => state.as_str()).increment(1);
        if let Some(events) = &self.events {
            events.publish(BotEvent::AiStateChanged {
                old,
                new: state,
                forced,
                reason: reason.to_string(),
            });
        }
        true
    }

    fn trim_history(&mut self) {
        while self.history.len() > self.max_history {
            self.history.pop_front();
        }
    }

    pub fn current_state(&self) -> AiStateKind {
        self.current.state
    }

    pub fn current(&self) -> &AiState {
        &self.current
    }

    pub fn previous_state(&self) -> Option<AiStateKind> {
        self.previous
    }

    /// Time spent in the current state
    pub fn state_duration(&self) -> Duration {
        self.current.duration()
    }

    pub fn is_in_state(&self, state: AiStateKind) -> bool {
        self.current.state == state
    }

    /// Check if `state` appears among the last `last_n` history entries
    pub fn was_in_state(&self, state: AiStateKind, last_n: usize) -> bool {
        self.history
            .iter()
            .rev()
            .take(last_n)
            .any(|entry| entry.state == state)
    }

    /// Past states, oldest first; the last entry is the current state
    pub fn history(&self) -> impl Iterator<Item = &AiState> {
        self.history.iter()
    }

    /// Check if a registered transition to `state` is satisfied right now
    pub fn can_transition_to(&self, state: AiStateKind) -> bool {
        let from = self.current.state;
        self.transitions.get(&from).is_some_and(|list| {
            list.iter()
                .any(|t| t.to == state && t.can_transition(from, &self.context))
        })
    }

    /// States reachable through a satisfied transition, in priority order
    pub fn possible_transitions(&self) -> Vec<AiStateKind> {
        let from = self.current.state;
        self.transitions
            .get(&from)
            .map(|list| {
                list.iter()
                    .filter(|t| t.can_transition(from, &self.context))
                    .map(|t| t.to)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Transitions registered from a state, highest priority first
    pub fn transitions_from(&self, state: AiStateKind) -> &[AiTransition] {
        self.transitions
            .get(&state)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Statistics per state, including the time spent in the open current stay
    pub fn state_stats(&self) -> BTreeMap<AiStateKind, StateStats> {
        let mut stats = self.stats.clone();
        stats.entry(self.current.state).or_default().total_time += self.current.duration();
        stats
    }

    /// Transitions fired by rules, forced changes excluded
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// State changes made through [`StateMachine::force_state`]
    pub fn forced_count(&self) -> u64 {
        self.forced_count
    }

    pub fn uptime(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn summary(&self) -> StateMachineSummary {
        let most_used_state = self
            .stats
            .iter()
            .max_by_key(|(_, s)| s.entry_count)
            .map(|(state, _)| *state);

        StateMachineSummary {
            current_state: self.current.state,
            state_duration: self.current.duration(),
            total_transitions: self.transition_count,
            forced_transitions: self.forced_count,
            states_count: self.stats.len(),
            most_used_state,
            uptime: self.uptime(),
            transitions_registered: self.transitions.values().map(Vec::len).sum(),
        }
    }

    pub fn context(&self) -> &AiContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut AiContext {
        &mut self.context
    }

    /// Apply a change to the context
    pub fn update_context(&mut self, f: impl FnOnce(&mut AiContext)) {
        f(&mut self.context);
        self.context.updated_at = Instant::now();
    }

    /// Return to OFF and forget history and statistics
    ///
    /// Registered transitions and the context are kept.
    pub fn reset(&mut self) {
        let initial = AiState::new(AiStateKind::Off, 1);
        self.current = initial;
        self.previous = None;
        self.history.clear();
        self.history.push_back(initial);
        self.stats.clear();
        self.stats.insert(
            AiStateKind::Off,
            StateStats {
                entry_count: 1,
                last_entered: Some(initial.entered_at),
                ..StateStats::default()
            },
        );
        self.transition_count = 0;
        self.forced_count = 0;
        self.last_update = None;
        for transition in self.transitions.values_mut().flatten() {
            transition.trigger_count = 0;
        }
        tracing::info!("State machine reset");
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("current", &self.current.state)
            .field("previous", &self.previous)
            .field("transition_count", &self.transition_count)
            .field("forced_count", &self.forced_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::condition::{AiCondition, conditions};
    use crate::priority::Priority;

    fn always(name: &str) -> AiCondition {
        AiCondition::new(name, |_| true)
    }

    fn never(name: &str) -> AiCondition {
        AiCondition::new(name, |_| false)
    }

    fn machine() -> StateMachine {
        StateMachine::new().with_update_interval(Duration::ZERO)
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_is_throttled() {
        let mut sm = StateMachine::new();
        sm.add_transition(AiTransition::new(
            AiStateKind::Off,
            AiStateKind::Auto,
            never("never"),
            Priority::Normal,
        ));
        sm.add_transition(AiTransition::new(
            AiStateKind::Auto,
            AiStateKind::Combat,
            always("always"),
            Priority::Normal,
        ));

        assert!(!sm.update());
        assert_eq!(sm.transitions_from(AiStateKind::Off)[0].condition.check_count(), 1);

        // Within the interval nothing is evaluated at all
        assert!(!sm.update());
        assert_eq!(sm.transitions_from(AiStateKind::Off)[0].condition.check_count(), 1);

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(!sm.update());
        assert_eq!(sm.transitions_from(AiStateKind::Off)[0].condition.check_count(), 2);
    }

    #[test]
    fn test_highest_priority_transition_wins() {
        let mut sm = machine();
        sm.add_transition(AiTransition::new(
            AiStateKind::Off,
            AiStateKind::Manual,
            always("low"),
            Priority::Low,
        ));
        sm.add_transition(AiTransition::new(
            AiStateKind::Off,
            AiStateKind::Auto,
            always("high"),
            Priority::High,
        ));
        sm.add_transition(AiTransition::new(
            AiStateKind::Off,
            AiStateKind::Dead,
            always("high_later"),
            Priority::High,
        ));

        assert!(sm.update());
        assert_eq!(sm.current_state(), AiStateKind::Auto);
        assert_eq!(sm.previous_state(), Some(AiStateKind::Off));
        assert_eq!(sm.transition_count(), 1);
        assert_eq!(sm.transitions_from(AiStateKind::Off)[0].trigger_count, 1);
    }

    #[test]
    fn test_one_transition_per_update() {
        let mut sm = machine();
        sm.add_transition(AiTransition::new(
            AiStateKind::Off,
            AiStateKind::Auto,
            always("a"),
            Priority::Normal,
        ));
        sm.add_transition(AiTransition::new(
            AiStateKind::Auto,
            AiStateKind::Combat,
            always("b"),
            Priority::Normal,
        ));

        assert!(sm.update());
        assert_eq!(sm.current_state(), AiStateKind::Auto);
        assert!(sm.update());
        assert_eq!(sm.current_state(), AiStateKind::Combat);
        assert!(!sm.update());
    }

    #[test]
    fn test_force_state_bypasses_conditions() {
        let mut sm = machine();
        sm.add_transition(AiTransition::new(
            AiStateKind::Off,
            AiStateKind::Auto,
            never("never"),
            Priority::Normal,
        ));

        assert!(sm.force_state(AiStateKind::Healing, "test"));
        assert_eq!(sm.current_state(), AiStateKind::Healing);
        assert_eq!(sm.transition_count(), 0);
        assert_eq!(sm.forced_count(), 1);

        let stats = sm.state_stats();
        assert_eq!(stats[&AiStateKind::Healing].entry_count, 1);
        assert_eq!(stats[&AiStateKind::Healing].transition_count, 0);

        assert!(!sm.force_state(AiStateKind::Healing, "again"));
        assert_eq!(sm.forced_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_include_open_state() {
        let mut sm = machine();
        tokio::time::advance(Duration::from_secs(2)).await;
        sm.force_state(AiStateKind::Auto, "start");
        tokio::time::advance(Duration::from_secs(3)).await;

        let stats = sm.state_stats();
        assert_eq!(stats[&AiStateKind::Off].total_time, Duration::from_secs(2));
        assert_eq!(stats[&AiStateKind::Auto].total_time, Duration::from_secs(3));
        // The projection leaves the stored totals alone
        assert_eq!(sm.state_stats()[&AiStateKind::Auto].total_time, Duration::from_secs(3));
        assert_eq!(sm.state_duration(), Duration::from_secs(3));
    }

    #[test]
    fn test_history_is_bounded() {
        let mut sm = machine().with_max_history(3);
        for state in [
            AiStateKind::Auto,
            AiStateKind::Combat,
            AiStateKind::Auto,
            AiStateKind::Emergency,
        ] {
            sm.force_state(state, "test");
        }
        let states: Vec<_> = sm.history().map(|s| s.state).collect();
        assert_eq!(
            states,
            vec![AiStateKind::Combat, AiStateKind::Auto, AiStateKind::Emergency]
        );
        assert!(sm.was_in_state(AiStateKind::Combat, 3));
        assert!(!sm.was_in_state(AiStateKind::Combat, 2));
        assert!(!sm.was_in_state(AiStateKind::Off, 100));
    }

    #[test]
    fn test_possible_transitions_and_can_transition_to() {
        let mut sm = machine();
        sm.add_transition(AiTransition::new(
            AiStateKind::Off,
            AiStateKind::Manual,
            conditions::ai_manual(),
            Priority::High,
        ));
        sm.add_transition(AiTransition::new(
            AiStateKind::Off,
            AiStateKind::Auto,
            always("auto"),
            Priority::Normal,
        ));

        assert_eq!(sm.possible_transitions(), vec![AiStateKind::Auto]);
        assert!(sm.can_transition_to(AiStateKind::Auto));
        assert!(!sm.can_transition_to(AiStateKind::Manual));
        assert_eq!(sm.current_state(), AiStateKind::Off);
    }

    #[test]
    fn test_state_change_event() {
        let bus = EventBus::new();
        let mut sm = machine().with_event_bus(bus.clone());
        sm.add_transition(AiTransition::new(
            AiStateKind::Off,
            AiStateKind::Auto,
            always("go"),
            Priority::Normal,
        ));
        sm.update();
        sm.force_state(AiStateKind::Dead, "killed");
        assert_eq!(bus.queue_len(), 2);
    }

    #[test]
    fn test_summary_and_reset() {
        let mut sm = machine();
        sm.add_transition(AiTransition::new(
            AiStateKind::Off,
            AiStateKind::Auto,
            always("go"),
            Priority::Normal,
        ));
        sm.add_transition(AiTransition::new(
            AiStateKind::Auto,
            AiStateKind::Off,
            always("back"),
            Priority::Normal,
        ));
        for _ in 0..4 {
            sm.update();
        }

        let summary = sm.summary();
        assert_eq!(summary.current_state, AiStateKind::Off);
        assert_eq!(summary.total_transitions, 4);
        assert_eq!(summary.states_count, 2);
        assert_eq!(summary.transitions_registered, 2);
        assert_eq!(summary.most_used_state, Some(AiStateKind::Off));

        sm.reset();
        assert_eq!(sm.current_state(), AiStateKind::Off);
        assert_eq!(sm.transition_count(), 0);
        assert_eq!(sm.history().count(), 1);
        assert_eq!(sm.transitions_from(AiStateKind::Off)[0].trigger_count, 0);
    }

    #[test]
    fn test_transition_action_failure_does_not_block() {
        let mut sm = machine();
        sm.add_transition(
            AiTransition::new(
                AiStateKind::Off,
                AiStateKind::Auto,
                always("go"),
                Priority::Normal,
            )
            .with_action(|_| Err("hook failed".to_string())),
        );
        assert!(sm.update());
        assert_eq!(sm.current_state(), AiStateKind::Auto);
    }
}
