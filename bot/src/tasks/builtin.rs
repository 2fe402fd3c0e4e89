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

//! Ready-made task bodies

use super::context::TaskContext;
use super::task::{TaskBody, TaskControl, TaskResult};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

const DELAY_SLICE: Duration = Duration::from_millis(50);

/// Waits for a fixed duration
///
/// Sleeps in short slices so pause and cancel take effect between slices.
#[derive(Debug, Clone)]
pub struct DelayTask {
    duration: Duration,
}

impl DelayTask {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

#[async_trait]
impl TaskBody for DelayTask {
    async fn execute(&self, _context: &TaskContext, control: &TaskControl) -> TaskResult {
        let mut remaining = self.duration;
        while !remaining.is_zero() {
            let slice = remaining.min(DELAY_SLICE);
            if control.sleep(slice).await.is_err() {
                return TaskResult::cancelled();
            }
            remaining -= slice;
        }
        TaskResult::success(format!("Waited {:?}", self.duration))
    }

    fn estimated_duration(&self) -> Duration {
        self.duration
    }

    fn description(&self) -> String {
        format!("Wait {:?}", self.duration)
    }
}

/// Logs a one-line report of the shared context
#[derive(Debug, Clone, Default)]
pub struct StatusReportTask;

#[async_trait]
impl TaskBody for StatusReportTask {
    async fn execute(&self, context: &TaskContext, _control: &TaskControl) -> TaskResult {
        let snapshot = context.snapshot();
        let state = snapshot
            .game_state
            .get("ai_state")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        let mut result = TaskResult::success("Status reported").with_data("ai_state", state.clone());
        match &snapshot.player {
            Some(player) => {
                tracing::info!(
                    "Status: {} at {} HP {:.0}% SP {:.0}% AI {}",
                    player.name,
                    player.position,
                    player.stats.hp_percent(),
                    player.stats.sp_percent(),
                    state
                );
                result = result
                    .with_data("hp_percent", player.stats.hp_percent())
                    .with_data("sp_percent", player.stats.sp_percent());
            }
            None => tracing::info!("Status: no player, AI {}", state),
        }
        if let Some(target) = &snapshot.target {
            result = result.with_data("target", target.name.clone());
        }
        result
    }

    fn estimated_duration(&self) -> Duration {
        Duration::from_millis(10)
    }

    fn description(&self) -> String {
        "Report player status".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{Task, TaskStatus};
    use rokore_common::{Actor, ActorStats, Position};
    use std::sync::Arc;
    use tracing_test::traced_test;

    #[tokio::test(start_paused = true)]
    async fn test_delay_task_waits() {
        let task = Task::new("delay", DelayTask::new(Duration::from_millis(120)));
        let result = task.run(Arc::new(TaskContext::new())).await;
        assert!(result.is_success());
        assert!(task.elapsed() >= Duration::from_millis(120));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_task_cancel() {
        let task = Task::new("delay", DelayTask::new(Duration::from_secs(60)));
        let runner = task.clone();
        let handle = tokio::spawn(async move { runner.run(Arc::new(TaskContext::new())).await });
        tokio::time::sleep(Duration::from_millis(75)).await;
        task.cancel().unwrap();
        assert_eq!(handle.await.unwrap().status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_status_report() {
        let context = Arc::new(TaskContext::new());
        context.set_player(Some(
            Actor::player(1, "Hero", Position::new(5, 6)).with_stats(ActorStats::new(100, 40)),
        ));
        context.set_game_state("ai_state", "auto");

        let result = Task::new("report", StatusReportTask).run(context).await;
        assert!(result.is_success());
        assert_eq!(result.data.get("ai_state"), Some(&Value::from("auto")));
        assert!(logs_contain("Status: Hero"));
    }
}
