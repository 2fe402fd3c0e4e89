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

use clap::Parser;
use rokore_bot::ai::AiManager;
use rokore_bot::config::{Arguments, Configuration};
use rokore_bot::effector::LoggingEffector;
use rokore_bot::events::EventBus;
use rokore_bot::priority::Priority;
use rokore_bot::tasks::{StatusReportTask, Task, TaskContext, TaskManager};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load arguments from the command line
    let arguments: Arguments = Parser::parse();

    // Initialize tracing/logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .with_ansi(true)
        .init();

    // Load environment variables from .env file if specified
    if let Some(ref env_file) = arguments.env_file {
        if std::path::Path::new(env_file).exists() {
            tracing::debug!("Loading environment variables from file: {}", env_file);
            dotenv::from_filename(env_file).ok();
        }
    } else {
        tracing::debug!("Loading environment variables from default file");
        dotenv::dotenv().ok();
    }

    // Load configuration from a file with environment variable substitution
    let config = match Configuration::load(&arguments.config_file) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Unable to load {}: {}", arguments.config_file, e);
            return Err(e.into());
        }
    };
    tracing::debug!("Configuration loaded: {:?}", config);
    tracing::info!(
        "Starting Rokore bot for {} on {}",
        config.identity.character.as_str(),
        config.identity.master.as_str()
    );

    let events = EventBus::new();
    events.subscribe(|event| tracing::trace!("Event: {}", event.name()));

    // Task manager and the context it shares with the AI
    let context = Arc::new(TaskContext::new());
    let tasks = TaskManager::with_context(&config.tasks, Arc::clone(&context), Some(events.clone()));
    tasks.start();

    // The AI runs against a logging effector until a connection layer is attached
    let ai = AiManager::from_settings(
        &config.ai,
        config.behavior.clone(),
        Box::new(LoggingEffector::new()),
        events.clone(),
        Some(context),
    );
    ai.start()?;

    let report = Task::new("status_report", StatusReportTask).with_priority(Priority::Background);
    if let Err(e) = tasks.schedule_task(report) {
        tracing::warn!("Could not schedule status report: {}", e);
    }

    tracing::info!("Rokore bot running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down...");
    ai.shutdown().await;
    match tasks.stop() {
        Ok(cancelled) => tracing::info!("Task manager stopped ({} tasks cancelled)", cancelled),
        Err(e) => tracing::warn!("Task manager was not running: {}", e),
    }
    events.process_events();
    Ok(())
}
