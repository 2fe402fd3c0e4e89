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
use serde::{Deserialize, Serialize};
use serde_env_field::EnvField;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Error raised while loading the configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to open config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Arguments {
    #[arg(
        short = 'c',
        long = "config",
        help = "Path to configuration file",
        default_value = "bot/config.yaml"
    )]
    pub config_file: String,

    #[arg(
        short = 'e',
        long = "env",
        help = "Path to environment file",
        default_value = "bot/.env"
    )]
    pub env_file: Option<String>,
}

impl Default for Arguments {
    fn default() -> Self {
        Self {
            config_file: "config.yaml".to_string(),
            env_file: Some(".env".to_string()),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub identity: IdentityConfig,
    pub ai: AiSettings,
    pub tasks: TaskSettings,
    pub behavior: BehaviorConfig,
}

impl Configuration {
    pub fn load(path: &str) -> Result<Configuration, ConfigError> {
        let conf = serde_yaml::from_reader(std::fs::File::open(path)?)?;
        Ok(conf)
    }
}

/// Who the bot plays as
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub character: EnvField<String>,
    /// Login server name, only used for log output
    pub master: EnvField<String>,
}

/// AI manager tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiSettings {
    pub tick_interval_ms: u64,
    pub state_update_interval_ms: u64,
    pub max_queue_size: usize,
    pub max_action_history: usize,
    pub max_state_history: usize,
    pub auto_retry: bool,
}

impl AiSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn state_update_interval(&self) -> Duration {
        Duration::from_millis(self.state_update_interval_ms)
    }
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 50,
            state_update_interval_ms: 100,
            max_queue_size: 100,
            max_action_history: 50,
            max_state_history: 100,
            auto_retry: true,
        }
    }
}

/// Task manager tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSettings {
    pub max_concurrent_tasks: usize,
    pub max_queue_size: usize,
    pub max_history: usize,
    pub cycle_interval_ms: u64,
}

impl TaskSettings {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_interval_ms)
    }
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 5,
            max_queue_size: 100,
            max_history: 100,
            cycle_interval_ms: 100,
        }
    }
}

/// Flat key to value behaviour switches read by the AI every tick
///
/// Values are stored as loosely typed JSON values and coerced when read, so
/// `attackAuto: 1`, `attackAuto: "on"` and `attackAuto: true` all mean the
/// same thing. Keys missing from the file fall back to built-in defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BehaviorConfig {
    values: BTreeMap<String, Value>,
}

impl BehaviorConfig {
    pub const ATTACK_AUTO: &'static str = "attackAuto";
    pub const ATTACK_DISTANCE: &'static str = "attackDistance";
    pub const FOLLOW_TARGET: &'static str = "followTarget";
    pub const AUTO_LOOT: &'static str = "autoLoot";
    pub const LOOT_DISTANCE: &'static str = "lootDistance";
    pub const SIT_AUTO: &'static str = "sitAuto";
    pub const SIT_HP_PERCENT: &'static str = "sitHpPercent";
    pub const SIT_SP_PERCENT: &'static str = "sitSpPercent";
    pub const HEAL_AUTO: &'static str = "healAuto";
    pub const HEAL_HP_PERCENT: &'static str = "healHpPercent";
    pub const RECOVER_SP_PERCENT: &'static str = "recoverSpPercent";
    pub const SKILLS_AUTO: &'static str = "skillsAuto";
    pub const AVOID_PLAYERS: &'static str = "avoidPlayers";
    pub const TELEPORT_AUTO: &'static str = "teleportAuto";
    pub const EMERGENCY_HP_PERCENT: &'static str = "emergencyHpPercent";
    pub const SAFE_DISTANCE: &'static str = "safeDistance";
    pub const RECOVER_HP_PERCENT: &'static str = "recoverHpPercent";
    pub const RECOVER_SP_PERCENT_EXIT: &'static str = "recoverSpPercentExit";
    pub const RETREAT_DISTANCE: &'static str = "retreatDistance";
    pub const HEAL_ITEM_ID: &'static str = "healItemId";
    pub const SP_ITEM_ID: &'static str = "spItemId";
    pub const STORAGE_AUTO: &'static str = "storageAuto";
    pub const BUY_AUTO: &'static str = "buyAuto";
    pub const SELL_AUTO: &'static str = "sellAuto";

    /// Create a configuration holding only the built-in defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in default for a key
    pub fn default_value(key: &str) -> Option<Value> {
        let value = match key {
            Self::ATTACK_AUTO => Value::from(true),
            Self::ATTACK_DISTANCE => Value::from(1),
            Self::FOLLOW_TARGET => Value::from(false),
            Self::AUTO_LOOT => Value::from(true),
            Self::LOOT_DISTANCE => Value::from(2),
            Self::SIT_AUTO => Value::from(true),
            Self::SIT_HP_PERCENT => Value::from(90),
            Self::SIT_SP_PERCENT => Value::from(90),
            Self::HEAL_AUTO => Value::from(true),
            Self::HEAL_HP_PERCENT => Value::from(50),
            Self::RECOVER_SP_PERCENT => Value::from(30),
            Self::SKILLS_AUTO => Value::from(true),
            Self::AVOID_PLAYERS => Value::from(false),
            Self::TELEPORT_AUTO => Value::from(true),
            Self::EMERGENCY_HP_PERCENT => Value::from(20),
            Self::SAFE_DISTANCE => Value::from(5),
            Self::RECOVER_HP_PERCENT => Value::from(80),
            Self::RECOVER_SP_PERCENT_EXIT => Value::from(50),
            Self::RETREAT_DISTANCE => Value::from(7),
            Self::HEAL_ITEM_ID => Value::from(501),
            Self::SP_ITEM_ID => Value::from(505),
            Self::STORAGE_AUTO => Value::from(false),
            Self::BUY_AUTO => Value::from(false),
            Self::SELL_AUTO => Value::from(false),
            _ => return None,
        };
        Some(value)
    }

    /// Set a key, replacing any previous value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Builder form of [`BehaviorConfig::set`]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Raw value of a key, falling back to its built-in default
    pub fn get(&self, key: &str) -> Option<Value> {
        self.values
            .get(key)
            .cloned()
            .or_else(|| Self::default_value(key))
    }

    /// Read a key as a boolean; unparseable values yield `default`
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(|v| coerce_bool(&v)).unwrap_or(default)
    }

    /// Read a key as a number; unparseable values yield `default`
    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        self.get(key).and_then(|v| coerce_f64(&v)).unwrap_or(default)
    }

    /// Read a key as an unsigned integer; negative or unparseable values yield `default`
    pub fn get_u32(&self, key: &str, default: u32) -> u32 {
        self.get(key)
            .and_then(|v| coerce_f64(&v))
            .filter(|n| *n >= 0.0 && *n <= u32::MAX as f64)
            .map(|n| n as u32)
            .unwrap_or(default)
    }

    /// Read a key as a string
    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) => Some(s),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Keys explicitly set, without defaults
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            values: BTreeMap::new(),
        }
    }
}

fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|n| n != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Some(true),
            "false" | "no" | "off" | "0" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn test_arguments_default() {
        let args = Arguments::default();
        assert_eq!(args.config_file, "config.yaml");
        assert_eq!(args.env_file, Some(".env".to_string()));
    }

    #[test]
    fn test_settings_defaults() {
        let ai = AiSettings::default();
        assert_eq!(ai.tick_interval(), Duration::from_millis(50));
        assert_eq!(ai.state_update_interval(), Duration::from_millis(100));
        assert_eq!(ai.max_queue_size, 100);
        assert_eq!(ai.max_action_history, 50);

        let tasks = TaskSettings::default();
        assert_eq!(tasks.max_concurrent_tasks, 5);
        assert_eq!(tasks.max_history, 100);
    }

    #[test]
    fn test_behavior_defaults() {
        let behavior = BehaviorConfig::new();
        assert!(behavior.get_bool(BehaviorConfig::ATTACK_AUTO, false));
        assert_eq!(behavior.get_f64(BehaviorConfig::ATTACK_DISTANCE, 0.0), 1.0);
        assert!(!behavior.get_bool(BehaviorConfig::AVOID_PLAYERS, true));
        assert_eq!(behavior.get_u32(BehaviorConfig::HEAL_ITEM_ID, 0), 501);
        assert_eq!(behavior.get_f64("unknownKey", 3.5), 3.5);
    }

    #[test]
    fn test_behavior_coercion() {
        let behavior = BehaviorConfig::new()
            .with("attackAuto", 0)
            .with("sitAuto", "on")
            .with("attackDistance", "3")
            .with("teleportAuto", "maybe")
            .with("healItemId", -4);

        assert!(!behavior.get_bool("attackAuto", true));
        assert!(behavior.get_bool("sitAuto", false));
        assert_eq!(behavior.get_f64("attackDistance", 1.0), 3.0);
        assert!(behavior.get_bool("teleportAuto", true));
        assert_eq!(behavior.get_u32("healItemId", 7), 7);
        assert_eq!(behavior.get_string("attackDistance"), Some("3".to_string()));
    }

    #[test]
    fn test_load_partial_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "ai:\n  tick_interval_ms: 25\nbehavior:\n  attackAuto: false\n  attackDistance: 4\n"
        )
        .unwrap();

        let config = Configuration::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.ai.tick_interval_ms, 25);
        assert_eq!(config.ai.max_queue_size, 100);
        assert_eq!(config.tasks.max_concurrent_tasks, 5);
        assert!(!config.behavior.get_bool(BehaviorConfig::ATTACK_AUTO, true));
        assert_eq!(config.behavior.get_f64(BehaviorConfig::ATTACK_DISTANCE, 1.0), 4.0);
    }

    #[test]
    fn test_load_identity_from_env() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        unsafe {
            std::env::set_var("ROKORE_TEST_CHARACTER", "Acolyte");
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "identity:\n  character: \"${ROKORE_TEST_CHARACTER}\"\n").unwrap();

        let config = Configuration::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.identity.character.as_str(), "Acolyte");

        unsafe {
            std::env::remove_var("ROKORE_TEST_CHARACTER");
        }
    }

    #[test]
    fn test_load_missing_file() {
        let err = Configuration::load("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
        assert!(err.to_string().starts_with("Failed to open config file"));
    }
}
