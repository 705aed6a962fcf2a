use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::platform::DEFAULT_PLATFORM;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_server_config")]
    pub server: ServerConfig,
    #[serde(default = "default_memory_config")]
    pub memory: MemoryConfig,
    #[serde(default = "default_turn_config")]
    pub turn: TurnConfig,
    #[serde(default = "default_locks_config")]
    pub locks: LocksConfig,
    #[serde(default)]
    pub bots: Vec<BotConfig>,
    #[serde(default)]
    pub instances: Vec<InstanceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MemoryConfig {
    #[serde(default = "default_db_path")]
    pub database_path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TurnConfig {
    /// Upper bound on a single `handle_update` call. The instance lock is
    /// held for the whole call, so this also bounds how long one owner can
    /// block the next turn.
    #[serde(default = "default_handler_timeout_secs")]
    pub handler_timeout_secs: u64,
    /// Platform codename used to resolve bots for turns arriving over the API.
    #[serde(default = "default_platform")]
    pub platform: String,
}

impl TurnConfig {
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.handler_timeout_secs)
    }
}

impl Default for TurnConfig {
    fn default() -> Self {
        default_turn_config()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LocksConfig {
    /// Cron expression (with seconds) for reclaiming idle lock-table entries.
    #[serde(default = "default_prune_schedule")]
    pub prune_schedule: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BotConfig {
    pub codename: String,
    /// Built-in behavior, e.g. "echo" or "silent".
    pub kind: String,
    #[serde(default = "default_bot_platforms")]
    pub platforms: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InstanceConfig {
    pub id: i64,
    pub bot: String,
    pub username: String,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("dialogbot.db")
}

fn default_handler_timeout_secs() -> u64 {
    60
}

fn default_platform() -> String {
    DEFAULT_PLATFORM.to_string()
}

fn default_prune_schedule() -> String {
    "0 */15 * * * *".to_string()
}

fn default_bot_platforms() -> Vec<String> {
    vec![default_platform()]
}

fn default_server_config() -> ServerConfig {
    ServerConfig {
        bind: default_bind(),
    }
}

fn default_memory_config() -> MemoryConfig {
    MemoryConfig {
        database_path: default_db_path(),
    }
}

fn default_turn_config() -> TurnConfig {
    TurnConfig {
        handler_timeout_secs: default_handler_timeout_secs(),
        platform: default_platform(),
    }
}

fn default_locks_config() -> LocksConfig {
    LocksConfig {
        prune_schedule: default_prune_schedule(),
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let mut codenames = HashSet::new();
        for bot in &self.bots {
            if !codenames.insert(bot.codename.as_str()) {
                anyhow::bail!("Duplicate bot codename in config: {}", bot.codename);
            }
            if bot.platforms.is_empty() {
                anyhow::bail!("Bot '{}' has no platforms configured", bot.codename);
            }
        }

        let mut instance_ids = HashSet::new();
        for instance in &self.instances {
            if !instance_ids.insert(instance.id) {
                anyhow::bail!("Duplicate instance id in config: {}", instance.id);
            }
            if !codenames.contains(instance.bot.as_str()) {
                anyhow::bail!(
                    "Instance {} refers to unknown bot '{}'",
                    instance.id,
                    instance.bot
                );
            }
        }

        if self.turn.handler_timeout_secs == 0 {
            anyhow::bail!("turn.handler_timeout_secs must be greater than zero");
        }

        Ok(())
    }
}
