//! Configuration management for the Redoom ledger node
//!
//! Values come from `config.toml` when present, then environment overrides
//! (`SECRET_KEY`, `REDOOM_DB_PATH`, `PORT`, `REDOOM_DIFFICULTY`).

use crate::error::{LedgerError, Result};
use crate::miner::MAX_DIFFICULTY;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_difficulty")]
    pub difficulty: u32,
    /// Upper bound on a single append; unbounded when absent.
    #[serde(default)]
    pub mining_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub secret_key: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            difficulty: default_difficulty(),
            mining_timeout_secs: None,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl LedgerConfig {
    pub fn mining_timeout(&self) -> Option<Duration> {
        self.mining_timeout_secs.map(Duration::from_secs)
    }
}

impl Config {
    pub fn from_toml(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Apply overrides from an environment lookup function.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secret) = lookup("SECRET_KEY") {
            self.auth.secret_key = secret;
        }
        if let Some(path) = lookup("REDOOM_DB_PATH") {
            self.database.path = path;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| LedgerError::ConfigError(format!("PORT must be a port number: {}", e)))?;
        }
        if let Some(difficulty) = lookup("REDOOM_DIFFICULTY") {
            self.ledger.difficulty = difficulty.parse().map_err(|e| {
                LedgerError::ConfigError(format!("REDOOM_DIFFICULTY must be an integer: {}", e))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.path.is_empty() {
            return Err(LedgerError::ConfigError("database.path must be set".to_string()));
        }
        if self.ledger.difficulty > MAX_DIFFICULTY {
            return Err(LedgerError::DifficultyOutOfRange(self.ledger.difficulty));
        }
        Ok(())
    }

    /// The HTTP service refuses to run without a shared secret.
    pub fn require_secret(&self) -> Result<()> {
        if self.auth.secret_key.is_empty() {
            return Err(LedgerError::ConfigError(
                "auth.secret_key must be set in config.toml or SECRET_KEY".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load `path` (defaults when missing), apply environment overrides, validate.
pub fn load_config_from(path: impl AsRef<Path>) -> Result<Config> {
    let config_str = fs::read_to_string(path).unwrap_or_default();
    let mut config = if config_str.trim().is_empty() {
        Config::default()
    } else {
        Config::from_toml(&config_str)?
    };
    config.apply_env(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

/// Configuration for the node: [`load_config_from`] on `config.toml` plus a
/// mandatory secret key.
pub fn load_config() -> Result<Config> {
    let config = load_config_from(DEFAULT_CONFIG_PATH)?;
    config.require_secret()?;
    Ok(config)
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_difficulty() -> u32 {
    1
}

fn default_db_path() -> String {
    "./data/redoom.db".to_string()
}
