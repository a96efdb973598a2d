//! Configuration management
//!
//! Loads configuration from config.toml with support for:
//! - Server binding settings
//! - Optional SQLite database path (in-memory when absent)
//! - Registry admins and winner-list policy
//! - Seed balances for the bundled ledger

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::lock::DEFAULT_LOCK_STRIPES;
use crate::types::Amount;

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

/// Main configuration structure matching config.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file; registry lives in memory when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// How `set_winners` treats oversized lists, duplicates and re-ranking
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WinnerPolicy {
    /// Reject lists longer than the token limit, duplicate principals and
    /// rank changes for principals who already claimed
    #[default]
    Strict,
    /// Accept any list; a later duplicate overwrites an earlier rank
    LastWriteWins,
}

/// Registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Principals allowed to set winners and claim on behalf of others
    #[serde(default)]
    pub admins: Vec<String>,
    /// Treat each bounty's issuer as an admin of that bounty
    #[serde(default)]
    pub issuer_is_admin: bool,
    #[serde(default)]
    pub winner_policy: WinnerPolicy,
    #[serde(default = "default_lock_stripes")]
    pub lock_stripes: usize,
}

fn default_lock_stripes() -> usize {
    DEFAULT_LOCK_STRIPES
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            admins: Vec::new(),
            issuer_is_admin: false,
            winner_policy: WinnerPolicy::default(),
            lock_stripes: DEFAULT_LOCK_STRIPES,
        }
    }
}

/// Bundled ledger configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub accounts: Vec<AccountSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSeed {
    pub principal: String,
    pub balance: Amount,
}

impl Config {
    /// Load from config.toml or use defaults
    pub fn load() -> Result<Self> {
        Self::load_from("config.toml")
    }

    /// Load from specific path
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let mut config: Self = if path.exists() {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")?
        } else {
            // Use embedded default config
            toml::from_str(DEFAULT_CONFIG).context("Failed to parse default config")?
        };
        config.apply_env();
        Ok(config)
    }

    /// Environment variables take precedence over file values
    fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("BOUNTY_HOST") {
            if !host.is_empty() {
                self.server.host = host;
            }
        }
        if let Some(port) = std::env::var("BOUNTY_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
        {
            self.server.port = port;
        }
        if let Ok(path) = std::env::var("BOUNTY_DATABASE") {
            if !path.is_empty() {
                self.database.path = Some(PathBuf::from(path));
            }
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        // The embedded default config is validated by tests,
        // so this should never fail. Using a fallback for robustness.
        toml::from_str(DEFAULT_CONFIG).unwrap_or_else(|_| Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            database: DatabaseConfig::default(),
            registry: RegistryConfig::default(),
            ledger: LedgerConfig::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses() {
        let config: Config = toml::from_str(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.registry.winner_policy, WinnerPolicy::Strict);
        assert!(config.database.path.is_none());
        assert!(!config.registry.admins.is_empty());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            host = "127.0.0.1"
            port = 9000

            [registry]
            admins = ["owner"]
            winner_policy = "last_write_wins"
            "#,
        )
        .unwrap();
        assert_eq!(config.registry.winner_policy, WinnerPolicy::LastWriteWins);
        assert_eq!(config.registry.lock_stripes, DEFAULT_LOCK_STRIPES);
        assert!(config.ledger.accounts.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            [server]
            host = "127.0.0.1"
            port = 7000

            [database]
            path = "registry.db"

            [[ledger.accounts]]
            principal = "issuer"
            balance = 1000
            "#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.database.path, Some(PathBuf::from("registry.db")));
        assert_eq!(config.ledger.accounts[0].balance, 1000);
    }
}
