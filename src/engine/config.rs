//! Rolegate Configuration Module
//! Handles loading and validating rolegate.config.json

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::engine::adapter::{StoreOptions, DEFAULT_ACCOUNT_TABLE, DEFAULT_USER_ROLES_TABLE};
use crate::engine::gate::DEFAULT_IDENTITY_HEADER;
use crate::engine::rbac::DEFAULT_SUPERADMIN_ROLE;

pub const CONFIG_FILE: &str = "rolegate.config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Invalid config format: {0}")]
    ParseError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub acl: AclConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AclConfig {
    #[serde(default = "default_account_table")]
    pub account_table: String,
    #[serde(default = "default_user_roles_table")]
    pub user_roles_table: String,
    #[serde(default)]
    pub account_role_column: Option<String>,
    #[serde(default = "default_superadmin_roles")]
    pub superadmin_roles: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default = "default_identity_header")]
    pub identity_header: String,
    /// Per-check deadline; none means checks run until the store answers
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    /// Expression guarding the mutating admin routes
    #[serde(default)]
    pub admin_expression: Option<String>,
}

fn default_pool_size() -> u32 {
    10
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_account_table() -> String {
    DEFAULT_ACCOUNT_TABLE.to_string()
}

fn default_user_roles_table() -> String {
    DEFAULT_USER_ROLES_TABLE.to_string()
}

fn default_superadmin_roles() -> Vec<String> {
    vec![DEFAULT_SUPERADMIN_ROLE.to_string()]
}

fn default_identity_header() -> String {
    DEFAULT_IDENTITY_HEADER.to_string()
}

fn default_port() -> u16 {
    54330
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

impl Default for AclConfig {
    fn default() -> Self {
        Self {
            account_table: default_account_table(),
            user_roles_table: default_user_roles_table(),
            account_role_column: None,
            superadmin_roles: default_superadmin_roles(),
        }
    }
}

impl AclConfig {
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            account_table: self.account_table.clone(),
            user_roles_table: self.user_roles_table.clone(),
            account_role_column: self.account_role_column.clone(),
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            identity_header: default_identity_header(),
            timeout_ms: None,
        }
    }
}

impl GateConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            admin_expression: None,
        }
    }
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Config {
    pub fn load(project_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = project_dir.join(CONFIG_FILE);
        if !config_path.exists() {
            return Err(ConfigError::NotFound(config_path));
        }
        let content = std::fs::read_to_string(&config_path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, project_dir: &Path) -> Result<(), ConfigError> {
        let config_path = project_dir.join(CONFIG_FILE);
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn default_for_project() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            database: DatabaseConfig {
                path: PathBuf::from("./data/rolegate.db"),
                pool_size: default_pool_size(),
                busy_timeout_ms: default_busy_timeout_ms(),
            },
            acl: AclConfig::default(),
            gate: GateConfig::default(),
            api: ApiConfig::default(),
        }
    }

    /// Database path resolved against the project directory
    pub fn database_path(&self, project_dir: &Path) -> PathBuf {
        project_dir.join(&self.database.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default_for_project();
        config.acl.account_table = "accounts".into();
        config.save(dir.path()).unwrap();

        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(loaded.acl.account_table, "accounts");
        assert_eq!(loaded.api.port, 54330);
    }

    #[test]
    fn test_missing_config() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(Config::load(dir.path()), Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_minimal_config_fills_defaults() {
        let config: Config = serde_json::from_str(
            r#"{ "version": "0.1.0", "database": { "path": "acl.db" } }"#,
        )
        .unwrap();
        assert_eq!(config.database.pool_size, 10);
        assert_eq!(config.acl.superadmin_roles, vec!["Superadmin"]);
        assert_eq!(config.gate.identity_header, "x-consumer-username");
        assert!(config.gate.timeout().is_none());
        assert_eq!(config.acl.store_options(), StoreOptions::default());
    }
}
