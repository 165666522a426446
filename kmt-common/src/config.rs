//! Configuration loading and resolution
//!
//! Every setting is resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! Steps 1 and 2 are collected by the binary (clap reads both) and handed over
//! as [`ConfigOverrides`]; this module merges them with the TOML file.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Secret used when nothing is configured. Tokens signed with it are only
/// fit for local development.
pub const DEV_AUTH_SECRET: &str = "dev-secret-change-me";

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
pub const DEFAULT_SESSION_DAYS: i64 = 7;
pub const MAX_SESSION_DAYS: i64 = 365;
pub const DEFAULT_BCRYPT_COST: u32 = 10;
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Configuration file contents. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub bind_addr: Option<String>,

    #[serde(default)]
    pub database_path: Option<PathBuf>,

    #[serde(default)]
    pub auth_secret: Option<String>,

    #[serde(default)]
    pub secure_cookies: Option<bool>,

    #[serde(default)]
    pub session_days: Option<i64>,

    #[serde(default)]
    pub bcrypt_cost: Option<u32>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging section of the TOML file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default)]
    pub level: Option<String>,
}

impl TomlConfig {
    /// Parse a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

/// Values coming from the command line or the environment
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_file: Option<PathBuf>,
    pub bind_addr: Option<String>,
    pub database_path: Option<PathBuf>,
    pub auth_secret: Option<String>,
    pub secure_cookies: Option<bool>,
    pub log_level: Option<String>,
}

/// Fully resolved service configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub database_path: PathBuf,
    pub auth_secret: String,
    pub secure_cookies: bool,
    pub session_days: i64,
    pub bcrypt_cost: u32,
    pub log_level: String,
}

impl ServerConfig {
    /// Resolve configuration: locate and read the TOML file, then merge
    pub fn resolve(overrides: ConfigOverrides) -> Result<Self> {
        let toml = match overrides.config_file.clone().or_else(default_config_file) {
            Some(path) if path.exists() => TomlConfig::load(&path)?,
            Some(path) => {
                if overrides.config_file.is_some() {
                    warn!("Config file {} not found, using defaults", path.display());
                }
                TomlConfig::default()
            }
            None => TomlConfig::default(),
        };
        Self::merge(overrides, toml)
    }

    /// Merge already-loaded sources by priority
    pub fn merge(overrides: ConfigOverrides, toml: TomlConfig) -> Result<Self> {
        let auth_secret = overrides
            .auth_secret
            .or(toml.auth_secret)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEV_AUTH_SECRET.to_string());

        let session_days = toml.session_days.unwrap_or(DEFAULT_SESSION_DAYS);
        if !(1..=MAX_SESSION_DAYS).contains(&session_days) {
            return Err(Error::Config(format!(
                "session_days must be within 1..=365, got {}",
                session_days
            )));
        }

        let bcrypt_cost = toml.bcrypt_cost.unwrap_or(DEFAULT_BCRYPT_COST);
        if !(4..=31).contains(&bcrypt_cost) {
            return Err(Error::Config(format!(
                "bcrypt_cost must be within 4..=31, got {}",
                bcrypt_cost
            )));
        }

        Ok(Self {
            bind_addr: overrides
                .bind_addr
                .or(toml.bind_addr)
                .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            database_path: overrides
                .database_path
                .or(toml.database_path)
                .unwrap_or_else(default_database_path),
            auth_secret,
            secure_cookies: overrides.secure_cookies.or(toml.secure_cookies).unwrap_or(false),
            session_days,
            bcrypt_cost,
            log_level: overrides
                .log_level
                .or(toml.logging.level)
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        })
    }

    /// True when tokens are signed with the development fallback secret
    pub fn uses_dev_secret(&self) -> bool {
        self.auth_secret == DEV_AUTH_SECRET
    }
}

/// `<config_dir>/kmt/config.toml`
fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("kmt").join("config.toml"))
}

/// OS-dependent default database location
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("kmt"))
        .unwrap_or_else(|| PathBuf::from("./kmt_data"))
        .join("kmt.db")
}
