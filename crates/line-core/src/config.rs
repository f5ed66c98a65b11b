//! Configuration for line-core

use std::path::Path;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::Result;

/// Environment variables are read as `LINE_CORE__DATABASE__URL` and so on.
pub const ENV_PREFIX: &str = "LINE_CORE";

/// Main configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LineCoreConfig {
    pub database: DatabaseConfig,
    pub logging: LogSettings,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    /// Apply the embedded migrations when connecting.
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub json: bool,
    /// Include source file and line in each event.
    pub file_info: bool,
    /// Log span enter and exit.
    pub spans: bool,
}

impl LineCoreConfig {
    /// Load configuration from the environment only.
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    /// Load configuration from a TOML file, overlaid with the environment.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::load(Some(path.as_ref()))
    }

    fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let config = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;
        Ok(config.try_deserialize()?)
    }
}

impl Default for LineCoreConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            logging: LogSettings::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://lines.db?mode=rwc".to_string(),
            max_connections: 5,
            run_migrations: true,
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file_info: false,
            spans: false,
        }
    }
}
