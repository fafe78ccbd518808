//! User configuration
//!
//! Stored in ~/.config/lineage/config.json. Environment variables override
//! the file: `LINEAGE_AUTHOR`, `LINEAGE_DB`, `LINEAGE_LOG`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const AUTHOR_ENV: &str = "LINEAGE_AUTHOR";
pub const DATABASE_ENV: &str = "LINEAGE_DB";
pub const LOG_ENV: &str = "LINEAGE_LOG";

/// Settings shared by every command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Author recorded on commits when none is given
    pub author: String,
    /// Database file used when none is given
    pub database: PathBuf,
    /// `tracing` filter directive
    pub log: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            author: "lineage".to_string(),
            database: PathBuf::from(".lineage"),
            log: "warn".to_string(),
        }
    }
}

impl Config {
    /// Default config file location
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Could not find config directory".into()))?;
        Ok(config_dir.join("lineage").join("config.json"))
    }

    /// Read a config file; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load the user's config with environment overrides applied
    pub fn load() -> Result<Self> {
        let mut config = match Self::default_path() {
            Ok(path) => Self::load_from(&path)?,
            Err(_) => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply overrides from `lookup` (normally the process environment)
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(author) = lookup(AUTHOR_ENV).filter(|v| !v.is_empty()) {
            self.author = author;
        }
        if let Some(db) = lookup(DATABASE_ENV).filter(|v| !v.is_empty()) {
            self.database = PathBuf::from(db);
        }
        if let Some(log) = lookup(LOG_ENV).filter(|v| !v.is_empty()) {
            self.log = log;
        }
    }

    /// Write the config, creating its directory if needed
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| Error::Config(format!("Failed to create config dir: {}", e)))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| Error::Config(format!("Failed to write config: {}", e)))
    }
}
