//! Configuration management for the CLI

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Store directory used when neither the flag, the environment nor the config file name one
pub const DEFAULT_DATA_DIR: &str = "data/autoscaling";

/// CLI configuration, read from `~/.config/autoscalectl/config.json`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub data_dir: Option<PathBuf>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let Some(config_path) = Self::config_path() else {
            return Ok(Self::default());
        };
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file {}", config_path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", config_path.display()))
    }

    fn config_path() -> Option<PathBuf> {
        dirs_next::config_dir().map(|dir| dir.join("autoscalectl").join("config.json"))
    }
}

/// The store directory to operate on: explicit flag or environment first, then the config file
pub fn resolve_data_dir(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir);
    }
    Ok(Config::load()?
        .data_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)))
}
