//! Agent configuration

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable prefix, e.g. `AUTOSCALER_DATA_DIR`
const ENV_PREFIX: &str = "AUTOSCALER";

/// Optional config file in the working directory (`autoscaler.toml`, `autoscaler.json`, ...)
const CONFIG_FILE: &str = "autoscaler";

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// Port serving health and metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Directory holding the metrics store; the store owns its `metrics` subdirectory
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Inbox the metrics collaborator drops snapshot batches into
    #[serde(default = "default_spool_dir")]
    pub spool_dir: PathBuf,

    #[serde(default = "default_collection_interval")]
    pub collection_interval_secs: u64,

    #[serde(default = "default_gc_interval")]
    pub gc_interval_secs: u64,

    /// Longest window scaling decisions look back over
    #[serde(default = "default_max_scaling_window")]
    pub max_scaling_window_hours: i64,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data/autoscaling")
}

fn default_spool_dir() -> PathBuf {
    PathBuf::from("data/spool")
}

fn default_collection_interval() -> u64 {
    60
}

fn default_gc_interval() -> u64 {
    3600
}

fn default_max_scaling_window() -> i64 {
    autoscaler_lib::metrics_db::DEFAULT_MAX_SCALING_WINDOW_HOURS
}

impl AgentConfig {
    /// Load configuration from an optional config file and the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(CONFIG_FILE).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .context("Failed to read agent configuration")?;

        Self::from_config(config)
    }

    pub fn from_config(config: config::Config) -> Result<Self> {
        let agent: AgentConfig = config
            .try_deserialize()
            .context("Invalid agent configuration")?;
        agent.validate()?;
        Ok(agent)
    }

    fn validate(&self) -> Result<()> {
        if self.collection_interval_secs == 0 || self.gc_interval_secs == 0 {
            bail!("collection_interval_secs and gc_interval_secs must be positive");
        }
        if self.max_scaling_window_hours <= 0 {
            bail!(
                "max_scaling_window_hours must be positive, got {}",
                self.max_scaling_window_hours
            );
        }
        if chrono::Duration::try_hours(self.max_scaling_window_hours).is_none() {
            bail!(
                "max_scaling_window_hours {} is out of range",
                self.max_scaling_window_hours
            );
        }
        if self.spool_dir.starts_with(self.data_dir.join("metrics")) {
            bail!("spool_dir must not live inside the metrics store directory");
        }
        Ok(())
    }

    pub fn collection_interval(&self) -> Duration {
        Duration::from_secs(self.collection_interval_secs)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs)
    }

    pub fn max_scaling_window(&self) -> chrono::Duration {
        chrono::Duration::try_hours(self.max_scaling_window_hours).unwrap_or(chrono::Duration::MAX)
    }
}
