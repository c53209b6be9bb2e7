//! Engine configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Error, Result};
use crate::registry::RunnerOptions;
use crate::scheduler::{ScheduleOptions, DEFAULT_CONCURRENCY, DEFAULT_CONCURRENCY_PER_TYPE};
use crate::types::OutputConfig;

/// Configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "tspec.toml";

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Global concurrency cap
    pub concurrency: usize,

    /// Concurrency cap per protocol
    pub concurrency_per_type: usize,

    /// Request timeout in milliseconds
    pub timeout_ms: u64,

    /// Base URL for cases without an environment host
    pub base_url: Option<String>,

    /// Plugins to load, by catalog name
    pub plugins: Vec<String>,

    /// Options handed to each plugin constructor, keyed by plugin name
    pub plugin_options: Map<String, Value>,

    /// Default report destination
    pub output: OutputConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            concurrency_per_type: DEFAULT_CONCURRENCY_PER_TYPE,
            timeout_ms: 30_000,
            base_url: None,
            plugins: Vec::new(),
            plugin_options: Map::new(),
            output: OutputConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            debug!("Loading config from {}", path.display());
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.check()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// `tspec.toml` in the working directory
    pub fn default_path() -> PathBuf {
        PathBuf::from(DEFAULT_CONFIG_FILE)
    }

    fn check(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::Config("concurrency must be at least 1".to_string()));
        }
        if self.concurrency_per_type == 0 {
            return Err(Error::Config("concurrency_per_type must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn runner_options(&self) -> RunnerOptions {
        RunnerOptions {
            timeout: self.timeout(),
            base_url: self.base_url.clone(),
            ..Default::default()
        }
    }

    pub fn schedule_options(&self) -> ScheduleOptions {
        ScheduleOptions {
            concurrency: self.concurrency,
            concurrency_per_type: self.concurrency_per_type,
            runner_options: self.runner_options(),
            params: Map::new(),
        }
    }
}
