//! CLI command implementations
//!
//! Each command returns the process exit code: 0 success, 1 test or
//! validation failures, 2 operational errors.

pub mod info;
pub mod run;
pub mod specs;

use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;
use tspec_core::registry::PluginCatalog;
use tspec_core::{Engine, EngineConfig};

/// Build an engine from the configuration file and load its plugins
pub fn load_engine(config_path: &Path) -> Result<Engine> {
    let config = EngineConfig::load(config_path)
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;
    debug!("Configuration: {:?}", config);

    let engine = Engine::with_builtins(config);
    // The binary ships no compiled-in plugins; embedders supply a catalog.
    engine
        .load_plugins(&PluginCatalog::new())
        .context("loading configured plugins")?;
    Ok(engine)
}
