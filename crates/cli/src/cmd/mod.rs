//! CLI command implementations

pub mod config;
pub mod watch;

use anyhow::{Context, Result};
use sentinel_watcher::Config;
use std::path::Path;

/// Load the config file when one is given, defaults otherwise
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(Config::default()),
    }
}
