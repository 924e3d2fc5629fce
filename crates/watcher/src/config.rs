//! Configuration for pools, watches and platform backends
//!
//! Every field has a serde default, so a config file only needs the keys
//! it wants to change:
//!
//! ```toml
//! [watch]
//! debounce_ms = 250
//!
//! [watch.backend]
//! buffer_kb = 256
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Delay an idle watch asks for before its next poll
pub const DEFAULT_IDLE_DELAY_MS: u64 = 50;

/// Default debounce window
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Default overlapped read buffer (1 MiB)
pub const DEFAULT_BUFFER_KB: usize = 1024;

/// Largest read buffer accepted for network shares
pub const NETWORK_BUFFER_KB: usize = 64;

/// Largest read buffer a single request can describe (u32 byte length)
pub const MAX_BUFFER_KB: usize = (u32::MAX / 1024) as usize;

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub watch: WatchConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no pool or watch can run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.idle_delay_ms == 0 {
            return Err(ConfigError::Invalid("pool.idle_delay_ms must be positive".into()));
        }
        if self.watch.idle_delay_ms == 0 {
            return Err(ConfigError::Invalid("watch.idle_delay_ms must be positive".into()));
        }
        self.watch.backend.validate()
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Scheduling pool configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Longest the scheduling thread sleeps between cycles (default: 50ms)
    #[serde(default = "default_idle_delay_ms")]
    pub idle_delay_ms: u64,
}

impl PoolConfig {
    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_delay_ms: DEFAULT_IDLE_DELAY_MS,
        }
    }
}

/// Per-watch configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Minimum spacing between deliveries (default: 500ms)
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Poll delay requested while idle or not running (default: 50ms)
    #[serde(default = "default_idle_delay_ms")]
    pub idle_delay_ms: u64,

    #[serde(default)]
    pub backend: BackendConfig,
}

impl WatchConfig {
    /// Default configuration with a specific debounce window
    pub fn with_debounce_ms(debounce_ms: u64) -> Self {
        Self {
            debounce_ms,
            ..Self::default()
        }
    }

    pub fn debounce_interval(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            idle_delay_ms: DEFAULT_IDLE_DELAY_MS,
            backend: BackendConfig::default(),
        }
    }
}

/// Platform backend tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Overlapped read buffer size in KiB (default: 1024)
    #[serde(default = "default_buffer_kb")]
    pub buffer_kb: usize,

    /// Buffer size used after the OS rejects the default one (default: 64)
    #[serde(default = "default_network_buffer_kb")]
    pub network_buffer_kb: usize,

    /// Stream coalescing latency in milliseconds (default: 1)
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u64,
}

impl BackendConfig {
    /// Buffer sizes must be positive, fit a read request, and the network
    /// cap may not exceed the default size
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, kb) in [
            ("buffer_kb", self.buffer_kb),
            ("network_buffer_kb", self.network_buffer_kb),
        ] {
            if kb == 0 || kb > MAX_BUFFER_KB {
                return Err(ConfigError::Invalid(format!(
                    "watch.backend.{} must be between 1 and {}, got {}",
                    key, MAX_BUFFER_KB, kb
                )));
            }
        }
        if self.network_buffer_kb > self.buffer_kb {
            return Err(ConfigError::Invalid(format!(
                "watch.backend.network_buffer_kb ({}) exceeds buffer_kb ({})",
                self.network_buffer_kb, self.buffer_kb
            )));
        }
        Ok(())
    }

    pub fn buffer_bytes(&self) -> usize {
        self.buffer_kb.saturating_mul(1024)
    }

    pub fn network_buffer_bytes(&self) -> usize {
        self.network_buffer_kb.saturating_mul(1024)
    }

    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            buffer_kb: DEFAULT_BUFFER_KB,
            network_buffer_kb: NETWORK_BUFFER_KB,
            latency_ms: default_latency_ms(),
        }
    }
}

fn default_idle_delay_ms() -> u64 {
    DEFAULT_IDLE_DELAY_MS
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

fn default_buffer_kb() -> usize {
    DEFAULT_BUFFER_KB
}

fn default_network_buffer_kb() -> usize {
    NETWORK_BUFFER_KB
}

fn default_latency_ms() -> u64 {
    1
}
