//! Configuration file handling

use serde::Deserialize;
use std::path::Path;

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Debug session settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Output buffer settings
    #[serde(default)]
    pub output: OutputConfig,
}

/// Debug session settings
#[derive(Debug, Deserialize, Default, Clone)]
pub struct SessionConfig {
    /// Pause every new top-level thread before its first step
    #[serde(default)]
    pub stop_on_entry: bool,

    /// Value reported as `allThreadsStopped` in stop events
    #[serde(default)]
    pub all_threads_stopped: bool,
}

/// Output buffer configuration
#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    /// Maximum number of output events to buffer
    #[serde(default = "default_max_events")]
    pub max_events: usize,

    /// Maximum total bytes to buffer
    #[serde(default = "default_max_bytes")]
    pub max_bytes_mb: usize,

    /// Prefix intercepted log lines with the thread name
    #[serde(default = "default_true")]
    pub thread_prefix: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            max_events: default_max_events(),
            max_bytes_mb: default_max_bytes(),
            thread_prefix: default_true(),
        }
    }
}

fn default_max_events() -> usize {
    10_000
}
fn default_max_bytes() -> usize {
    10
}
fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }

    /// Output buffer limit in bytes
    pub fn max_output_bytes(&self) -> usize {
        self.output.max_bytes_mb * 1024 * 1024
    }
}
