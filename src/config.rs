//! Runtime tuning loaded from `config.toml`.
//!
//! ```toml
//! batch_size = 500
//! lock_timeout_ms = 1000
//! retry_backoff_ms = 1000
//! max_lock_retries = 60
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Engine configuration. Every field has a default, so an empty file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Rows updated per backfill statement.
    pub batch_size: u64,
    /// Pause between backfill batches.
    pub batch_pause_ms: u64,
    /// Session `lock_timeout` applied to every statement.
    pub lock_timeout_ms: u64,
    /// Sleep before re-issuing a statement that hit the lock timeout.
    pub retry_backoff_ms: u64,
    /// Give up after this many lock timeouts on one statement. Unbounded when unset.
    pub max_lock_retries: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            batch_pause_ms: 0,
            lock_timeout_ms: 1000,
            retry_backoff_ms: 1000,
            max_lock_retries: None,
        }
    }
}

impl Config {
    /// Parse a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        if config.batch_size == 0 {
            return Err(Error::Config("batch_size must be greater than zero".into()));
        }
        Ok(config)
    }

    /// Load from an explicit path, or from the user config dir when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match default_path() {
                Some(p) if p.exists() => p,
                _ => return Ok(Self::default()),
            },
        };
        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }
}

/// `<config_dir>/laridae/config.toml`
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("laridae").join("config.toml"))
}
