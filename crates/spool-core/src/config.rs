//! Manager-level configuration and defaults.
//!
//! JSON ファイルから読み込める。すべてのフィールドに default があるので、
//! 変更したい項目だけ書けばよい。
//!
//! ```json
//! { "concurrency": 4, "max_retries": 5, "retry_interval_ms": 250 }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::Priority;
use crate::impls::DEFAULT_KEY_PREFIX;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Defaults applied to every queue created through `QueueManager`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub concurrency: usize,
    pub max_retries: u32,
    pub retry_interval_ms: u64,
    pub default_priority: Priority,

    /// How often `stop()` re-checks the running count.
    pub stop_poll_interval_ms: u64,

    /// Key prefix for durable adapters created without an explicit prefix.
    pub key_prefix: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            max_retries: 3,
            retry_interval_ms: 1_000,
            default_priority: Priority::Normal,
            stop_poll_interval_ms: 100,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

impl ManagerConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn stop_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stop_poll_interval_ms)
    }
}
