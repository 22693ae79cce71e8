//! Queue configuration: per-queue options and their resolved form.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ManagerConfig;
use crate::domain::Priority;
use crate::ports::{Adapter, KvStore};

/// Which storage a queue is bound to.
#[derive(Clone, Default)]
pub enum AdapterBinding {
    /// The manager's shared in-process adapter.
    #[default]
    Memory,

    /// A `DurableAdapter`. Without a store, the manager's shared store is used.
    Durable {
        store: Option<Arc<dyn KvStore>>,
        key_prefix: Option<String>,
    },

    /// Any other `Adapter` implementation.
    Custom(Arc<dyn Adapter>),
}

impl AdapterBinding {
    pub fn durable() -> Self {
        AdapterBinding::Durable {
            store: None,
            key_prefix: None,
        }
    }

    pub fn durable_with(store: Arc<dyn KvStore>) -> Self {
        AdapterBinding::Durable {
            store: Some(store),
            key_prefix: None,
        }
    }
}

impl fmt::Debug for AdapterBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterBinding::Memory => f.write_str("Memory"),
            AdapterBinding::Durable { store, key_prefix } => f
                .debug_struct("Durable")
                .field("explicit_store", &store.is_some())
                .field("key_prefix", key_prefix)
                .finish(),
            AdapterBinding::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Options for `QueueManager::add_queue`. Unset fields fall back to `ManagerConfig`.
#[derive(Debug, Clone, Default)]
pub struct QueueOptions {
    pub concurrency: Option<usize>,
    pub max_retries: Option<u32>,
    pub retry_interval: Option<Duration>,
    pub default_priority: Option<Priority>,
    pub adapter: AdapterBinding,
}

impl QueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = Some(n);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = Some(n);
        self
    }

    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = Some(interval);
        self
    }

    pub fn default_priority(mut self, priority: Priority) -> Self {
        self.default_priority = Some(priority);
        self
    }

    pub fn adapter(mut self, binding: AdapterBinding) -> Self {
        self.adapter = binding;
        self
    }
}

/// Resolved, immutable queue configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub name: String,

    /// At least 1.
    pub concurrency: usize,
    pub max_retries: u32,
    pub retry_interval: Duration,
    pub default_priority: Priority,
    pub stop_poll_interval: Duration,
}

impl QueueConfig {
    /// Defaults from `ManagerConfig::default()`.
    pub fn new(name: impl Into<String>) -> Self {
        Self::resolve(name, &QueueOptions::default(), &ManagerConfig::default())
    }

    pub fn resolve(name: impl Into<String>, options: &QueueOptions, defaults: &ManagerConfig) -> Self {
        Self {
            name: name.into(),
            concurrency: options.concurrency.unwrap_or(defaults.concurrency).max(1),
            max_retries: options.max_retries.unwrap_or(defaults.max_retries),
            retry_interval: options
                .retry_interval
                .unwrap_or_else(|| defaults.retry_interval()),
            default_priority: options
                .default_priority
                .unwrap_or(defaults.default_priority),
            stop_poll_interval: defaults.stop_poll_interval(),
        }
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_stop_poll_interval(mut self, interval: Duration) -> Self {
        self.stop_poll_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_override_manager_defaults() {
        let defaults = ManagerConfig {
            concurrency: 2,
            max_retries: 7,
            ..ManagerConfig::default()
        };
        let options = QueueOptions::new()
            .concurrency(5)
            .retry_interval(Duration::from_millis(50));

        let cfg = QueueConfig::resolve("mail", &options, &defaults);
        assert_eq!(cfg.name, "mail");
        assert_eq!(cfg.concurrency, 5);
        assert_eq!(cfg.max_retries, 7);
        assert_eq!(cfg.retry_interval, Duration::from_millis(50));
        assert_eq!(cfg.default_priority, Priority::Normal);
    }

    #[test]
    fn zero_concurrency_is_clamped_to_one() {
        let cfg = QueueConfig::resolve(
            "q",
            &QueueOptions::new().concurrency(0),
            &ManagerConfig::default(),
        );
        assert_eq!(cfg.concurrency, 1);
    }
}
