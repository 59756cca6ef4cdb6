use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Routing engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Agent matching configuration
    pub routing: RoutingConfig,

    /// Work queue configuration
    pub queues: QueueConfig,

    /// Remote authority configuration
    pub remote: RemoteConfig,
}

/// Agent matching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Default maximum concurrent work items per agent
    pub default_max_concurrent: u32,
}

/// Work queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum queue size
    pub max_queue_size: usize,

    /// Interval between periodic drain passes
    pub drain_interval: Duration,

    /// Maximum time a work item may wait before being dropped.
    /// `None` keeps items queued indefinitely.
    pub max_wait_time: Option<Duration>,
}

/// Remote authority configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the authoritative routing service.
    /// `None` disables the remote path entirely and all decisions are local.
    pub base_url: Option<String>,

    /// Timeout for remote calls before falling back to local computation
    pub timeout: Duration,
}

impl EngineConfig {
    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<(), String> {
        if self.routing.default_max_concurrent == 0 {
            return Err("default_max_concurrent must be greater than 0".to_string());
        }

        if self.queues.max_queue_size == 0 {
            return Err("max_queue_size must be greater than 0".to_string());
        }

        if self.queues.drain_interval.is_zero() {
            return Err("drain_interval must be greater than 0".to_string());
        }

        if let Some(max_wait) = self.queues.max_wait_time {
            if max_wait.is_zero() {
                return Err("max_wait_time must be greater than 0 when set".to_string());
            }
        }

        if self.remote.timeout.is_zero() {
            return Err("remote timeout must be greater than 0".to_string());
        }

        if let Some(url) = &self.remote.base_url {
            if url.parse::<reqwest::Url>().is_err() {
                return Err(format!("Invalid remote base URL: {}", url));
            }
        }

        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            routing: RoutingConfig::default(),
            queues: QueueConfig::default(),
            remote: RemoteConfig::default(),
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_max_concurrent: 1,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 100,
            drain_interval: Duration::from_secs(2),
            max_wait_time: None,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: Duration::from_secs(2),
        }
    }
}
