//! Node Configuration
//!
//! One TOML file describes the local node, the cluster map, timeouts, transport
//! limits and the buckets this cluster serves. Every node of a cluster is started
//! with the same `[cluster]` and `[[buckets]]` sections.
//!
//! ```toml
//! [node]
//! id = "t1"
//!
//! [[cluster.nodes]]
//! id = "t1"
//! http_addr = "127.0.0.1:6001"
//! data_addr = "127.0.0.1:7001"
//!
//! [[buckets]]
//! name = "imagenet"
//! props.rate_limit = { enabled = true, max_tokens = 100, interval_ms = 1000 }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::batch::task::TaskTimeouts;
use crate::bucket::types::Bucket;
use crate::membership::types::{Node, NodeId};
use crate::transport::frame::DEFAULT_MAX_FRAME_SIZE;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocalNodeConfig {
    pub id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClusterConfig {
    #[serde(default)]
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub max_host_busy_ms: u64,
    pub send_file_ms: u64,
    pub min_assemble_wait_ms: u64,
    pub max_assemble_wait_ms: u64,
    pub progress_interval_ms: u64,
    /// Phase-1 and phase-2 control calls.
    pub control_call_ms: u64,
    pub control_attempts: usize,
    pub task_idle_ms: u64,
    pub keep_finished_ms: u64,
    pub housekeep_interval_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            max_host_busy_ms: 20_000,
            send_file_ms: 30_000,
            min_assemble_wait_ms: 10_000,
            max_assemble_wait_ms: 60_000,
            progress_interval_ms: 2_000,
            control_call_ms: 5_000,
            control_attempts: 3,
            task_idle_ms: 120_000,
            keep_finished_ms: 60_000,
            housekeep_interval_ms: 5_000,
        }
    }
}

impl TimeoutsConfig {
    pub fn task_timeouts(&self) -> TaskTimeouts {
        TaskTimeouts {
            max_host_busy: Duration::from_millis(self.max_host_busy_ms),
            send_file: Duration::from_millis(self.send_file_ms),
            min_assemble_wait: Duration::from_millis(self.min_assemble_wait_ms),
            max_assemble_wait: Duration::from_millis(self.max_assemble_wait_ms),
            progress_interval: Duration::from_millis(self.progress_interval_ms.max(1)),
        }
    }

    pub fn control_call(&self) -> Duration {
        Duration::from_millis(self.control_call_ms)
    }

    pub fn task_idle(&self) -> Duration {
        Duration::from_millis(self.task_idle_ms)
    }

    pub fn keep_finished(&self) -> Duration {
        Duration::from_millis(self.keep_finished_ms)
    }

    pub fn housekeep_interval(&self) -> Duration {
        Duration::from_millis(self.housekeep_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Idle limiter entries are evicted after half of this period.
    pub sweep_period_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            sweep_period_ms: 60_000,
        }
    }
}

impl RateLimitConfig {
    pub fn sweep_period(&self) -> Duration {
        Duration::from_millis(self.sweep_period_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    pub chunk_size: usize,
    pub max_frame_size: usize,
    pub channel_depth: usize,
    pub connect_timeout_ms: u64,
    /// Stashed early aborts are dropped after this long.
    pub stash_ttl_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1024 * 1024,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            channel_depth: 256,
            connect_timeout_ms: 2_000,
            stash_ttl_ms: 60_000,
        }
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn stash_ttl(&self) -> Duration {
        Duration::from_millis(self.stash_ttl_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    pub node: LocalNodeConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub ratelimit: RateLimitConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub buckets: Vec<Bucket>,
}

impl NodeConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn local_id(&self) -> NodeId {
        NodeId::from(self.node.id.as_str())
    }

    pub fn local_node(&self) -> Option<&Node> {
        self.cluster.nodes.iter().find(|n| n.id.as_str() == self.node.id)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.id.is_empty() {
            return Err(ConfigError::Invalid("node.id is empty".to_string()));
        }
        if self.local_node().is_none() {
            return Err(ConfigError::Invalid(format!(
                "node {} is missing from cluster.nodes",
                self.node.id
            )));
        }

        let mut ids = HashSet::new();
        for node in &self.cluster.nodes {
            if !ids.insert(node.id.clone()) {
                return Err(ConfigError::Invalid(format!("duplicate node id {}", node.id)));
            }
        }

        let mut buckets = HashSet::new();
        for bucket in &self.buckets {
            if bucket.name.is_empty() || bucket.name.contains('/') {
                return Err(ConfigError::Invalid(format!(
                    "invalid bucket name {:?}",
                    bucket.name
                )));
            }
            if !buckets.insert(bucket.uname()) {
                return Err(ConfigError::Invalid(format!("duplicate bucket {}", bucket.uname())));
            }
        }

        let transport = &self.transport;
        if transport.chunk_size == 0 {
            return Err(ConfigError::Invalid("transport.chunk_size must be positive".to_string()));
        }
        // Room for the frame header next to a full chunk.
        if transport.chunk_size + 64 * 1024 > transport.max_frame_size {
            return Err(ConfigError::Invalid(format!(
                "transport.chunk_size {} does not fit in max_frame_size {}",
                transport.chunk_size, transport.max_frame_size
            )));
        }
        if self.timeouts.min_assemble_wait_ms > self.timeouts.max_assemble_wait_ms {
            return Err(ConfigError::Invalid(
                "timeouts.min_assemble_wait_ms exceeds max_assemble_wait_ms".to_string(),
            ));
        }
        Ok(())
    }
}
