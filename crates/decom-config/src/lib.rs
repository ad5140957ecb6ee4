//! Configuration management for the decommission harness
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (DECOM_* prefix, highest precedence)
//! 2. decom.local.toml (gitignored, local overrides)
//! 3. decom.toml (git-tracked, project config)
//! 4. ~/.config/decom/config.toml (user defaults)
//! 5. Built-in defaults (lowest precedence)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod error;
mod loader;

pub use error::ConfigError;
pub use loader::{ConfigLoader, ConfigSource};

/// Main harness configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub cluster: ClusterSettings,
    pub retry: RetrySettings,
    pub startup: StartupSettings,
    pub quorum: QuorumSettings,
    pub decommission: DecommissionSettings,
    pub verify: VerifySettings,
    pub workload: WorkloadSettings,
}

/// Where node binaries live and how nodes are addressed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    /// Root of an unpacked database distribution (contains `bin/crate`).
    pub crate_home: Option<PathBuf>,
    pub host: String,
    /// First port handed out by the port allocator.
    pub port_range_start: u16,
    /// Exclusive upper bound of the port allocator.
    pub port_range_end: u16,
    /// Parent directory for per-node data and log directories.
    pub run_dir: PathBuf,
    /// Settings applied to every node at launch.
    pub node_settings: Vec<NodeSetting>,
}

/// One `-Ckey=value` launch override.
///
/// Setting keys contain dots, which the layered loader splits into nested
/// tables when they appear as map keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSetting {
    pub key: String,
    pub value: String,
}

impl NodeSetting {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl Default for ClusterSettings {
    fn default() -> Self {
        let node_settings = vec![
            NodeSetting::new("cluster.routing.allocation.disk.watermark.low", "100k"),
            NodeSetting::new("cluster.routing.allocation.disk.watermark.high", "10k"),
            NodeSetting::new("cluster.routing.allocation.disk.watermark.flood_stage", "1k"),
        ];

        Self {
            crate_home: None,
            host: "127.0.0.1".to_string(),
            port_range_start: 42_000,
            port_range_end: 44_000,
            run_dir: PathBuf::from(".decom/runs"),
            node_settings,
        }
    }
}

/// Backoff for queries that hit transient cluster-state errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub initial_backoff_ms: u64,
    pub multiplier: f64,
    pub deadline_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 10,
            multiplier: 2.0,
            deadline_ms: 10_500,
        }
    }
}

impl RetrySettings {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StartupSettings {
    /// Attempts per node before the whole cluster start is abandoned.
    pub max_attempts: u32,
    /// How long a single attempt may take to open the HTTP port.
    pub start_timeout_secs: u64,
}

impl Default for StartupSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            start_timeout_secs: 60,
        }
    }
}

impl StartupSettings {
    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuorumSettings {
    pub poll_interval_ms: u64,
    /// `None` waits forever.
    pub timeout_secs: Option<u64>,
}

impl Default for QuorumSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            timeout_secs: Some(120),
        }
    }
}

impl QuorumSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecommissionSettings {
    pub timeout_secs: u64,
    /// Signal name delivered to request a graceful stop.
    pub signal: String,
}

impl Default for DecommissionSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            signal: "SIGUSR2".to_string(),
        }
    }
}

impl DecommissionSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifySettings {
    pub poll_interval_ms: u64,
    pub deadline_secs: u64,
}

impl Default for VerifySettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 250,
            deadline_secs: 30,
        }
    }
}

impl VerifySettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadSettings {
    pub concurrency_per_kind: usize,
    pub table: String,
}

impl Default for WorkloadSettings {
    fn default() -> Self {
        Self {
            concurrency_per_kind: 4,
            table: "t1".to_string(),
        }
    }
}

impl ClusterSettings {
    /// Launch overrides as an ordered map, later duplicates winning.
    pub fn node_settings_map(&self) -> BTreeMap<String, String> {
        self.node_settings
            .iter()
            .map(|s| (s.key.clone(), s.value.clone()))
            .collect()
    }
}

impl HarnessConfig {
    /// Load configuration from the given project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Configuration tuned for in-process simulated clusters: short polls and deadlines.
    pub fn fast() -> Self {
        Self {
            retry: RetrySettings {
                initial_backoff_ms: 1,
                multiplier: 2.0,
                deadline_ms: 500,
            },
            quorum: QuorumSettings {
                poll_interval_ms: 10,
                timeout_secs: Some(5),
            },
            decommission: DecommissionSettings {
                timeout_secs: 5,
                ..Default::default()
            },
            verify: VerifySettings {
                poll_interval_ms: 10,
                deadline_secs: 5,
            },
            ..Default::default()
        }
    }

    /// Resolve relative paths to absolute
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        let base = base_dir.as_ref();

        if self.cluster.run_dir.is_relative() {
            self.cluster.run_dir = base.join(&self.cluster.run_dir);
        }

        if let Some(home) = &self.cluster.crate_home {
            if home.is_relative() {
                self.cluster.crate_home = Some(base.join(home));
            }
        }
    }

    /// Checks cross-field constraints the type system cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster.port_range_start >= self.cluster.port_range_end {
            return Err(ConfigError::EmptyPortRange {
                start: self.cluster.port_range_start,
                end: self.cluster.port_range_end,
            });
        }
        if self.retry.initial_backoff_ms == 0 {
            return Err(ConfigError::ZeroBackoff);
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(ConfigError::InvalidMultiplier(self.retry.multiplier));
        }
        if self.startup.max_attempts == 0 {
            return Err(ConfigError::ZeroCount {
                field: "startup.max_attempts",
            });
        }
        if self.workload.concurrency_per_kind == 0 {
            return Err(ConfigError::ZeroCount {
                field: "workload.concurrency_per_kind",
            });
        }
        Ok(())
    }
}
