//! Node identity and the per-run cluster manifest.

use crate::{PortRange, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Identity and launch settings of one node.
///
/// Immutable once built; runtime settings go through the query interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Unique within a cluster run.
    pub name: String,

    /// Address the node binds to.
    pub host: String,

    /// HTTP (SQL) port.
    pub http_port: u16,

    /// Transport port range, shared by every node of the cluster.
    pub transport_range: PortRange,

    pub cluster_name: String,

    /// Names of every node in the cluster, this one included.
    pub peers: Vec<String>,

    /// Launch overrides, applied after the built-in settings.
    pub settings: BTreeMap<String, String>,
}

impl NodeSpec {
    /// Canonical node name for index `i` of `cluster_name`.
    pub fn node_name(cluster_name: &str, i: usize) -> String {
        format!("crate_{cluster_name}_{i}")
    }

    /// Effective `-C` settings in launch order.
    pub fn launch_settings(&self) -> BTreeMap<String, String> {
        let seed_hosts = self
            .transport_range
            .ports()
            .map(|p| format!("{}:{p}", self.host))
            .collect::<Vec<_>>()
            .join(",");

        let mut settings = BTreeMap::from([
            ("node.name".to_string(), self.name.clone()),
            ("cluster.name".to_string(), self.cluster_name.clone()),
            ("network.host".to_string(), self.host.clone()),
            ("http.port".to_string(), self.http_port.to_string()),
            (
                "transport.tcp.port".to_string(),
                self.transport_range.to_string(),
            ),
            ("discovery.seed_hosts".to_string(), seed_hosts),
            (
                "cluster.initial_master_nodes".to_string(),
                self.peers.join(","),
            ),
        ]);
        settings.extend(self.settings.clone());
        settings
    }

    /// Command-line arguments for the node binary.
    pub fn launch_args(&self) -> Vec<String> {
        self.launch_settings()
            .into_iter()
            .map(|(k, v)| format!("-C{k}={v}"))
            .collect()
    }
}

/// On-disk record of a provisioned cluster, written into the run directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterManifest {
    pub cluster_name: String,
    pub transport_range: PortRange,
    pub nodes: Vec<NodeSpec>,
}

impl ClusterManifest {
    pub const FILE_NAME: &'static str = "cluster.toml";

    /// Writes the manifest to `dir/cluster.toml`, creating `dir` if needed.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(Self::FILE_NAME);
        fs::write(&path, toml::to_string_pretty(self)?)?;
        Ok(path)
    }
}
