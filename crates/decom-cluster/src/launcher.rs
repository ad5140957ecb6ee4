//! Construction of node processes and their query clients.

use crate::{
    ClusterManifest, GracefulSignal, LaunchCommand, NodeProcess, NodeSpec, ProcessControl,
    Readiness, Result,
};
use decom_client::{HttpSqlClient, QueryClient};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Builds the process handle and SQL client for a node spec.
///
/// Kept behind a trait so the harness can drive an in-memory cluster in tests.
pub trait NodeLauncher: Send + Sync {
    fn process(&self, spec: &NodeSpec) -> Result<Box<dyn ProcessControl>>;

    fn client(&self, spec: &NodeSpec) -> Result<Arc<dyn QueryClient>>;

    /// Persists the layout of a freshly provisioned cluster. Does nothing by default.
    fn record(&self, _manifest: &ClusterManifest) -> Result<()> {
        Ok(())
    }
}

/// Launches real database nodes from an installation directory.
#[derive(Debug, Clone)]
pub struct CrateLauncher {
    crate_home: PathBuf,
    run_dir: PathBuf,
    signal: GracefulSignal,
    start_timeout: Duration,
}

impl CrateLauncher {
    pub fn new(crate_home: impl Into<PathBuf>, run_dir: impl Into<PathBuf>) -> Self {
        Self {
            crate_home: crate_home.into(),
            run_dir: run_dir.into(),
            signal: GracefulSignal::usr2(),
            start_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_signal(mut self, signal: GracefulSignal) -> Self {
        self.signal = signal;
        self
    }

    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    /// Per-cluster directory: `<run_dir>/<cluster>`.
    pub fn cluster_dir(&self, cluster_name: &str) -> PathBuf {
        self.run_dir.join(cluster_name)
    }

    /// Per-node working directory: `<run_dir>/<cluster>/<node>`.
    pub fn node_dir(&self, spec: &NodeSpec) -> PathBuf {
        self.cluster_dir(&spec.cluster_name).join(&spec.name)
    }
}

impl NodeLauncher for CrateLauncher {
    fn process(&self, spec: &NodeSpec) -> Result<Box<dyn ProcessControl>> {
        let node_dir = self.node_dir(spec);
        let command = LaunchCommand::for_node(&self.crate_home, spec, &node_dir);
        let process = NodeProcess::new(spec.name.clone(), command, node_dir.join("logs"))
            .with_readiness(Readiness::TcpPort {
                host: spec.host.clone(),
                port: spec.http_port,
            })
            .with_start_timeout(self.start_timeout)
            .with_graceful_signal(self.signal.clone());
        Ok(Box::new(process))
    }

    fn client(&self, spec: &NodeSpec) -> Result<Arc<dyn QueryClient>> {
        Ok(Arc::new(HttpSqlClient::new(&spec.host, spec.http_port)?))
    }

    fn record(&self, manifest: &ClusterManifest) -> Result<()> {
        let path = manifest.save(&self.cluster_dir(&manifest.cluster_name))?;
        debug!(cluster = %manifest.cluster_name, path = %path.display(), "manifest written");
        Ok(())
    }
}
