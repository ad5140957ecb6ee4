//! Provisioning and lifecycle of one test cluster.

use crate::{
    ClusterHandle, ClusterManifest, DecommissionController, Error, NodeLauncher, NodeSpec,
    PortAllocator, PortRange, Result,
};
use decom_client::{QueryClient, QueryResponse, RetryPolicy, RetryingExecutor};
use decom_config::HarnessConfig;
use rand::seq::SliceRandom;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

/// Statement counting the nodes that joined the cluster.
pub const MEMBERSHIP_QUERY: &str = "select name from sys.nodes";

/// A provisioned cluster and the nodes it owns.
///
/// Handles are owned exclusively; callers get query clients through
/// [`ClusterSnapshot`] or the accessors below.
pub struct ClusterHarness {
    name: String,
    transport_range: PortRange,
    handles: Vec<ClusterHandle>,
    executor: RetryingExecutor,
    max_start_attempts: u32,
    quorum_poll: Duration,
    controller: DecommissionController,
}

impl ClusterHarness {
    /// Reserves ports, builds one handle per node and records the layout with
    /// the launcher. Nothing is started.
    pub fn provision(
        name: &str,
        node_count: usize,
        base_settings: &BTreeMap<String, String>,
        allocator: &PortAllocator,
        launcher: &dyn NodeLauncher,
        config: &HarnessConfig,
    ) -> Result<Self> {
        if node_count == 0 {
            return Err(Error::InvalidNodeCount(node_count));
        }

        let transport_range = allocator.reserve_range(node_count)?;
        let peers: Vec<String> = (0..node_count)
            .map(|i| NodeSpec::node_name(name, i))
            .collect();

        let mut handles = Vec::with_capacity(node_count);
        for node_name in &peers {
            let spec = NodeSpec {
                name: node_name.clone(),
                host: config.cluster.host.clone(),
                http_port: allocator.next_port()?,
                transport_range,
                cluster_name: name.to_string(),
                peers: peers.clone(),
                settings: base_settings.clone(),
            };
            let process = launcher.process(&spec)?;
            let client = launcher.client(&spec)?;
            handles.push(ClusterHandle::new(spec, process, client));
        }

        let harness = Self {
            name: name.to_string(),
            transport_range,
            handles,
            executor: RetryingExecutor::new(RetryPolicy::from(&config.retry)),
            max_start_attempts: config.startup.max_attempts,
            quorum_poll: config.quorum.poll_interval(),
            controller: DecommissionController::new(),
        };
        launcher.record(&harness.manifest())?;

        info!(cluster = name, nodes = node_count, transport = %transport_range, "provisioned");
        Ok(harness)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transport_range(&self) -> PortRange {
        self.transport_range
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn executor(&self) -> &RetryingExecutor {
        &self.executor
    }

    /// Serializable record of this cluster's layout.
    pub fn manifest(&self) -> ClusterManifest {
        ClusterManifest {
            cluster_name: self.name.clone(),
            transport_range: self.transport_range,
            nodes: self.handles.iter().map(|h| h.spec().clone()).collect(),
        }
    }

    /// Starts every node. On any exhausted node the whole cluster is torn down.
    pub async fn start(&mut self) -> Result<()> {
        for i in 0..self.handles.len() {
            if let Err(e) = self.handles[i].start_with_retry(self.max_start_attempts).await {
                warn!(cluster = %self.name, error = %e, "startup failed, tearing down");
                self.teardown().await;
                return Err(e);
            }
        }
        info!(cluster = %self.name, nodes = self.handles.len(), "all nodes started");
        Ok(())
    }

    /// Waits until the membership view reports every provisioned node that
    /// has not been decommissioned.
    ///
    /// A member whose process is gone fails the wait with
    /// [`Error::NodeNotRunning`]. `None` waits without bound.
    pub async fn await_quorum(&mut self, timeout: Option<Duration>) -> Result<()> {
        let started = Instant::now();
        let expected = self.member_count();
        loop {
            self.ensure_members_running()?;
            let client = self.random_client()?;
            let response = self
                .executor
                .execute(client.as_ref(), MEMBERSHIP_QUERY, &[])
                .await?;

            debug!(cluster = %self.name, seen = response.rowcount, expected, "membership poll");
            if response.rowcount == i64::try_from(expected).unwrap_or(i64::MAX) {
                info!(cluster = %self.name, nodes = expected, "quorum reached");
                return Ok(());
            }

            if let Some(limit) = timeout {
                if started.elapsed() >= limit {
                    return Err(Error::QuorumTimeout {
                        seen: response.rowcount,
                        expected,
                        timeout: limit,
                    });
                }
            }
            sleep(self.quorum_poll).await;
        }
    }

    /// Applies each setting as a transient cluster-wide setting.
    pub async fn push_settings(&mut self, settings: &BTreeMap<String, Value>) -> Result<()> {
        for (key, value) in settings {
            let statement = format!("set global transient {key} = ?");
            let client = self.random_client()?;
            self.executor
                .execute(client.as_ref(), &statement, std::slice::from_ref(value))
                .await?;
            debug!(cluster = %self.name, key = %key, %value, "setting applied");
        }
        Ok(())
    }

    /// Runs one statement through the retrying executor on a random live node.
    pub async fn execute(&mut self, statement: &str, params: &[Value]) -> Result<QueryResponse> {
        let client = self.random_client()?;
        Ok(self
            .executor
            .execute(client.as_ref(), statement, params)
            .await?)
    }

    /// Gracefully stops node `index`. See [`DecommissionController::decommission`].
    pub async fn decommission(&mut self, index: usize, timeout: Duration) -> Result<i32> {
        let handle = self
            .handles
            .get_mut(index)
            .ok_or(Error::NodeNotFound(index))?;
        self.controller.decommission(handle, timeout).await
    }

    /// Stops every node. Errors are logged; repeated calls are harmless.
    pub async fn teardown(&mut self) {
        for handle in &mut self.handles {
            if let Err(e) = handle.stop().await {
                warn!(cluster = %self.name, node = handle.name(), error = %e, "teardown stop failed");
            }
        }
        info!(cluster = %self.name, "torn down");
    }

    pub fn handle(&self, index: usize) -> Option<&ClusterHandle> {
        self.handles.get(index)
    }

    pub fn handle_mut(&mut self, index: usize) -> Option<&mut ClusterHandle> {
        self.handles.get_mut(index)
    }

    pub fn client(&self, index: usize) -> Result<Arc<dyn QueryClient>> {
        self.handles
            .get(index)
            .map(ClusterHandle::client)
            .ok_or(Error::NodeNotFound(index))
    }

    /// Client of a uniformly chosen live node.
    pub fn random_client(&mut self) -> Result<Arc<dyn QueryClient>> {
        let live = self.live_indices();
        let index = live
            .choose(&mut rand::thread_rng())
            .copied()
            .ok_or(Error::NoLiveNode)?;
        Ok(self.handles[index].client())
    }

    pub fn node_names(&self) -> Vec<String> {
        self.handles.iter().map(|h| h.name().to_string()).collect()
    }

    /// Point-in-time view of names, clients and liveness.
    pub fn snapshot(&mut self) -> ClusterSnapshot {
        let nodes = self
            .handles
            .iter_mut()
            .map(|h| NodeView {
                name: h.name().to_string(),
                live: h.is_live(),
                decommissioned: h.is_decommissioned(),
                client: h.client(),
            })
            .collect();
        ClusterSnapshot {
            cluster_name: self.name.clone(),
            nodes,
        }
    }

    fn live_indices(&mut self) -> Vec<usize> {
        self.handles
            .iter_mut()
            .enumerate()
            .filter_map(|(i, h)| h.is_live().then_some(i))
            .collect()
    }

    /// Provisioned nodes that are expected to be cluster members.
    fn member_count(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_decommissioned()).count()
    }

    fn ensure_members_running(&mut self) -> Result<()> {
        for handle in &mut self.handles {
            if !handle.is_decommissioned() && !handle.process_mut().is_running() {
                warn!(cluster = %self.name, node = handle.name(), "member is not running");
                return Err(Error::NodeNotRunning(handle.name().to_string()));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ClusterHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterHarness")
            .field("name", &self.name)
            .field("transport_range", &self.transport_range)
            .field("handles", &self.handles)
            .finish_non_exhaustive()
    }
}

/// One node as seen by [`ClusterSnapshot`].
#[derive(Clone)]
pub struct NodeView {
    pub name: String,
    pub live: bool,
    pub decommissioned: bool,
    pub client: Arc<dyn QueryClient>,
}

/// Cloneable view handed to workloads and verifiers.
#[derive(Clone)]
pub struct ClusterSnapshot {
    pub cluster_name: String,
    pub nodes: Vec<NodeView>,
}

impl ClusterSnapshot {
    pub fn node_names(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.name.clone()).collect()
    }

    pub fn client(&self, index: usize) -> Option<Arc<dyn QueryClient>> {
        self.nodes.get(index).map(|n| Arc::clone(&n.client))
    }

    /// Clients of nodes that were live when the snapshot was taken.
    pub fn live_clients(&self) -> Vec<Arc<dyn QueryClient>> {
        self.nodes
            .iter()
            .filter(|n| n.live)
            .map(|n| Arc::clone(&n.client))
            .collect()
    }

    pub fn random_client(&self) -> Option<Arc<dyn QueryClient>> {
        self.live_clients().choose(&mut rand::thread_rng()).cloned()
    }
}

impl std::fmt::Debug for ClusterSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterSnapshot")
            .field("cluster_name", &self.cluster_name)
            .field("nodes", &self.node_names())
            .finish()
    }
}
