//! Building blocks for decommission scenarios.

use crate::{
    ClusterStateVerifier, OperationKind, RunningWorkload, Result, ScenarioError, ShardStateQuery,
    WorkloadDriver,
};
use decom_client::QueryResponse;
use decom_cluster::{ClusterHarness, NodeLauncher, PortAllocator};
use decom_config::HarnessConfig;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// How much data must stay available while a node leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinAvailability {
    /// Primaries move off the node; replicas may be lost.
    Primaries,
    /// Every shard copy moves off the node.
    Full,
    /// The node leaves immediately.
    None,
}

impl MinAvailability {
    pub const SETTING: &'static str = "cluster.graceful_stop.min_availability";

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primaries => "primaries",
            Self::Full => "full",
            Self::None => "none",
        }
    }
}

impl fmt::Display for MinAvailability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MinAvailability {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "primaries" => Ok(Self::Primaries),
            "full" => Ok(Self::Full),
            "none" => Ok(Self::None),
            other => Err(format!("unknown min_availability: {other}")),
        }
    }
}

/// One scenario run: a cluster plus the tools that act on it.
pub struct Scenario {
    name: String,
    config: HarnessConfig,
    launcher: Arc<dyn NodeLauncher>,
    allocator: Arc<PortAllocator>,
    harness: Option<ClusterHarness>,
    driver: WorkloadDriver,
}

impl Scenario {
    pub fn new(
        name: impl Into<String>,
        config: HarnessConfig,
        launcher: Arc<dyn NodeLauncher>,
        allocator: Arc<PortAllocator>,
    ) -> Self {
        let driver = WorkloadDriver::new(config.workload.table.clone());
        Self {
            name: name.into(),
            config,
            launcher,
            allocator,
            harness: None,
            driver,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Table the built-in statements and workloads target.
    pub fn table(&self) -> &str {
        self.driver.table()
    }

    pub fn harness(&self) -> Result<&ClusterHarness> {
        self.harness.as_ref().ok_or(ScenarioError::NotProvisioned)
    }

    pub fn harness_mut(&mut self) -> Result<&mut ClusterHarness> {
        self.harness.as_mut().ok_or(ScenarioError::NotProvisioned)
    }

    /// Provisions, starts and waits for a cluster of `node_count` nodes.
    ///
    /// A previously provisioned cluster is torn down first.
    pub async fn provision_cluster(&mut self, node_count: usize) -> Result<()> {
        self.teardown().await;

        let mut harness = ClusterHarness::provision(
            &self.name,
            node_count,
            &self.config.cluster.node_settings_map(),
            &self.allocator,
            self.launcher.as_ref(),
            &self.config,
        )?;
        harness.start().await?;

        if let Err(e) = harness.await_quorum(self.config.quorum.timeout()).await {
            harness.teardown().await;
            return Err(e.into());
        }

        info!(scenario = %self.name, nodes = node_count, "cluster ready");
        self.harness = Some(harness);
        Ok(())
    }

    /// Gracefully stops node `node_index` and returns its exit code.
    pub async fn decommission(&mut self, node_index: usize, timeout: Duration) -> Result<i32> {
        Ok(self.harness_mut()?.decommission(node_index, timeout).await?)
    }

    /// Starts a workload against the first node.
    pub fn run_workload(
        &self,
        kinds: &[OperationKind],
        concurrency_per_kind: usize,
    ) -> Result<RunningWorkload> {
        self.run_workload_on(0, kinds, concurrency_per_kind)
    }

    /// Starts a workload against node `node_index`.
    pub fn run_workload_on(
        &self,
        node_index: usize,
        kinds: &[OperationKind],
        concurrency_per_kind: usize,
    ) -> Result<RunningWorkload> {
        let client = self.harness()?.client(node_index)?;
        Ok(self.driver.run(client, kinds, concurrency_per_kind))
    }

    /// Polls `query` on a live node until it holds.
    ///
    /// `timeout` overrides the configured verification deadline.
    pub async fn await_shard_invariant(
        &mut self,
        query: &ShardStateQuery,
        timeout: Option<Duration>,
    ) -> Result<QueryResponse> {
        let harness = self.harness.as_mut().ok_or(ScenarioError::NotProvisioned)?;
        let mut verifier =
            ClusterStateVerifier::new(harness.executor().clone(), &self.config.verify);
        if let Some(deadline) = timeout {
            verifier = verifier.with_deadline(deadline);
        }
        let client = harness.random_client()?;
        Ok(verifier.await_invariant(client.as_ref(), query).await?)
    }

    pub async fn push_settings(&mut self, settings: &BTreeMap<String, Value>) -> Result<()> {
        Ok(self.harness_mut()?.push_settings(settings).await?)
    }

    pub async fn set_min_availability(&mut self, availability: MinAvailability) -> Result<()> {
        let settings = BTreeMap::from([(
            MinAvailability::SETTING.to_string(),
            json!(availability.as_str()),
        )]);
        self.push_settings(&settings).await
    }

    /// Runs a statement on a random live node with retries.
    pub async fn execute(&mut self, statement: &str, params: &[Value]) -> Result<QueryResponse> {
        Ok(self.harness_mut()?.execute(statement, params).await?)
    }

    /// Runs a bulk statement on node `node_index`, without retries.
    pub async fn execute_bulk_on(
        &self,
        node_index: usize,
        statement: &str,
        bulk_params: &[Vec<Value>],
    ) -> Result<QueryResponse> {
        let client = self.harness()?.client(node_index)?;
        Ok(client.execute_bulk(statement, bulk_params).await?)
    }

    /// Stops every node of the current cluster, if any. Never fails.
    pub async fn teardown(&mut self) {
        if let Some(mut harness) = self.harness.take() {
            harness.teardown().await;
        }
    }

    /// Drops `table` on a live node; failures are logged.
    pub async fn drop_table_quietly(&mut self, table: &str) {
        if self.harness.is_none() {
            return;
        }
        let statement = format!("drop table if exists {table}");
        if let Err(e) = self.execute(&statement, &[]).await {
            warn!(scenario = %self.name, table, error = %e, "cleanup drop failed");
        }
    }
}

impl fmt::Debug for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scenario")
            .field("name", &self.name)
            .field("harness", &self.harness)
            .finish_non_exhaustive()
    }
}
