//! Built-in graceful-stop scenarios.
//!
//! Each scenario provisions its own cluster, always drops its table and
//! tears the cluster down, and reports a [`ScenarioOutcome`] instead of
//! failing.

use crate::{MinAvailability, OperationKind, Scenario, ShardStateQuery};
use anyhow::{Context, ensure};
use decom_cluster::{NodeLauncher, PortAllocator};
use decom_config::HarnessConfig;
use rand::seq::SliceRandom;
use rand::thread_rng;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Rows bulk-loaded before the concurrent scenario starts its workload.
const BULK_ROWS: usize = 5000;

const NAMES: [&str; 4] = ["Ford", "Trillian", "Zaphod", "Jeltz"];

/// The scenarios shipped with the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinScenario {
    Signal,
    Primaries,
    Full,
    None,
    Concurrent,
}

impl BuiltinScenario {
    pub const ALL: [BuiltinScenario; 5] = [
        Self::Signal,
        Self::Primaries,
        Self::Full,
        Self::None,
        Self::Concurrent,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Signal => "signal",
            Self::Primaries => "primaries",
            Self::Full => "full",
            Self::None => "none",
            Self::Concurrent => "concurrent",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Signal => "single node exits 0 on the graceful-stop signal",
            Self::Primaries => "min_availability=primaries keeps every shard assigned",
            Self::Full => "min_availability=full moves every shard copy off the node",
            Self::None => "min_availability=none leaves unreplicated shards unassigned",
            Self::Concurrent => "decommission under select/insert/delete load records no errors",
        }
    }

    /// Cluster name; node names derive from it.
    fn cluster_name(&self) -> &'static str {
        match self {
            Self::Signal => "GracefulStopSignal",
            Self::Primaries => "GracefulStopPrimaries",
            Self::Full => "GracefulStopFull",
            Self::None => "GracefulStopNone",
            Self::Concurrent => "GracefulStopConcurrent",
        }
    }
}

impl fmt::Display for BuiltinScenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BuiltinScenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|b| b.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown scenario: {s}"))
    }
}

/// Result of one scenario run.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioOutcome {
    pub name: String,
    pub passed: bool,
    pub detail: String,
    pub duration_ms: u128,
}

impl fmt::Display for ScenarioOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.passed { "PASS" } else { "FAIL" };
        write!(
            f,
            "{status} {} ({} ms): {}",
            self.name, self.duration_ms, self.detail
        )
    }
}

/// Runs one built-in scenario to completion.
pub async fn run_builtin(
    builtin: BuiltinScenario,
    config: &HarnessConfig,
    launcher: Arc<dyn NodeLauncher>,
    allocator: Arc<PortAllocator>,
) -> ScenarioOutcome {
    let started = Instant::now();
    let mut scenario = Scenario::new(builtin.cluster_name(), config.clone(), launcher, allocator);
    info!(scenario = %builtin, "running");

    let result = match builtin {
        BuiltinScenario::Signal => signal(&mut scenario).await,
        BuiltinScenario::Primaries => primaries(&mut scenario).await,
        BuiltinScenario::Full => full(&mut scenario).await,
        BuiltinScenario::None => none(&mut scenario).await,
        BuiltinScenario::Concurrent => concurrent(&mut scenario).await,
    };

    let table = scenario.table().to_string();
    scenario.drop_table_quietly(&table).await;
    scenario.teardown().await;

    let (passed, detail) = match result {
        Ok(detail) => (true, detail),
        Err(e) => {
            let message = format!("{e:#}");
            error!(scenario = %builtin, error = %message, "scenario failed");
            (false, message)
        }
    };
    ScenarioOutcome {
        name: builtin.name().to_string(),
        passed,
        detail,
        duration_ms: started.elapsed().as_millis(),
    }
}

/// Runs scenarios one after another.
pub async fn run_all(
    builtins: &[BuiltinScenario],
    config: &HarnessConfig,
    launcher: Arc<dyn NodeLauncher>,
    allocator: Arc<PortAllocator>,
) -> Vec<ScenarioOutcome> {
    let mut outcomes = Vec::with_capacity(builtins.len());
    for &builtin in builtins {
        outcomes.push(run_builtin(builtin, config, Arc::clone(&launcher), Arc::clone(&allocator)).await);
    }
    outcomes
}

fn decommission_timeout(scenario: &Scenario) -> Duration {
    scenario.config().decommission.timeout()
}

async fn create_table(scenario: &mut Scenario, shards: u32, replicas: u32) -> anyhow::Result<()> {
    let statement = format!(
        "create table {} (id int, name string) clustered into {shards} shards with (number_of_replicas = {replicas})",
        scenario.table()
    );
    scenario
        .execute(&statement, &[])
        .await
        .context("creating table")?;
    Ok(())
}

async fn refresh(scenario: &mut Scenario) -> anyhow::Result<()> {
    let statement = format!("refresh table {}", scenario.table());
    scenario.execute(&statement, &[]).await.context("refreshing table")?;
    Ok(())
}

/// Two fixed rows, enough to place data on the shards.
async fn seed_two_rows(scenario: &mut Scenario) -> anyhow::Result<()> {
    let statement = format!(
        "insert into {} (id, name) values (?, ?), (?, ?)",
        scenario.table()
    );
    scenario
        .execute(&statement, &[json!(1), json!("Ford"), json!(2), json!("Trillian")])
        .await
        .context("seeding rows")?;
    refresh(scenario).await
}

async fn signal(scenario: &mut Scenario) -> anyhow::Result<String> {
    scenario.provision_cluster(1).await?;
    let timeout = decommission_timeout(scenario);
    let code = scenario.decommission(0, timeout).await?;
    ensure!(code == 0, "node stopped with exit code {code}, expected 0");
    Ok("node exited with code 0".to_string())
}

async fn primaries(scenario: &mut Scenario) -> anyhow::Result<String> {
    scenario.provision_cluster(2).await?;
    create_table(scenario, 4, 0).await?;
    seed_two_rows(scenario).await?;

    scenario.set_min_availability(MinAvailability::Primaries).await?;
    let timeout = decommission_timeout(scenario);
    let code = scenario.decommission(0, timeout).await?;

    let response = scenario
        .await_shard_invariant(&ShardStateQuery::no_unassigned(), None)
        .await?;
    Ok(format!(
        "node 0 exited with {code}; {} unassigned shards",
        response.rowcount
    ))
}

async fn full(scenario: &mut Scenario) -> anyhow::Result<String> {
    scenario.provision_cluster(3).await?;
    create_table(scenario, 4, 1).await?;
    seed_two_rows(scenario).await?;

    scenario.set_min_availability(MinAvailability::Full).await?;
    let timeout = decommission_timeout(scenario);
    let code = scenario.decommission(0, timeout).await?;

    let response = scenario
        .await_shard_invariant(&ShardStateQuery::no_unassigned(), None)
        .await?;
    Ok(format!(
        "node 0 exited with {code}; {} unassigned shards",
        response.rowcount
    ))
}

async fn none(scenario: &mut Scenario) -> anyhow::Result<String> {
    scenario.provision_cluster(2).await?;
    create_table(scenario, 8, 0).await?;
    refresh(scenario).await?;

    let statement = format!("insert into {} (id, name) values (?, ?)", scenario.table());
    for id in 0..16 {
        let name = NAMES.choose(&mut thread_rng()).copied().unwrap_or(NAMES[0]);
        scenario
            .execute(&statement, &[json!(id), json!(name)])
            .await
            .context("inserting rows")?;
    }
    refresh(scenario).await?;

    scenario.set_min_availability(MinAvailability::None).await?;
    let timeout = decommission_timeout(scenario);
    let code = scenario.decommission(0, timeout).await?;

    let response = scenario
        .await_shard_invariant(&ShardStateQuery::some_unassigned(), None)
        .await?;
    Ok(format!(
        "node 0 exited with {code}; {} unassigned shards",
        response.rowcount
    ))
}

async fn concurrent(scenario: &mut Scenario) -> anyhow::Result<String> {
    scenario.provision_cluster(3).await?;
    create_table(scenario, 4, 1).await?;
    scenario
        .push_settings(&BTreeMap::from([(
            "discovery.zen.minimum_master_nodes".to_string(),
            json!(2),
        )]))
        .await?;

    let rows: Vec<Vec<Value>> = {
        let mut rng = thread_rng();
        (0..BULK_ROWS)
            .map(|id| vec![json!(id), json!(crate::workload::shuffled_name(&mut rng))])
            .collect()
    };
    let statement = format!("insert into {} (id, name) values (?, ?)", scenario.table());
    scenario
        .execute_bulk_on(0, &statement, &rows)
        .await
        .context("bulk loading rows")?;
    refresh(scenario).await?;

    scenario
        .push_settings(&BTreeMap::from([
            (MinAvailability::SETTING.to_string(), json!(MinAvailability::Full.as_str())),
            ("cluster.graceful_stop.force".to_string(), json!("false")),
        ]))
        .await?;

    let concurrency = scenario.config().workload.concurrency_per_kind;
    let workload = scenario.run_workload(&OperationKind::ALL, concurrency)?;
    let timeout = decommission_timeout(scenario);
    let decommissioned = scenario.decommission(1, timeout).await;
    let operations = workload.operations_so_far();
    let errors = workload.stop().await;
    let code = decommissioned?;

    if !errors.is_empty() {
        let listed: Vec<String> = errors.iter().take(5).map(ToString::to_string).collect();
        anyhow::bail!(
            "{} workload errors during decommission, first: {}",
            errors.len(),
            listed.join("; ")
        );
    }
    Ok(format!(
        "node 1 exited with {code}; {operations} statements, no errors"
    ))
}
