//! In-memory cluster used by the integration tests.
//!
//! Models just enough of a sharded SQL database to exercise the harness:
//! node membership, shard placement with replicas, relocation on graceful
//! stop according to `cluster.graceful_stop.min_availability`, and the
//! statements the built-in scenarios and workloads issue.

#![allow(dead_code)]

use async_trait::async_trait;
use decom_client::{QueryClient, QueryError, QueryResponse, TABLE_UNKNOWN_CODE};
use decom_cluster::{NodeLauncher, NodeSpec, PortAllocator, ProcessControl};
use decom_config::HarnessConfig;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
struct SimTable {
    /// shard -> copies (index 0 is the primary) -> hosting node.
    shards: Vec<Vec<Option<String>>>,
    rows: BTreeMap<i64, String>,
}

#[derive(Debug, Default)]
struct SimState {
    running: BTreeMap<String, bool>,
    settings: BTreeMap<String, Value>,
    tables: BTreeMap<String, SimTable>,
    transient_budget: u32,
    failing_starts: HashMap<String, u32>,
    statements: Vec<String>,
}

/// Outcome of a graceful leave request.
enum Leave {
    Exited,
    Stuck,
}

/// Shared state of one simulated cluster.
#[derive(Debug, Default)]
pub struct SimCluster {
    state: Mutex<SimState>,
    /// Statements starting with this prefix fail with the given message.
    injected: Mutex<Option<(String, String)>>,
    pub injected_raised: AtomicU64,
}

impl SimCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap()
    }

    pub fn fail_starts(&self, node: &str, times: u32) {
        self.state().failing_starts.insert(node.to_string(), times);
    }

    pub fn inject_failure(&self, prefix: &str, message: &str) {
        *self.injected.lock().unwrap() = Some((prefix.to_string(), message.to_string()));
    }

    pub fn setting(&self, key: &str) -> Option<Value> {
        self.state().settings.get(key).cloned()
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.state().tables.contains_key(table)
    }

    pub fn running_nodes(&self) -> Vec<String> {
        self.state()
            .running
            .iter()
            .filter_map(|(n, up)| up.then(|| n.clone()))
            .collect()
    }

    pub fn unassigned(&self) -> usize {
        self.state()
            .tables
            .values()
            .flat_map(|t| t.shards.iter().flatten())
            .filter(|c| c.is_none())
            .count()
    }

    pub fn statements(&self) -> Vec<String> {
        self.state().statements.clone()
    }

    fn is_running(&self, node: &str) -> bool {
        self.state().running.get(node).copied().unwrap_or(false)
    }

    fn start(&self, node: &str) -> Result<(), String> {
        let mut state = self.state();
        if let Some(left) = state.failing_starts.get_mut(node) {
            if *left > 0 {
                *left -= 1;
                return Err("bind failed".to_string());
            }
        }
        state.running.insert(node.to_string(), true);
        Ok(())
    }

    fn kill(&self, node: &str) {
        self.state().running.insert(node.to_string(), false);
    }

    /// Moves shard copies off `node` as the availability setting demands.
    fn leave(&self, node: &str) -> Leave {
        let mut state = self.state();
        let availability = state
            .settings
            .get("cluster.graceful_stop.min_availability")
            .and_then(Value::as_str)
            .unwrap_or("primaries")
            .to_string();
        let force = state
            .settings
            .get("cluster.graceful_stop.force")
            .and_then(Value::as_str)
            .is_some_and(|v| v == "true");

        let targets: Vec<String> = state
            .running
            .iter()
            .filter(|(n, up)| **up && n.as_str() != node)
            .map(|(n, _)| n.clone())
            .collect();

        let mut plan = Vec::new();
        for (table, t) in &state.tables {
            for (shard, copies) in t.shards.iter().enumerate() {
                for (copy, host) in copies.iter().enumerate() {
                    if host.as_deref() != Some(node) {
                        continue;
                    }
                    let must_move = match availability.as_str() {
                        "full" => true,
                        "primaries" => copy == 0,
                        _ => false,
                    };
                    let target = targets
                        .iter()
                        .find(|n| !copies.iter().any(|h| h.as_deref() == Some(n.as_str())))
                        .cloned();
                    if must_move && target.is_none() && !force {
                        return Leave::Stuck;
                    }
                    let destination = if availability == "none" { None } else { target };
                    plan.push((table.clone(), shard, copy, destination));
                }
            }
        }

        for (table, shard, copy, destination) in plan {
            if let Some(t) = state.tables.get_mut(&table) {
                t.shards[shard][copy] = destination;
            }
        }
        state.running.insert(node.to_string(), false);
        state.transient_budget = 1;
        Leave::Exited
    }

    fn execute(&self, node: &str, statement: &str, params: &[Value]) -> decom_client::Result<QueryResponse> {
        if let Some((prefix, message)) = self.injected.lock().unwrap().as_ref() {
            if statement.starts_with(prefix.as_str()) {
                self.injected_raised.fetch_add(1, Ordering::SeqCst);
                return Err(QueryError::sql(message.clone()));
            }
        }

        let mut state = self.state();
        if !state.running.get(node).copied().unwrap_or(false) {
            return Err(QueryError::Transport(format!("{node}: connection refused")));
        }
        state.statements.push(statement.to_string());
        let lower = statement.trim().to_ascii_lowercase();

        if lower == "select name from sys.nodes" {
            let rows = state
                .running
                .iter()
                .filter(|(_, up)| **up)
                .map(|(n, _)| vec![json!(n)])
                .collect();
            return Ok(QueryResponse::from_rows(&["name"], rows));
        }

        if lower.contains("from sys.shards") {
            if state.transient_budget > 0 {
                state.transient_budget -= 1;
                return Err(QueryError::sql("Node 'gone' not found in cluster state"));
            }
            let rows = state
                .tables
                .iter()
                .flat_map(|(name, t)| {
                    t.shards.iter().enumerate().flat_map(move |(id, copies)| {
                        copies
                            .iter()
                            .filter(|c| c.is_none())
                            .map(move |_| vec![json!(name), json!(id)])
                    })
                })
                .collect();
            return Ok(QueryResponse::from_rows(&["table_name", "id"], rows));
        }

        if let Some(rest) = lower.strip_prefix("set global transient ") {
            let key = rest.split_whitespace().next().unwrap_or_default().to_string();
            let value = params.first().cloned().unwrap_or(Value::Null);
            state.settings.insert(key, value);
            return Ok(QueryResponse::affected(1));
        }

        if let Some(rest) = lower.strip_prefix("create table ") {
            let table = table_name(rest);
            let shards = number_after(&lower, "clustered into").unwrap_or(4) as usize;
            let replicas = number_after(&lower, "number_of_replicas").unwrap_or(1) as usize;
            let nodes: Vec<String> = state
                .running
                .iter()
                .filter(|(_, up)| **up)
                .map(|(n, _)| n.clone())
                .collect();
            let shards = (0..shards)
                .map(|i| {
                    (0..=replicas)
                        .map(|copy| (copy < nodes.len()).then(|| nodes[(i + copy) % nodes.len()].clone()))
                        .collect()
                })
                .collect();
            state.tables.insert(
                table,
                SimTable {
                    shards,
                    rows: BTreeMap::new(),
                },
            );
            return Ok(QueryResponse::affected(1));
        }

        if let Some(rest) = lower.strip_prefix("drop table ") {
            let (if_exists, rest) = match rest.strip_prefix("if exists ") {
                Some(rest) => (true, rest),
                None => (false, rest),
            };
            let table = table_name(rest);
            if state.tables.remove(&table).is_none() && !if_exists {
                return Err(unknown_table(&table));
            }
            return Ok(QueryResponse::affected(1));
        }

        if let Some(rest) = lower.strip_prefix("refresh table ") {
            let table = table_name(rest);
            return if state.tables.contains_key(&table) {
                Ok(QueryResponse::affected(-1))
            } else {
                Err(unknown_table(&table))
            };
        }

        if let Some(rest) = lower.strip_prefix("insert into ") {
            let table = table_name(rest);
            let t = state.tables.get_mut(&table).ok_or_else(|| unknown_table(&table))?;
            let mut inserted = 0;
            for pair in params.chunks(2) {
                if let [id, name] = pair {
                    t.rows.insert(id.as_i64().unwrap_or_default(), name.as_str().unwrap_or_default().to_string());
                    inserted += 1;
                }
            }
            return Ok(QueryResponse::affected(inserted));
        }

        if let Some(rest) = lower.strip_prefix("delete from ") {
            let table = table_name(rest);
            let t = state.tables.get_mut(&table).ok_or_else(|| unknown_table(&table))?;
            let prefix = params
                .first()
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim_end_matches('%')
                .to_string();
            let before = t.rows.len();
            t.rows.retain(|_, name| !name.starts_with(&prefix));
            return Ok(QueryResponse::affected((before - t.rows.len()) as i64));
        }

        if lower.starts_with("select name, count(*) from ") {
            let table = table_name(&lower["select name, count(*) from ".len()..]);
            let t = state.tables.get(&table).ok_or_else(|| unknown_table(&table))?;
            let mut counts: BTreeMap<&str, i64> = BTreeMap::new();
            for name in t.rows.values() {
                *counts.entry(name.as_str()).or_default() += 1;
            }
            let rows = counts.into_iter().map(|(n, c)| vec![json!(n), json!(c)]).collect();
            return Ok(QueryResponse::from_rows(&["name", "count(*)"], rows));
        }

        Err(QueryError::sql(format!("SQLParseException: cannot handle `{statement}`")))
    }
}

fn table_name(rest: &str) -> String {
    rest.split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or_default()
        .to_string()
}

fn number_after(haystack: &str, marker: &str) -> Option<u32> {
    let start = haystack.find(marker)? + marker.len();
    haystack[start..]
        .trim_start_matches([' ', '='])
        .split(|c: char| !c.is_ascii_digit())
        .next()?
        .parse()
        .ok()
}

fn unknown_table(table: &str) -> QueryError {
    QueryError::Sql {
        code: Some(TABLE_UNKNOWN_CODE),
        message: format!("RelationUnknown[Relation '{table}' unknown]"),
    }
}

const RELOCATION_TIME: Duration = Duration::from_millis(50);

struct SimProcess {
    name: String,
    sim: Arc<SimCluster>,
    signalled: bool,
    exit: Option<i32>,
}

#[async_trait]
impl ProcessControl for SimProcess {
    async fn start(&mut self) -> decom_cluster::Result<()> {
        self.sim
            .start(&self.name)
            .map_err(|e| decom_cluster::Error::NodeStartFailed(self.name.clone(), e))?;
        self.signalled = false;
        self.exit = None;
        Ok(())
    }

    async fn stop(&mut self) -> decom_cluster::Result<()> {
        self.sim.kill(&self.name);
        Ok(())
    }

    async fn wait(&mut self, timeout: Duration) -> decom_cluster::Result<Option<i32>> {
        if self.exit.is_some() {
            return Ok(self.exit);
        }
        if !self.sim.is_running(&self.name) {
            return Err(decom_cluster::Error::NodeNotRunning(self.name.clone()));
        }
        if self.signalled {
            // Relocation is not instantaneous; workloads keep running meanwhile.
            tokio::time::sleep(RELOCATION_TIME.min(timeout)).await;
            if let Leave::Exited = self.sim.leave(&self.name) {
                self.exit = Some(0);
                return Ok(self.exit);
            }
        }
        tokio::time::sleep(timeout).await;
        Ok(None)
    }

    fn send_graceful_shutdown(&mut self) -> decom_cluster::Result<()> {
        self.signalled = true;
        Ok(())
    }

    fn is_running(&mut self) -> bool {
        self.sim.is_running(&self.name)
    }

    fn pid(&self) -> Option<u32> {
        None
    }
}

struct SimClient {
    node: String,
    port: u16,
    sim: Arc<SimCluster>,
}

#[async_trait]
impl QueryClient for SimClient {
    async fn execute(&self, statement: &str, params: &[Value]) -> decom_client::Result<QueryResponse> {
        self.sim.execute(&self.node, statement, params)
    }

    async fn execute_bulk(
        &self,
        statement: &str,
        bulk_params: &[Vec<Value>],
    ) -> decom_client::Result<QueryResponse> {
        let mut total = 0;
        for params in bulk_params {
            total += self.sim.execute(&self.node, statement, params)?.rowcount.max(0);
        }
        Ok(QueryResponse::affected(total))
    }

    fn endpoint(&self) -> String {
        format!("sim://{}:{}", self.node, self.port)
    }
}

/// Launches nodes into a [`SimCluster`].
pub struct SimLauncher {
    pub sim: Arc<SimCluster>,
}

impl NodeLauncher for SimLauncher {
    fn process(&self, spec: &NodeSpec) -> decom_cluster::Result<Box<dyn ProcessControl>> {
        Ok(Box::new(SimProcess {
            name: spec.name.clone(),
            sim: Arc::clone(&self.sim),
            signalled: false,
            exit: None,
        }))
    }

    fn client(&self, spec: &NodeSpec) -> decom_cluster::Result<Arc<dyn QueryClient>> {
        Ok(Arc::new(SimClient {
            node: spec.name.clone(),
            port: spec.http_port,
            sim: Arc::clone(&self.sim),
        }))
    }
}

/// Everything a scenario needs, wired to a fresh simulated cluster.
pub struct SimEnv {
    pub sim: Arc<SimCluster>,
    pub config: HarnessConfig,
    pub launcher: Arc<dyn NodeLauncher>,
    pub allocator: Arc<PortAllocator>,
}

impl SimEnv {
    pub fn new() -> Self {
        let sim = SimCluster::new();
        Self {
            launcher: Arc::new(SimLauncher {
                sim: Arc::clone(&sim),
            }),
            sim,
            config: HarnessConfig::fast(),
            allocator: Arc::new(PortAllocator::unprobed(50_000, 51_000)),
        }
    }
}
