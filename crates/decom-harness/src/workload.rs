//! Concurrent query workloads that race a decommission.
//!
//! Workers loop until a shared flag is cleared. Stopping waits on a barrier
//! sized to every worker plus the caller, so the recorded errors are complete
//! and frozen by the time [`RunningWorkload::stop`] returns.

use crate::WorkloadError;
use decom_client::{QueryClient, QueryError};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::{Value, json};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Barrier;
use tracing::{debug, info, warn};

/// Letters shuffled into generated row names.
const NAME_ALPHABET: &[u8] = b"abcdefghijklmn";

/// Statement family a worker issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Select,
    Insert,
    Delete,
}

impl OperationKind {
    pub const ALL: [OperationKind; 3] = [Self::Select, Self::Insert, Self::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Insert => "insert",
            Self::Delete => "delete",
        }
    }

    pub fn statement(&self, table: &str) -> String {
        match self {
            Self::Select => format!("select name, count(*) from {table} group by name"),
            Self::Insert => format!(
                "insert into {table} (id, name) values ($1, $2) on duplicate key update name = $2"
            ),
            Self::Delete => format!("delete from {table} where name like ?"),
        }
    }

    pub fn params<R: Rng>(&self, rng: &mut R) -> Vec<Value> {
        match self {
            Self::Select => Vec::new(),
            Self::Insert => vec![json!(rng.gen_range(0..=i32::MAX)), json!(shuffled_name(rng))],
            Self::Delete => {
                let name = shuffled_name(rng);
                vec![json!(format!("{}%", &name[..3]))]
            }
        }
    }

    /// Errors this kind tolerates. Deletes race table drops.
    pub fn is_benign(&self, error: &QueryError) -> bool {
        matches!(self, Self::Delete) && error.is_table_unknown()
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "select" => Ok(Self::Select),
            "insert" => Ok(Self::Insert),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown operation kind: {other}")),
        }
    }
}

/// A permutation of [`NAME_ALPHABET`].
pub fn shuffled_name<R: Rng>(rng: &mut R) -> String {
    let mut letters = NAME_ALPHABET.to_vec();
    letters.shuffle(rng);
    letters.into_iter().map(char::from).collect()
}

/// Append-only error list shared by all workers of one run.
#[derive(Debug, Default)]
pub struct WorkloadResult {
    errors: Mutex<Vec<WorkloadError>>,
}

impl WorkloadResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, error: WorkloadError) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(error);
    }

    pub fn len(&self) -> usize {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take(&self) -> Vec<WorkloadError> {
        std::mem::take(&mut *self.errors.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Spawns workload workers against one client.
#[derive(Debug, Clone)]
pub struct WorkloadDriver {
    table: String,
}

impl WorkloadDriver {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Starts `concurrency_per_kind` workers for each kind in `kinds`.
    ///
    /// Must be called within a tokio runtime.
    pub fn run(
        &self,
        client: Arc<dyn QueryClient>,
        kinds: &[OperationKind],
        concurrency_per_kind: usize,
    ) -> RunningWorkload {
        let workers = kinds.len() * concurrency_per_kind;
        let active = Arc::new(AtomicBool::new(true));
        let barrier = Arc::new(Barrier::new(workers + 1));
        let result = Arc::new(WorkloadResult::new());
        let operations = Arc::new(AtomicU64::new(0));

        info!(table = %self.table, workers, endpoint = %client.endpoint(), "starting workload");

        for &kind in kinds {
            for _ in 0..concurrency_per_kind {
                let worker = Worker {
                    kind,
                    statement: kind.statement(&self.table),
                    client: Arc::clone(&client),
                    active: Arc::clone(&active),
                    result: Arc::clone(&result),
                    operations: Arc::clone(&operations),
                };
                let barrier = Arc::clone(&barrier);
                let result = Arc::clone(&result);

                tokio::spawn(async move {
                    // The inner task isolates panics so the barrier is still reached.
                    if let Err(join_err) = tokio::spawn(worker.run()).await {
                        let message = if join_err.is_panic() {
                            panic_message(join_err.into_panic().as_ref())
                        } else {
                            "worker task cancelled".to_string()
                        };
                        warn!(%kind, %message, "workload worker aborted");
                        result.record(WorkloadError::Panicked { kind, message });
                    }
                    barrier.wait().await;
                });
            }
        }

        RunningWorkload {
            active,
            barrier,
            result,
            operations,
            workers,
        }
    }
}

struct Worker {
    kind: OperationKind,
    statement: String,
    client: Arc<dyn QueryClient>,
    active: Arc<AtomicBool>,
    result: Arc<WorkloadResult>,
    operations: Arc<AtomicU64>,
}

impl Worker {
    async fn run(self) {
        let mut rng = StdRng::from_entropy();
        while self.active.load(Ordering::Acquire) {
            let params = self.kind.params(&mut rng);
            let outcome = self.client.execute(&self.statement, &params).await;
            self.operations.fetch_add(1, Ordering::Relaxed);

            if let Err(err) = outcome {
                if self.kind.is_benign(&err) {
                    debug!(kind = %self.kind, error = %err, "ignoring benign error");
                } else {
                    self.result.record(WorkloadError::Query {
                        kind: self.kind,
                        source: err,
                    });
                }
            }
            // Clients that answer without suspending would otherwise starve the runtime.
            tokio::task::yield_now().await;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Handle to a running workload.
pub struct RunningWorkload {
    active: Arc<AtomicBool>,
    barrier: Arc<Barrier>,
    result: Arc<WorkloadResult>,
    operations: Arc<AtomicU64>,
    workers: usize,
}

impl RunningWorkload {
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Errors recorded so far; may still grow.
    pub fn errors_so_far(&self) -> usize {
        self.result.len()
    }

    /// Statements completed so far, successful or not.
    pub fn operations_so_far(&self) -> u64 {
        self.operations.load(Ordering::Relaxed)
    }

    /// Clears the active flag, waits for every worker, and returns the
    /// recorded errors. No worker appends after this returns.
    pub async fn stop(self) -> Vec<WorkloadError> {
        self.active.store(false, Ordering::Release);
        self.barrier.wait().await;

        let errors = self.result.take();
        info!(
            workers = self.workers,
            operations = self.operations_so_far(),
            errors = errors.len(),
            "workload stopped"
        );
        errors
    }
}

impl fmt::Debug for RunningWorkload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningWorkload")
            .field("workers", &self.workers)
            .field("active", &self.active.load(Ordering::Relaxed))
            .field("errors", &self.result.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(OperationKind::Select, "select name, count(*) from t1 group by name")]
    #[test_case(OperationKind::Insert, "insert into t1 (id, name) values ($1, $2) on duplicate key update name = $2")]
    #[test_case(OperationKind::Delete, "delete from t1 where name like ?")]
    fn test_statements(kind: OperationKind, expected: &str) {
        assert_eq!(kind.statement("t1"), expected);
    }

    #[test]
    fn test_shuffled_name_is_permutation() {
        let mut rng = StdRng::seed_from_u64(7);
        let name = shuffled_name(&mut rng);
        let mut sorted: Vec<u8> = name.bytes().collect();
        sorted.sort_unstable();
        assert_eq!(sorted, NAME_ALPHABET);
    }

    #[test]
    fn test_params_shapes() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(OperationKind::Select.params(&mut rng).is_empty());

        let insert = OperationKind::Insert.params(&mut rng);
        assert!(insert[0].as_i64().unwrap() >= 0);
        assert_eq!(insert[1].as_str().unwrap().len(), 14);

        let delete = OperationKind::Delete.params(&mut rng);
        let pattern = delete[0].as_str().unwrap();
        assert_eq!(pattern.len(), 4);
        assert!(pattern.ends_with('%'));
    }

    #[test]
    fn test_benign_filtering() {
        let unknown = QueryError::sql("TableUnknownException: Table 'doc.t1' unknown");
        assert!(OperationKind::Delete.is_benign(&unknown));
        assert!(!OperationKind::Insert.is_benign(&unknown));
        assert!(!OperationKind::Select.is_benign(&unknown));
        assert!(!OperationKind::Delete.is_benign(&QueryError::sql("boom")));
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("Insert".parse::<OperationKind>().unwrap(), OperationKind::Insert);
        assert!("update".parse::<OperationKind>().is_err());
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
