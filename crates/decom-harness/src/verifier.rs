//! Polling shard-state checks.

use crate::VerifyError;
use decom_client::{QueryClient, QueryResponse, RetryingExecutor};
use decom_config::VerifySettings;
use std::fmt;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout};
use tracing::debug;

/// Expected row count of a shard-state query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowCountPredicate {
    Exactly(i64),
    GreaterThan(i64),
    AtLeast(i64),
}

impl RowCountPredicate {
    pub fn matches(&self, rowcount: i64) -> bool {
        match *self {
            Self::Exactly(n) => rowcount == n,
            Self::GreaterThan(n) => rowcount > n,
            Self::AtLeast(n) => rowcount >= n,
        }
    }
}

impl fmt::Display for RowCountPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exactly(n) => write!(f, "exactly {n}"),
            Self::GreaterThan(n) => write!(f, "more than {n}"),
            Self::AtLeast(n) => write!(f, "at least {n}"),
        }
    }
}

/// A query over `sys.shards` and the row count it must reach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardStateQuery {
    pub statement: String,
    pub predicate: RowCountPredicate,
}

impl ShardStateQuery {
    pub fn new(statement: impl Into<String>, predicate: RowCountPredicate) -> Self {
        Self {
            statement: statement.into(),
            predicate,
        }
    }

    /// Every shard copy is assigned.
    pub fn no_unassigned() -> Self {
        Self::new(
            "select table_name, id from sys.shards where state = 'UNASSIGNED'",
            RowCountPredicate::Exactly(0),
        )
    }

    /// At least one shard copy lost its node.
    pub fn some_unassigned() -> Self {
        Self::new(
            "select node['id'] as node_id, id, state from sys.shards where state = 'UNASSIGNED'",
            RowCountPredicate::GreaterThan(0),
        )
    }
}

/// Re-issues a [`ShardStateQuery`] until it holds or the deadline passes.
#[derive(Debug, Clone)]
pub struct ClusterStateVerifier {
    executor: RetryingExecutor,
    poll_interval: Duration,
    deadline: Duration,
}

impl ClusterStateVerifier {
    pub fn new(executor: RetryingExecutor, settings: &VerifySettings) -> Self {
        Self {
            executor,
            poll_interval: settings.poll_interval(),
            deadline: settings.deadline(),
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Returns the first response whose row count satisfies the predicate.
    ///
    /// Transient cluster-state errors are absorbed until the deadline is
    /// spent, including ones the executor gave up on. Any other query error
    /// ends the wait immediately. No query or sleep runs past the deadline.
    pub async fn await_invariant(
        &self,
        client: &dyn QueryClient,
        query: &ShardStateQuery,
    ) -> Result<QueryResponse, VerifyError> {
        let started = Instant::now();
        let mut last_rowcount = None;
        loop {
            let remaining = self.deadline.saturating_sub(started.elapsed());
            match timeout(remaining, self.executor.execute(client, &query.statement, &[])).await {
                Ok(Ok(response)) => {
                    if query.predicate.matches(response.rowcount) {
                        return Ok(response);
                    }
                    debug!(
                        rowcount = response.rowcount,
                        expected = %query.predicate,
                        "shard state not settled"
                    );
                    last_rowcount = Some(response.rowcount);
                }
                Ok(Err(err)) if err.is_transient_cluster_state() => {
                    debug!(error = %err, "cluster state still in flux");
                }
                Ok(Err(err)) => return Err(err.into()),
                Err(_) => {}
            }

            let elapsed = started.elapsed();
            if elapsed >= self.deadline {
                return Err(VerifyError::Timeout {
                    statement: query.statement.clone(),
                    expected: query.predicate.to_string(),
                    last_rowcount,
                    deadline: self.deadline,
                });
            }
            sleep(self.poll_interval.min(self.deadline - elapsed)).await;
        }
    }
}
