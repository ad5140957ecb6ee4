//! Error types for scenario orchestration.

use crate::OperationKind;
use decom_client::QueryError;
use std::time::Duration;
use thiserror::Error;

/// Shard-state verification failures.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The row count never satisfied the predicate.
    ///
    /// `last_rowcount` is `None` when every read within the deadline hit a
    /// transient cluster-state error.
    #[error("`{statement}` did not return {expected} rows within {deadline:?} (last row count: {})", .last_rowcount.map_or_else(|| "none".to_string(), |n| n.to_string()))]
    Timeout {
        statement: String,
        expected: String,
        last_rowcount: Option<i64>,
        deadline: Duration,
    },

    /// A non-retryable query failure.
    #[error(transparent)]
    Query(#[from] QueryError),
}

/// An error a workload worker recorded.
#[derive(Debug, Error)]
pub enum WorkloadError {
    /// A statement failed with a non-benign error.
    #[error("{kind} failed: {source}")]
    Query {
        kind: OperationKind,
        #[source]
        source: QueryError,
    },

    /// The worker loop panicked.
    #[error("{kind} worker panicked: {message}")]
    Panicked { kind: OperationKind, message: String },
}

impl WorkloadError {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Query { kind, .. } | Self::Panicked { kind, .. } => *kind,
        }
    }
}

/// Scenario failures.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("cluster error: {0}")]
    Cluster(#[from] decom_cluster::Error),

    #[error("query error: {0}")]
    Query(#[from] QueryError),

    #[error("verification failed: {0}")]
    Verify(#[from] VerifyError),

    /// An operation needed a cluster before one was provisioned.
    #[error("no cluster provisioned")]
    NotProvisioned,
}

/// Result type for scenario operations.
pub type Result<T> = std::result::Result<T, ScenarioError>;
