//! Query error types and their classification.

use thiserror::Error;

/// Result type for query operations.
pub type Result<T> = std::result::Result<T, QueryError>;

/// Error code the SQL endpoint reports for an unknown relation.
pub const TABLE_UNKNOWN_CODE: i64 = 4041;

const TRANSIENT_PATTERNS: &[&str] = &["not found in cluster state", "Node not connected"];
const TABLE_UNKNOWN_PATTERNS: &[&str] = &["TableUnknownException", "RelationUnknown"];

/// Errors raised by a [`crate::QueryClient`].
#[derive(Debug, Error)]
pub enum QueryError {
    /// The endpoint rejected the statement.
    #[error("SQL error{}: {message}", .code.map(|c| format!(" [{c}]")).unwrap_or_default())]
    Sql {
        /// Structured error code, when the endpoint supplies one.
        code: Option<i64>,
        message: String,
    },

    /// The request never produced an SQL response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The response body could not be decoded.
    #[error("malformed response: {0}")]
    Decode(String),

    /// The endpoint URL is unusable.
    #[error("invalid endpoint {0}")]
    InvalidEndpoint(String),
}

/// Coarse classification used by retry and workload filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Cluster state briefly references a node that has left or is leaving.
    TransientClusterState,
    /// The target table does not exist (e.g. dropped concurrently).
    TableUnknown,
    /// Anything else.
    Other,
}

impl QueryError {
    /// Builds an SQL error without a structured code.
    pub fn sql(message: impl Into<String>) -> Self {
        Self::Sql {
            code: None,
            message: message.into(),
        }
    }

    /// Classifies this error. Structured codes win over message text.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Sql { code, message } => {
                if *code == Some(TABLE_UNKNOWN_CODE) {
                    return ErrorKind::TableUnknown;
                }
                if TRANSIENT_PATTERNS.iter().any(|p| message.contains(p)) {
                    ErrorKind::TransientClusterState
                } else if TABLE_UNKNOWN_PATTERNS.iter().any(|p| message.contains(p)) {
                    ErrorKind::TableUnknown
                } else {
                    ErrorKind::Other
                }
            }
            Self::Transport(_) | Self::Decode(_) | Self::InvalidEndpoint(_) => ErrorKind::Other,
        }
    }

    /// True for errors the retrying executor absorbs by default.
    pub fn is_transient_cluster_state(&self) -> bool {
        self.kind() == ErrorKind::TransientClusterState
    }

    /// True when the target table is missing.
    pub fn is_table_unknown(&self) -> bool {
        self.kind() == ErrorKind::TableUnknown
    }
}
