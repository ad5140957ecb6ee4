//! Query interface for driving a cluster under test.
//!
//! - [`QueryClient`]: the seam every cluster-facing call goes through
//! - [`HttpSqlClient`]: JSON-over-HTTP implementation against `/_sql`
//! - [`QueryError`] with [`ErrorKind`] classification of transient and benign failures
//! - [`RetryingExecutor`]: exponential backoff over transient cluster-state errors

pub mod error;
pub mod http;
pub mod response;
pub mod retry;

pub use error::{ErrorKind, QueryError, Result, TABLE_UNKNOWN_CODE};
pub use http::HttpSqlClient;
pub use response::{BULK_ROW_FAILED, QueryResponse};
pub use retry::{RetryPolicy, RetryingExecutor, execute_with_retry};

use async_trait::async_trait;
use serde_json::Value;

/// A handle capable of running SQL statements against one cluster endpoint.
///
/// Implementations must be shareable across concurrently running workload tasks.
#[async_trait]
pub trait QueryClient: Send + Sync {
    /// Executes a statement with positional parameters.
    async fn execute(&self, statement: &str, params: &[Value]) -> Result<QueryResponse>;

    /// Executes a statement once per parameter row. The returned row count is
    /// the sum over all rows; a row the server reports as failed fails the call.
    async fn execute_bulk(&self, statement: &str, bulk_params: &[Vec<Value>])
    -> Result<QueryResponse>;

    /// Human-readable endpoint, used in logs.
    fn endpoint(&self) -> String;
}
