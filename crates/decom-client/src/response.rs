//! Query response decoding.

use crate::QueryError;
use serde::Deserialize;
use serde_json::Value;

/// Rows and row count returned by a statement.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct QueryResponse {
    /// Column names, in result order.
    #[serde(default)]
    pub cols: Vec<String>,

    /// Result rows. Empty for DML.
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,

    /// Rows returned (queries) or affected (DML). `-1` when unknown.
    #[serde(default = "unknown_rowcount")]
    pub rowcount: i64,
}

fn unknown_rowcount() -> i64 {
    -1
}

impl QueryResponse {
    /// Builds a response from literal rows; `rowcount` equals the row count.
    pub fn from_rows(cols: &[&str], rows: Vec<Vec<Value>>) -> Self {
        Self {
            cols: cols.iter().map(ToString::to_string).collect(),
            rowcount: rows.len() as i64,
            rows,
        }
    }

    /// Builds a DML-style response carrying only an affected-row count.
    pub fn affected(rowcount: i64) -> Self {
        Self {
            cols: Vec::new(),
            rows: Vec::new(),
            rowcount,
        }
    }

    /// Returns the index of a named column.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.cols.iter().position(|c| c == name)
    }

    /// Iterates a single column across all rows.
    pub fn column<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a Value> + use<'a> {
        let idx = self.column_index(name);
        self.rows
            .iter()
            .filter_map(move |row| idx.and_then(|i| row.get(i)))
    }
}

/// Per-row outcome of a bulk request.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct BulkResult {
    #[serde(default = "unknown_rowcount")]
    pub rowcount: i64,
}

/// Wire shape of a successful bulk request.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct BulkResponse {
    #[serde(default)]
    pub results: Vec<BulkResult>,
}

/// Row count a bulk result reports for a parameter set that failed.
pub const BULK_ROW_FAILED: i64 = -2;

impl TryFrom<BulkResponse> for QueryResponse {
    type Error = QueryError;

    /// Sums the affected rows. Any failed parameter set fails the whole request.
    fn try_from(bulk: BulkResponse) -> Result<Self, QueryError> {
        let failed: Vec<usize> = bulk
            .results
            .iter()
            .enumerate()
            .filter_map(|(i, r)| (r.rowcount == BULK_ROW_FAILED).then_some(i))
            .collect();
        if let Some(first) = failed.first() {
            return Err(QueryError::sql(format!(
                "bulk request failed for {} of {} parameter sets (first at index {first})",
                failed.len(),
                bulk.results.len()
            )));
        }

        let total = bulk.results.iter().map(|r| r.rowcount.max(0)).sum();
        Ok(QueryResponse::affected(total))
    }
}

/// Wire shape of an error response.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorBody {
    pub message: String,
    #[serde(default)]
    pub code: Option<i64>,
}
