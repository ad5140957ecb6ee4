//! JSON-over-HTTP SQL client.

use crate::QueryClient;
use crate::error::{QueryError, Result};
use crate::response::{BulkResponse, ErrorEnvelope, QueryResponse};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::trace;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct SqlRequest<'a> {
    stmt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    args: Option<&'a [Value]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bulk_args: Option<&'a [Vec<Value>]>,
}

/// Client for a node's `/_sql` endpoint.
#[derive(Debug, Clone)]
pub struct HttpSqlClient {
    http: reqwest::Client,
    url: String,
}

impl HttpSqlClient {
    /// Creates a client for `http://{host}:{port}/_sql`.
    pub fn new(host: &str, port: u16) -> Result<Self> {
        Self::with_timeout(host, port, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Creates a client with a custom per-request timeout.
    pub fn with_timeout(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        if host.is_empty() || port == 0 {
            return Err(QueryError::InvalidEndpoint(format!("{host}:{port}")));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| QueryError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            url: format!("http://{host}:{port}/_sql"),
        })
    }

    async fn post(&self, request: &SqlRequest<'_>) -> Result<String> {
        trace!(url = %self.url, stmt = request.stmt, "sql request");
        let response = self
            .http
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| QueryError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| QueryError::Transport(e.to_string()))?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(decode_error(status.as_u16(), &body))
        }
    }
}

fn decode_error(status: u16, body: &str) -> QueryError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => QueryError::Sql {
            code: envelope.error.code,
            message: envelope.error.message,
        },
        Err(_) => QueryError::Sql {
            code: None,
            message: format!("HTTP {status}: {body}"),
        },
    }
}

#[async_trait]
impl QueryClient for HttpSqlClient {
    async fn execute(&self, statement: &str, params: &[Value]) -> Result<QueryResponse> {
        let request = SqlRequest {
            stmt: statement,
            args: (!params.is_empty()).then_some(params),
            bulk_args: None,
        };
        let body = self.post(&request).await?;
        serde_json::from_str(&body).map_err(|e| QueryError::Decode(e.to_string()))
    }

    async fn execute_bulk(
        &self,
        statement: &str,
        bulk_params: &[Vec<Value>],
    ) -> Result<QueryResponse> {
        let request = SqlRequest {
            stmt: statement,
            args: None,
            bulk_args: Some(bulk_params),
        };
        let body = self.post(&request).await?;
        let bulk: BulkResponse =
            serde_json::from_str(&body).map_err(|e| QueryError::Decode(e.to_string()))?;
        QueryResponse::try_from(bulk)
    }

    fn endpoint(&self) -> String {
        self.url.clone()
    }
}
