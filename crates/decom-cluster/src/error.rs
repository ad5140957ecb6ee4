//! Error types for cluster management.

use decom_client::QueryError;
use std::time::Duration;
use thiserror::Error;

/// Cluster management errors.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid node count.
    #[error("Invalid node count: {0} (must be >= 1)")]
    InvalidNodeCount(usize),

    /// The allocator has no free ports left.
    #[error("Port pool exhausted: wanted {wanted} ports, next free is {next} of {end}")]
    PortsExhausted { wanted: usize, next: u32, end: u16 },

    /// Node not found.
    #[error("Node {0} not found")]
    NodeNotFound(usize),

    /// Node already running.
    #[error("Node {0} is already running")]
    NodeAlreadyRunning(String),

    /// A node that should be up has no live process.
    #[error("Node {0} is not running")]
    NodeNotRunning(String),

    /// A single start attempt failed.
    #[error("Node {0} failed to start: {1}")]
    NodeStartFailed(String, String),

    /// Every start attempt for a node failed; the cluster was torn down.
    #[error("Could not start node {node}: max retries ({attempts}) exceeded: {last}")]
    StartupFailed {
        node: String,
        attempts: u32,
        last: String,
    },

    /// Process spawn error.
    #[error("Failed to spawn process: {0}")]
    SpawnError(String),

    /// Signal delivery failed.
    #[error("Failed to signal node {node}: {reason}")]
    Signal { node: String, reason: String },

    /// Unknown signal name in configuration.
    #[error("Unsupported signal: {0}")]
    UnsupportedSignal(String),

    /// The node did not honour a graceful stop in time.
    #[error("Node {node} did not stop within {timeout:?} after graceful shutdown request")]
    DecommissionTimeout { node: String, timeout: Duration },

    /// Not every node joined the cluster in time.
    #[error("Cluster reported {seen}/{expected} nodes after {timeout:?}")]
    QuorumTimeout {
        seen: i64,
        expected: usize,
        timeout: Duration,
    },

    /// No live node is left to run a query against.
    #[error("No live node available")]
    NoLiveNode,

    /// Query failure against the cluster.
    #[error("Query failed: {0}")]
    Query(#[from] QueryError),

    /// The cluster manifest could not be rendered.
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

/// Result type for cluster operations.
pub type Result<T> = std::result::Result<T, Error>;
