//! Multi-node cluster management for decommission testing.
//!
//! Provides local cluster orchestration on a single host:
//! - Port allocation that keeps concurrently provisioned clusters apart
//! - Process control for every node, with startup retries
//! - Membership polling and cluster-wide settings over SQL
//! - Graceful decommission of single nodes

pub mod decommission;
pub mod error;
pub mod handle;
pub mod harness;
pub mod launcher;
pub mod ports;
pub mod process;
pub mod spec;

pub use decommission::DecommissionController;
pub use error::{Error, Result};
pub use handle::ClusterHandle;
pub use harness::{ClusterHarness, ClusterSnapshot, MEMBERSHIP_QUERY, NodeView};
pub use launcher::{CrateLauncher, NodeLauncher};
pub use ports::{PortAllocator, PortRange};
pub use process::{
    GracefulSignal, LaunchCommand, NodeProcess, NodeStatus, ProcessControl, Readiness, exit_code,
};
pub use spec::{ClusterManifest, NodeSpec};

/// Start attempts per node before provisioning gives up.
pub const MAX_START_ATTEMPTS: u32 = 3;
