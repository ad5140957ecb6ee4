//! Graceful decommission scenarios for a sharded SQL cluster.
//!
//! A [`Scenario`] owns one provisioned cluster and offers the operations the
//! built-in cases in [`scenarios`] are made of: workloads that race a
//! decommission ([`workload`]) and polling checks over `sys.shards`
//! ([`verifier`]).

pub mod error;
pub mod scenario;
pub mod scenarios;
pub mod verifier;
pub mod workload;

pub use error::{Result, ScenarioError, VerifyError, WorkloadError};
pub use scenario::{MinAvailability, Scenario};
pub use scenarios::{BuiltinScenario, ScenarioOutcome, run_all, run_builtin};
pub use verifier::{ClusterStateVerifier, RowCountPredicate, ShardStateQuery};
pub use workload::{OperationKind, RunningWorkload, WorkloadDriver, WorkloadResult, shuffled_name};
