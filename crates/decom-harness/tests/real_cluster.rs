//! Built-in scenarios against a real installation.
//!
//! Run with `CRATE_HOME=/path/to/crate cargo test -p decom-harness -- --ignored`.

use decom_cluster::{CrateLauncher, GracefulSignal, NodeLauncher, PortAllocator};
use decom_config::HarnessConfig;
use decom_harness::{BuiltinScenario, run_builtin};
use std::path::PathBuf;
use std::sync::Arc;

fn environment() -> Option<(HarnessConfig, Arc<dyn NodeLauncher>, Arc<PortAllocator>)> {
    let crate_home = PathBuf::from(std::env::var_os("CRATE_HOME")?);
    let run_dir = tempfile::tempdir().ok()?.keep();
    let config = HarnessConfig::default();
    let launcher = CrateLauncher::new(crate_home, run_dir)
        .with_signal(GracefulSignal::parse(&config.decommission.signal).ok()?)
        .with_start_timeout(config.startup.start_timeout());
    let allocator = PortAllocator::new(
        config.cluster.port_range_start,
        config.cluster.port_range_end,
    );
    Some((config, Arc::new(launcher), Arc::new(allocator)))
}

async fn check(builtin: BuiltinScenario) {
    let Some((config, launcher, allocator)) = environment() else {
        eprintln!("CRATE_HOME not set, skipping {builtin}");
        return;
    };
    let outcome = run_builtin(builtin, &config, launcher, allocator).await;
    assert!(outcome.passed, "{outcome}");
}

#[tokio::test]
#[ignore = "needs CRATE_HOME"]
async fn real_signal() {
    check(BuiltinScenario::Signal).await;
}

#[tokio::test]
#[ignore = "needs CRATE_HOME"]
async fn real_primaries() {
    check(BuiltinScenario::Primaries).await;
}

#[tokio::test]
#[ignore = "needs CRATE_HOME"]
async fn real_full() {
    check(BuiltinScenario::Full).await;
}

#[tokio::test]
#[ignore = "needs CRATE_HOME"]
async fn real_none() {
    check(BuiltinScenario::None).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "needs CRATE_HOME"]
async fn real_concurrent() {
    check(BuiltinScenario::Concurrent).await;
}
