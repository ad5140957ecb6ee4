//! Scenario execution.

use anyhow::{Context, Result, anyhow, bail};
use decom_cluster::{CrateLauncher, GracefulSignal, PortAllocator};
use decom_config::ConfigLoader;
use decom_harness::{BuiltinScenario, ScenarioOutcome, run_all};
use std::path::PathBuf;
use std::sync::Arc;

use crate::style::{self, colors::SemanticStyle};

/// Arguments of `decom run`.
pub struct RunArgs {
    pub scenario: String,
    pub crate_home: Option<String>,
    pub project: String,
    pub config: Option<String>,
    pub format: String,
}

/// Resolves `all` or a single scenario name.
fn select(name: &str) -> Result<Vec<BuiltinScenario>> {
    if name.eq_ignore_ascii_case("all") {
        return Ok(BuiltinScenario::ALL.to_vec());
    }
    name.parse::<BuiltinScenario>()
        .map(|b| vec![b])
        .map_err(|e| anyhow!("{e}. Run 'decom list' to see available scenarios."))
}

pub fn run(args: &RunArgs) -> Result<()> {
    let selected = select(&args.scenario)?;
    if !matches!(args.format.as_str(), "text" | "json") {
        bail!("Unknown format '{}'. Use text or json.", args.format);
    }

    let mut loader = ConfigLoader::new().with_project_dir(&args.project);
    if let Some(path) = &args.config {
        loader = loader.with_config_file(path);
    }
    let mut config = loader.load().context("Failed to load configuration")?;
    if let Some(home) = &args.crate_home {
        config.cluster.crate_home = Some(PathBuf::from(home));
    }

    let crate_home = config.cluster.crate_home.clone().ok_or_else(|| {
        anyhow!(
            "No database distribution configured. Pass --crate-home, set cluster.crate_home in decom.toml, or export DECOM_CLUSTER__CRATE_HOME."
        )
    })?;
    let binary = crate_home.join("bin").join("crate");
    if !binary.exists() {
        bail!("{} does not exist", binary.display());
    }

    let signal = GracefulSignal::parse(&config.decommission.signal)
        .with_context(|| format!("Invalid decommission signal '{}'", config.decommission.signal))?;
    let launcher = CrateLauncher::new(crate_home, &config.cluster.run_dir)
        .with_signal(signal)
        .with_start_timeout(config.startup.start_timeout());
    let allocator = PortAllocator::new(
        config.cluster.port_range_start,
        config.cluster.port_range_end,
    );

    if args.format == "text" {
        println!(
            "Running {} scenario(s), run directory {}",
            selected.len(),
            config.cluster.run_dir.display().to_string().code()
        );
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let outcomes = runtime.block_on(run_all(
        &selected,
        &config,
        Arc::new(launcher),
        Arc::new(allocator),
    ));

    report(&outcomes, &args.format)?;

    let failed = outcomes.iter().filter(|o| !o.passed).count();
    if failed > 0 {
        bail!("{failed} of {} scenario(s) failed", outcomes.len());
    }
    Ok(())
}

fn report(outcomes: &[ScenarioOutcome], format: &str) -> Result<()> {
    if format == "json" {
        println!("{}", serde_json::to_string_pretty(outcomes)?);
        return Ok(());
    }

    println!();
    style::print_outcome_table(outcomes);
    Ok(())
}
