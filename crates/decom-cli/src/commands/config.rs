//! Configuration display.

use anyhow::{Context, Result, bail};
use decom_config::ConfigLoader;

use crate::style::colors::SemanticStyle;

/// Show the effective configuration for `project`.
pub fn show(project: &str, format: &str) -> Result<()> {
    let loader = ConfigLoader::new().with_project_dir(project);
    let sources = loader.sources();
    let config = loader.load().context("Failed to load configuration")?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&config)?),
        "toml" => println!("{}", toml::to_string_pretty(&config)?),
        "text" => {
            println!("{}", "Decom Configuration".header());
            println!("===================\n");

            println!("Sources:");
            if sources.is_empty() {
                println!("  {}", "built-in defaults only".muted());
            }
            for (source, path) in &sources {
                println!("  {}: {}", source.label(), path.display().to_string().code());
            }
            println!();

            println!("Cluster:");
            println!(
                "  Distribution: {}",
                config
                    .cluster
                    .crate_home
                    .as_ref()
                    .map_or_else(|| "not set".muted(), |p| p.display().to_string().code())
            );
            println!("  Host: {}", config.cluster.host);
            println!(
                "  Ports: {}..{}",
                config.cluster.port_range_start, config.cluster.port_range_end
            );
            println!("  Run directory: {}", config.cluster.run_dir.display());
            for setting in &config.cluster.node_settings {
                println!("  -C{}={}", setting.key, setting.value);
            }
            println!();

            println!("Retry:");
            println!("  Initial backoff: {:?}", config.retry.initial_backoff());
            println!("  Multiplier: {}", config.retry.multiplier);
            println!("  Deadline: {:?}", config.retry.deadline());
            println!();

            println!("Startup:");
            println!("  Attempts: {}", config.startup.max_attempts);
            println!("  Timeout: {:?}", config.startup.start_timeout());
            println!();

            println!("Quorum:");
            println!("  Poll interval: {:?}", config.quorum.poll_interval());
            println!(
                "  Timeout: {}",
                config
                    .quorum
                    .timeout()
                    .map_or_else(|| "unbounded".to_string(), |t| format!("{t:?}"))
            );
            println!();

            println!("Decommission:");
            println!("  Signal: {}", config.decommission.signal);
            println!("  Timeout: {:?}", config.decommission.timeout());
            println!();

            println!("Verify:");
            println!("  Poll interval: {:?}", config.verify.poll_interval());
            println!("  Deadline: {:?}", config.verify.deadline());
            println!();

            println!("Workload:");
            println!("  Table: {}", config.workload.table);
            println!(
                "  Workers per kind: {}",
                config.workload.concurrency_per_kind
            );
        }
        other => bail!("Unknown format '{other}'. Use text, json or toml."),
    }

    Ok(())
}
