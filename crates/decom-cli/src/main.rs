//! Decom CLI.
//!
//! Runs graceful decommission scenarios against local database clusters.
//!
//! # Quick Start
//!
//! ```bash
//! # See what is available
//! decom list
//!
//! # Run one scenario against an unpacked distribution
//! decom run full --crate-home ./crate-5.x
//!
//! # Run everything, reporting as JSON
//! decom run all --crate-home ./crate-5.x --format json
//! ```

mod commands;
mod style;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// Decom - graceful decommission test runner for sharded SQL clusters.
#[derive(Parser)]
#[command(name = "decom")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version information.
    Version,

    /// List the built-in scenarios.
    List,

    /// Run a scenario, or `all` of them.
    Run {
        /// Scenario name (see `decom list`) or `all`.
        scenario: String,

        /// Root of the database distribution (contains `bin/crate`).
        #[arg(long)]
        crate_home: Option<String>,

        /// Project directory holding decom.toml.
        #[arg(short, long, default_value = ".")]
        project: String,

        /// Extra configuration file layered above the project files.
        #[arg(short, long)]
        config: Option<String>,

        /// Output format (text, json).
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show the effective configuration.
    Config {
        /// Project directory holding decom.toml.
        #[arg(short, long, default_value = ".")]
        project: String,

        /// Output format (text, json, toml).
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if cli.no_color || std::env::var_os("NO_COLOR").is_some() {
        style::set_no_color(true);
    }

    match cli.command {
        Commands::Version => {
            commands::version::run();
            Ok(())
        }
        Commands::List => {
            commands::list::run();
            Ok(())
        }
        Commands::Run {
            scenario,
            crate_home,
            project,
            config,
            format,
        } => commands::run::run(&commands::run::RunArgs {
            scenario,
            crate_home,
            project,
            config,
            format,
        }),
        Commands::Config { project, format } => commands::config::show(&project, &format),
    }
}
