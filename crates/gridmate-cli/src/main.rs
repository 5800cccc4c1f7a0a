//! # gridmate CLI entry point
//!
//! Parses command-line arguments, initializes logging and dispatches to
//! subcommand handlers.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use gridmate_cli::graph::{run_graph, GraphArgs};
use gridmate_cli::resolve_config;
use gridmate_cli::simulate::{run_simulate, SimulateArgs};
use gridmate_cli::validate::{run_validate, ValidateArgs};

/// GridMate replica ownership migration toolkit.
///
/// Simulates migration scenarios over an in-memory peer network, validates
/// scenario files, and exports the migration state machine.
#[derive(Parser, Debug)]
#[command(name = "gridmate", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log line format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Migration config YAML overriding the scenario's config block.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a migration scenario and print the resulting ownership.
    Simulate(SimulateArgs),

    /// Check a scenario file for consistency.
    Validate(ValidateArgs),

    /// Export the migration state machine.
    Graph(GraphArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match cli.log_format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }

    tracing::debug!("gridmate CLI starting");

    let result = resolve_config(cli.config.as_deref()).and_then(|config| match &cli.command {
        Commands::Simulate(args) => run_simulate(args, config),
        Commands::Validate(args) => run_validate(args, config),
        Commands::Graph(args) => run_graph(args),
    });

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(1)
        }
    }
}
