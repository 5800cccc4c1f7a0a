//! # Simulate Subcommand
//!
//! Runs a scenario over a [`SimNetwork`]: applies each scripted step at its
//! tick, keeps ticking until every migration has finished, then prints the
//! final ownership table and the migration history.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use serde::Serialize;

use gridmate_core::{PeerId, ReplicaId};
use gridmate_replica::{MigrationRecord, NetworkStats, SimNetwork};
use gridmate_state::MigrationConfig;

use crate::scenario::{Action, Scenario, Step};

/// Arguments for `gridmate simulate`.
#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Scenario YAML file.
    pub scenario: PathBuf,

    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Override the scenario's tick limit.
    #[arg(long)]
    pub max_ticks: Option<u64>,
}

/// Report output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary.
    Text,
    /// JSON document.
    Json,
}

/// A scripted step the network refused.
#[derive(Debug, Clone, Serialize)]
pub struct StepFailure {
    /// Tick the step was applied at.
    pub tick: u64,
    /// The step.
    pub action: String,
    /// Why it failed.
    pub error: String,
}

/// Result of running a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    /// Ticks run.
    pub ticks: u64,
    /// Whether every migration finished within the tick limit.
    pub settled: bool,
    /// Final owner of every surviving replica.
    pub ownership: BTreeMap<ReplicaId, PeerId>,
    /// Finished migrations.
    pub history: Vec<MigrationRecord>,
    /// Steps the network refused.
    pub failures: Vec<StepFailure>,
    /// Delivery counters.
    pub stats: NetworkStats,
}

/// Run `scenario` for at most `max_ticks` ticks.
pub fn simulate(scenario: &Scenario, max_ticks: u64) -> Result<SimulationReport> {
    let mut net = scenario
        .build_network()
        .context("building the simulated network")?;

    let mut steps: Vec<&Step> = scenario.steps.iter().collect();
    steps.sort_by_key(|s| s.tick);
    let mut next = 0;
    let mut failures = Vec::new();
    let mut tick = 0;

    while tick < max_ticks {
        while next < steps.len() && steps[next].tick <= tick {
            if let Err(error) = apply(&mut net, steps[next].action) {
                tracing::warn!(tick, action = %steps[next].action, error = %error, "step refused");
                failures.push(StepFailure {
                    tick,
                    action: steps[next].action.to_string(),
                    error,
                });
            }
            next += 1;
        }
        if next == steps.len() && net.is_idle() {
            break;
        }
        net.tick();
        tick += 1;
    }

    Ok(SimulationReport {
        ticks: tick,
        settled: next == steps.len() && net.is_idle(),
        ownership: net.ownership(),
        history: net.history(),
        failures,
        stats: net.stats(),
    })
}

fn apply(net: &mut SimNetwork, action: Action) -> std::result::Result<(), String> {
    match action {
        Action::Migrate { replica, to } => net.migrate(replica, to).map(|_| ()).map_err(|e| e.to_string()),
        Action::Disconnect { peer } => {
            if net.disconnect(peer) {
                Ok(())
            } else {
                Err(format!("{peer} is not connected"))
            }
        }
        Action::Destroy { replica } => net.destroy_replica(replica).map_err(|e| e.to_string()),
    }
}

/// Render a report as text.
pub fn render_text(report: &SimulationReport) -> String {
    let mut out = String::new();
    out.push_str("ownership:\n");
    for (replica, owner) in &report.ownership {
        out.push_str(&format!("  {replica} -> {owner}\n"));
    }
    out.push_str("history:\n");
    for record in &report.history {
        out.push_str(&format!("  {record}\n"));
    }
    if !report.failures.is_empty() {
        out.push_str("refused steps:\n");
        for f in &report.failures {
            out.push_str(&format!("  tick {}: {}: {}\n", f.tick, f.action, f.error));
        }
    }
    out.push_str(&format!(
        "ticks: {}, delivered: {}, dropped: {}\n",
        report.ticks, report.stats.delivered, report.stats.dropped
    ));
    out
}

/// Execute `gridmate simulate`.
pub fn run_simulate(args: &SimulateArgs, config: Option<MigrationConfig>) -> Result<u8> {
    let mut scenario = Scenario::load(&args.scenario)?;
    if let Some(config) = config {
        scenario.config = config;
    }
    scenario
        .validate()
        .with_context(|| format!("invalid scenario {}", args.scenario.display()))?;

    let max_ticks = args.max_ticks.unwrap_or(scenario.max_ticks);
    let report = simulate(&scenario, max_ticks)?;

    match args.format {
        OutputFormat::Text => print!("{}", render_text(&report)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    if !report.settled {
        bail!("migrations still in flight after {} ticks", report.ticks);
    }
    Ok(0)
}
