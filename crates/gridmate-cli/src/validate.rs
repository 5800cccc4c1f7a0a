//! # Validate Subcommand
//!
//! Parses a scenario and reports every consistency problem without running
//! it. Exit code 0 when the scenario is clean, 1 otherwise.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use gridmate_state::MigrationConfig;

use crate::scenario::Scenario;

/// Arguments for `gridmate validate`.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Scenario YAML file.
    pub scenario: PathBuf,
}

/// Execute `gridmate validate`.
pub fn run_validate(args: &ValidateArgs, config: Option<MigrationConfig>) -> Result<u8> {
    let mut scenario = Scenario::load(&args.scenario)?;
    if let Some(config) = config {
        scenario.config = config;
    }

    let problems = scenario.problems();
    if problems.is_empty() {
        println!(
            "OK: {} ({} peers, {} replicas, {} steps)",
            args.scenario.display(),
            scenario.peers.len(),
            scenario.replicas.len(),
            scenario.steps.len()
        );
        return Ok(0);
    }

    for problem in &problems {
        eprintln!("  FAIL: {problem}");
    }
    eprintln!("{}: {} problem(s)", args.scenario.display(), problems.len());
    Ok(1)
}
