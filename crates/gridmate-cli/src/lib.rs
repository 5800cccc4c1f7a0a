//! # gridmate-cli — Replica Migration Toolkit
//!
//! Provides the `gridmate` command-line interface.
//!
//! ## Subcommands
//!
//! - `gridmate simulate`: Run a migration scenario over a simulated network.
//! - `gridmate validate`: Check a scenario file without running it.
//! - `gridmate graph`: Export the migration state machine.
//!
//! ```bash
//! gridmate -v simulate scenarios/handoff.yaml --format json
//! gridmate --config retry.yaml validate scenarios/handoff.yaml
//! gridmate graph --format dot | dot -Tsvg > migration.svg
//! ```

pub mod graph;
pub mod scenario;
pub mod simulate;
pub mod validate;

use std::path::Path;

use anyhow::{Context, Result};

use gridmate_state::MigrationConfig;

/// Load and check the `--config` override, if one was given.
pub fn resolve_config(path: Option<&Path>) -> Result<Option<MigrationConfig>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let config = scenario::load_config(path)?;
    config
        .validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    tracing::debug!(path = %path.display(), ?config, "config override loaded");
    Ok(Some(config))
}
