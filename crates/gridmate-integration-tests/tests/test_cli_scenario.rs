//! # Scenario Files Through the CLI Layer
//!
//! Loads the bundled scenarios and ad-hoc scenario files, runs them the way
//! `gridmate simulate` and `gridmate validate` do, and checks the exported
//! state machine.

use std::path::{Path, PathBuf};

use gridmate_cli::graph::{run_graph, to_dot, to_json, GraphArgs, GraphFormat};
use gridmate_cli::resolve_config;
use gridmate_cli::scenario::{Scenario, ScenarioError};
use gridmate_cli::simulate::{run_simulate, simulate, OutputFormat, SimulateArgs};
use gridmate_cli::validate::{run_validate, ValidateArgs};
use gridmate_core::{PeerId, ReplicaId};
use gridmate_state::{MigrationConfig, MigrationOutcome};

fn bundled(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../scenarios")
        .join(name)
}

fn write(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, body).unwrap();
    path
}

// ---------------------------------------------------------------------------
// 1. Bundled scenarios
// ---------------------------------------------------------------------------

#[test]
fn handoff_scenario_moves_ownership_and_refuses_pinned_replica() {
    let scenario = Scenario::load(&bundled("handoff.yaml")).unwrap();
    scenario.validate().unwrap();

    let report = simulate(&scenario, scenario.max_ticks).unwrap();
    assert!(report.settled);
    assert_eq!(report.ownership[&ReplicaId(100)], PeerId(5));
    assert_eq!(report.ownership[&ReplicaId(200)], PeerId(2));
    assert_eq!(report.history.len(), 1);
    assert_eq!(report.history[0].outcome, MigrationOutcome::Committed);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].tick, 3);
}

#[test]
fn rollback_scenario_keeps_original_owner() {
    let scenario = Scenario::load(&bundled("rollback.yaml")).unwrap();
    let report = simulate(&scenario, scenario.max_ticks).unwrap();

    assert!(report.settled);
    assert_eq!(report.ownership[&ReplicaId(7)], PeerId(1));
    assert_eq!(report.history[0].outcome, MigrationOutcome::RolledBack);
    assert!(!report.history[0].moved_ownership());
}

#[test]
fn bundled_scenarios_validate_cleanly() {
    for name in ["handoff.yaml", "rollback.yaml"] {
        let args = ValidateArgs {
            scenario: bundled(name),
        };
        assert_eq!(run_validate(&args, None).unwrap(), 0, "{name}");
    }
}

// ---------------------------------------------------------------------------
// 2. simulate command
// ---------------------------------------------------------------------------

#[test]
fn run_simulate_json_succeeds() {
    let args = SimulateArgs {
        scenario: bundled("handoff.yaml"),
        format: OutputFormat::Json,
        max_ticks: None,
    };
    assert_eq!(run_simulate(&args, None).unwrap(), 0);
}

#[test]
fn run_simulate_fails_when_max_ticks_too_small() {
    let args = SimulateArgs {
        scenario: bundled("handoff.yaml"),
        format: OutputFormat::Text,
        max_ticks: Some(1),
    };
    let err = run_simulate(&args, None).unwrap_err();
    assert!(err.to_string().contains("still in flight"));
}

#[test]
fn run_simulate_rejects_invalid_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(
        &dir,
        "bad.yaml",
        "peers: [1]\nreplicas:\n  - { id: 1, owner: 2 }\n",
    );
    let args = SimulateArgs {
        scenario: path,
        format: OutputFormat::Text,
        max_ticks: None,
    };
    let err = run_simulate(&args, None).unwrap_err();
    let chain = format!("{err:#}");
    assert!(chain.contains("invalid scenario"));
}

#[test]
fn config_override_replaces_scenario_config() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write(&dir, "config.yaml", "retry_interval_ticks: 1\nmax_retries: 0\n");
    let config = resolve_config(Some(&config_path)).unwrap();
    assert_eq!(
        config,
        Some(MigrationConfig {
            retry_interval_ticks: 1,
            max_retries: 0
        })
    );

    let args = SimulateArgs {
        scenario: bundled("handoff.yaml"),
        format: OutputFormat::Text,
        max_ticks: None,
    };
    assert_eq!(run_simulate(&args, config).unwrap(), 0);
}

// ---------------------------------------------------------------------------
// 3. validate command
// ---------------------------------------------------------------------------

#[test]
fn validate_reports_problems_with_exit_one() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(
        &dir,
        "broken.yaml",
        r#"
peers: [1, 2, 2]
replicas:
  - { id: 9, owner: 1, subscribers: [3] }
steps:
  - { tick: 0, action: migrate, replica: 10, to: 2 }
"#,
    );
    let args = ValidateArgs { scenario: path };
    assert_eq!(run_validate(&args, None).unwrap(), 1);

    let scenario = Scenario::load(&args.scenario).unwrap();
    let problems = scenario.problems();
    assert_eq!(problems.len(), 3, "{problems:?}");
}

#[test]
fn validate_flags_zero_retry_interval_override() {
    let args = ValidateArgs {
        scenario: bundled("rollback.yaml"),
    };
    let config = MigrationConfig {
        retry_interval_ticks: 0,
        max_retries: 5,
    };
    assert_eq!(run_validate(&args, Some(config)).unwrap(), 1);
}

#[test]
fn unknown_fields_fail_to_parse() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(&dir, "typo.yaml", "peers: [1]\nreplica: []\n");
    let err = Scenario::load(&path).unwrap_err();
    assert!(matches!(err, ScenarioError::Parse { .. }));
}

#[test]
fn missing_file_is_io_error() {
    let err = Scenario::load(Path::new("/nonexistent/scenario.yaml")).unwrap_err();
    assert!(matches!(err, ScenarioError::Io { .. }));
}

// ---------------------------------------------------------------------------
// 4. graph command
// ---------------------------------------------------------------------------

#[test]
fn graph_exports_agree() {
    let dot = to_dot();
    let json = to_json();
    for state in json["states"].as_array().unwrap() {
        let name = state["name"].as_str().unwrap();
        assert!(dot.contains(name), "{name} missing from dot output");
    }
    assert_eq!(json["forward"][0], "FLUSH_UPSTREAM");
    assert_eq!(json["forward"].as_array().unwrap().last().unwrap(), "IDLE");

    for format in [GraphFormat::Dot, GraphFormat::Json] {
        assert_eq!(run_graph(&GraphArgs { format }).unwrap(), 0);
    }
}
