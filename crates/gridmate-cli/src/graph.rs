//! # Graph Subcommand
//!
//! Exports the migration state hierarchy and its transitions, as Graphviz
//! DOT (renderable with `dot -Tsvg`) or as JSON.

use anyhow::Result;
use clap::{Args, ValueEnum};
use serde_json::json;

use gridmate_state::{Hierarchy, MigrationState, TRANSITIONS};

/// Arguments for `gridmate graph`.
#[derive(Args, Debug)]
pub struct GraphArgs {
    /// Output format.
    #[arg(long, value_enum, default_value_t = GraphFormat::Dot)]
    pub format: GraphFormat,
}

/// Graph output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GraphFormat {
    /// Graphviz DOT graph.
    Dot,
    /// JSON hierarchy and edge list.
    Json,
}

fn cluster_name(state: MigrationState) -> String {
    format!("cluster_{}", state.as_str().to_lowercase())
}

/// A leaf inside `state`, used as the anchor of edges leaving a superstate.
fn anchor(state: MigrationState) -> MigrationState {
    MigrationState::ALL
        .iter()
        .copied()
        .find(|s| s.parent() == Some(state) && !s.is_superstate())
        .unwrap_or(state)
}

fn write_children(out: &mut String, parent: MigrationState, depth: usize) {
    let indent = "  ".repeat(depth);
    for child in MigrationState::ALL.iter().copied().filter(|s| s.parent() == Some(parent)) {
        if child.is_superstate() {
            out.push_str(&format!("{indent}subgraph {} {{\n", cluster_name(child)));
            out.push_str(&format!("{indent}  label=\"{}\";\n", child.as_str()));
            write_children(out, child, depth + 1);
            out.push_str(&format!("{indent}}}\n"));
        } else {
            let shape = if child.is_terminal() { "doublecircle" } else { "box" };
            out.push_str(&format!("{indent}{} [shape={shape}];\n", child.as_str()));
        }
    }
}

/// Render the hierarchy as DOT. Superstates become clusters.
pub fn to_dot() -> String {
    let mut out = String::from("digraph migration_sequence {\n  compound=true;\n  rankdir=LR;\n");
    out.push_str(&format!(
        "  subgraph {} {{\n    label=\"{}\";\n",
        cluster_name(MigrationState::Top),
        MigrationState::Top.as_str()
    ));
    write_children(&mut out, MigrationState::Top, 2);
    out.push_str("  }\n");

    for (from, trigger, to) in TRANSITIONS {
        let tail = anchor(*from);
        let ltail = if from.is_superstate() {
            format!(", ltail={}", cluster_name(*from))
        } else {
            String::new()
        };
        out.push_str(&format!(
            "  {} -> {} [label=\"{}\"{}];\n",
            tail.as_str(),
            to.as_str(),
            trigger,
            ltail
        ));
    }
    out.push_str("}\n");
    out
}

/// Render the hierarchy as JSON.
pub fn to_json() -> serde_json::Value {
    let states: Vec<_> = MigrationState::ALL
        .iter()
        .map(|s| {
            json!({
                "name": s.as_str(),
                "parent": s.parent().map(|p| p.as_str()),
                "superstate": s.is_superstate(),
            })
        })
        .collect();
    let transitions: Vec<_> = TRANSITIONS
        .iter()
        .map(|(from, trigger, to)| json!({"from": from.as_str(), "trigger": trigger, "to": to.as_str()}))
        .collect();

    let mut forward = vec![MigrationState::FlushUpstream];
    while let Some(next) = forward.last().and_then(|s| s.successor()) {
        forward.push(next);
    }

    json!({
        "states": states,
        "transitions": transitions,
        "forward": forward.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
    })
}

/// Execute `gridmate graph`.
pub fn run_graph(args: &GraphArgs) -> Result<u8> {
    match args.format {
        GraphFormat::Dot => print!("{}", to_dot()),
        GraphFormat::Json => println!("{}", serde_json::to_string_pretty(&to_json())?),
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_nests_phases_in_migrating_cluster() {
        let dot = to_dot();
        assert!(dot.starts_with("digraph migration_sequence {"));
        let cluster = dot.find("subgraph cluster_migrating").unwrap();
        let flush = dot.find("FLUSH_UPSTREAM [shape=box]").unwrap();
        let idle = dot.find("IDLE [shape=doublecircle]").unwrap();
        assert!(cluster < flush);
        assert!(idle > flush);
        assert!(dot.contains("ltail=cluster_migrating"));
    }

    #[test]
    fn dot_lists_every_leaf() {
        let dot = to_dot();
        for state in MigrationState::ALL.iter().filter(|s| !s.is_superstate()) {
            assert!(dot.contains(state.as_str()), "{state} missing");
        }
    }

    #[test]
    fn json_forward_order() {
        let json = to_json();
        assert_eq!(
            json["forward"],
            json!([
                "FLUSH_UPSTREAM",
                "FLUSH_DOWNSTREAM",
                "CHANGE_ROUTING_FOR_MIGRATION",
                "HANDOFF_REPLICA",
                "IDLE"
            ])
        );
        assert_eq!(json["states"].as_array().unwrap().len(), 10);
        assert_eq!(json["states"][0]["parent"], serde_json::Value::Null);
    }
}
