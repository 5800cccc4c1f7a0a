//! # Scenario Files
//!
//! A scenario describes a simulated session: the migration policy, the
//! connected peers, the replicas they start with, and a script of actions
//! applied at given ticks.
//!
//! ```yaml
//! config: { retry_interval_ticks: 4, max_retries: 3 }
//! max_ticks: 200
//! peers: [1, 2, 3, 4, 5]
//! replicas:
//!   - { id: 100, owner: 1, subscribers: [2, 3, 4], migratable: true, state: { hp: 10 } }
//! steps:
//!   - { tick: 0, action: migrate, replica: 100, to: 5 }
//!   - { tick: 3, action: disconnect, peer: 3 }
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use gridmate_core::{PeerId, ReplicaId};
use gridmate_replica::{ReplicaError, SimNetwork};
use gridmate_state::MigrationConfig;

/// Errors from loading a scenario or config file.
#[derive(Error, Debug)]
pub enum ScenarioError {
    /// The file could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        /// The file.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file is not valid scenario YAML.
    #[error("cannot parse {path}: {source}")]
    Parse {
        /// The file.
        path: PathBuf,
        /// Underlying error.
        source: serde_yaml::Error,
    },

    /// The scenario parsed but is inconsistent.
    #[error("scenario has {} problem(s): {}", problems.len(), problems.join("; "))]
    Invalid {
        /// One message per problem.
        problems: Vec<String>,
    },
}

/// A scripted simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Migration policy for every peer.
    #[serde(default)]
    pub config: MigrationConfig,
    /// Upper bound on simulated ticks.
    #[serde(default = "default_max_ticks")]
    pub max_ticks: u64,
    /// Connected peers.
    pub peers: Vec<PeerId>,
    /// Replicas present at tick 0.
    #[serde(default)]
    pub replicas: Vec<ReplicaSpec>,
    /// Scripted actions.
    #[serde(default)]
    pub steps: Vec<Step>,
}

fn default_max_ticks() -> u64 {
    1_000
}

fn default_migratable() -> bool {
    true
}

/// A replica present when the simulation starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplicaSpec {
    /// Replica identifier.
    pub id: ReplicaId,
    /// Initial owner.
    pub owner: PeerId,
    /// Peers holding a proxy.
    #[serde(default)]
    pub subscribers: Vec<PeerId>,
    /// Whether ownership may move.
    #[serde(default = "default_migratable")]
    pub migratable: bool,
    /// Application state handed over on migration.
    #[serde(default)]
    pub state: serde_json::Value,
}

/// One scripted action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Tick at which the action is applied, before that tick's update.
    pub tick: u64,
    /// The action.
    #[serde(flatten)]
    pub action: Action,
}

/// A scripted action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Migrate a replica (or redirect its in-flight migration).
    Migrate {
        /// The replica.
        replica: ReplicaId,
        /// Target owner.
        to: PeerId,
    },
    /// Disconnect a peer.
    Disconnect {
        /// The peer.
        peer: PeerId,
    },
    /// Destroy a replica everywhere.
    Destroy {
        /// The replica.
        replica: ReplicaId,
    },
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Migrate { replica, to } => write!(f, "migrate {replica} to {to}"),
            Self::Disconnect { peer } => write!(f, "disconnect {peer}"),
            Self::Destroy { replica } => write!(f, "destroy {replica}"),
        }
    }
}

impl Scenario {
    /// Parse scenario YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Read and parse a scenario file.
    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let text = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text).map_err(|source| ScenarioError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Every consistency problem in the scenario.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if let Err(e) = self.config.validate() {
            problems.push(format!("config: {e}"));
        }

        let mut peers = BTreeSet::new();
        for peer in &self.peers {
            if !peers.insert(*peer) {
                problems.push(format!("duplicate peer {peer}"));
            }
        }

        let mut replicas = BTreeSet::new();
        for entry in &self.replicas {
            if !replicas.insert(entry.id) {
                problems.push(format!("duplicate replica {}", entry.id));
            }
            if !peers.contains(&entry.owner) {
                problems.push(format!("{}: owner {} is not a declared peer", entry.id, entry.owner));
            }
            for sub in &entry.subscribers {
                if !peers.contains(sub) {
                    problems.push(format!("{}: subscriber {sub} is not a declared peer", entry.id));
                }
            }
        }

        for (index, step) in self.steps.iter().enumerate() {
            if step.tick >= self.max_ticks {
                problems.push(format!(
                    "step {index}: tick {} is not below max_ticks {}",
                    step.tick, self.max_ticks
                ));
            }
            match step.action {
                Action::Migrate { replica, to } => {
                    if !replicas.contains(&replica) {
                        problems.push(format!("step {index}: unknown replica {replica}"));
                    }
                    if !peers.contains(&to) {
                        problems.push(format!("step {index}: target {to} is not a declared peer"));
                    }
                }
                Action::Disconnect { peer } => {
                    if !peers.contains(&peer) {
                        problems.push(format!("step {index}: {peer} is not a declared peer"));
                    }
                }
                Action::Destroy { replica } => {
                    if !replicas.contains(&replica) {
                        problems.push(format!("step {index}: unknown replica {replica}"));
                    }
                }
            }
        }

        problems
    }

    /// Fail with every problem if the scenario is inconsistent.
    pub fn validate(&self) -> Result<(), ScenarioError> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ScenarioError::Invalid { problems })
        }
    }

    /// Build the network described by the scenario at tick 0.
    pub fn build_network(&self) -> Result<SimNetwork, ReplicaError> {
        let mut net = SimNetwork::new(self.config);
        for peer in &self.peers {
            net.add_peer(*peer);
        }
        for entry in &self.replicas {
            net.create_replica(
                entry.owner,
                entry.id,
                entry.state.clone(),
                entry.migratable,
                &entry.subscribers,
            )?;
        }
        Ok(net)
    }
}

/// Read a standalone [`MigrationConfig`] YAML file.
pub fn load_config(path: &Path) -> Result<MigrationConfig, ScenarioError> {
    let text = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|source| ScenarioError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
