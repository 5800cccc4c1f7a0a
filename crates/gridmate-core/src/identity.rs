//! # Identity Newtypes
//!
//! Newtype wrappers for the identifiers used throughout GridMate
//! replication. These prevent accidental confusion between namespaces:
//! a `ReplicaId` cannot be passed where a `PeerId` is expected.
//!
//! `PeerId` and `ReplicaId` serialize as bare integers so scenario files
//! can write `peers: [1, 2, 3]`. Their textual form is `peer:<n>` and
//! `replica:<n>`; parsing accepts either the prefixed or the bare form.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Identifier of a network participant. Stable for the life of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub u32);

/// Identifier of a replicated object. Unique within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicaId(pub u32);

/// Unique identifier for one ownership migration attempt.
///
/// Used to correlate log lines and history records; it carries no protocol
/// meaning (acknowledgments are correlated by [`Epoch`](crate::Epoch)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MigrationId(pub Uuid);

impl PeerId {
    /// Access the raw numeric id.
    pub fn get(&self) -> u32 {
        self.0
    }
}

impl ReplicaId {
    /// Access the raw numeric id.
    pub fn get(&self) -> u32 {
        self.0
    }
}

impl MigrationId {
    /// Generate a new random migration identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Access the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MigrationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer:{}", self.0)
    }
}

impl std::fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "replica:{}", self.0)
    }
}

impl std::fmt::Display for MigrationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "migration:{}", self.0)
    }
}

fn parse_prefixed(kind: &'static str, input: &str) -> Result<u32, CoreError> {
    let trimmed = input.trim();
    let digits = trimmed
        .strip_prefix(kind)
        .and_then(|rest| rest.strip_prefix(':'))
        .unwrap_or(trimmed);
    digits
        .parse::<u32>()
        .map_err(|e| CoreError::InvalidIdentifier {
            kind,
            input: input.to_string(),
            reason: e.to_string(),
        })
}

impl FromStr for PeerId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_prefixed("peer", s).map(Self)
    }
}

impl FromStr for ReplicaId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_prefixed("replica", s).map(Self)
    }
}
