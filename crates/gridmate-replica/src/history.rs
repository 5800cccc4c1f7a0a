//! # Migration History
//!
//! One record per finished migration sequence, appended by the replica
//! manager when it retires the sequence.

use serde::{Deserialize, Serialize};

use gridmate_core::{MigrationId, PeerId, ReplicaId, Timestamp};
use gridmate_state::MigrationOutcome;

/// The outcome of one finished migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Sequence identifier.
    pub id: MigrationId,
    /// The migrated replica.
    pub replica: ReplicaId,
    /// Owner when the sequence started.
    pub from: PeerId,
    /// Final target of the sequence.
    pub to: PeerId,
    /// How it ended.
    pub outcome: MigrationOutcome,
    /// When the sequence was started.
    pub started_at: Timestamp,
    /// When the sequence was retired.
    pub finished_at: Timestamp,
}

impl MigrationRecord {
    /// Whether ownership actually moved.
    pub fn moved_ownership(&self) -> bool {
        self.outcome == MigrationOutcome::Committed
    }
}

impl std::fmt::Display for MigrationRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} -> {} {} ({})",
            self.replica, self.from, self.to, self.outcome, self.id
        )
    }
}
