//! # Replica Management Errors

use thiserror::Error;

use gridmate_core::{PeerId, ReplicaId};
use gridmate_state::MigrationError;

use crate::transport::TransportError;

/// Errors from replica manager operations.
#[derive(Error, Debug)]
pub enum ReplicaError {
    /// No replica with this id is registered locally.
    #[error("unknown replica {replica}")]
    UnknownReplica {
        /// The missing replica.
        replica: ReplicaId,
    },

    /// A replica with this id is already registered locally.
    #[error("replica {replica} already exists")]
    DuplicateReplica {
        /// The conflicting replica.
        replica: ReplicaId,
    },

    /// The operation requires local ownership.
    #[error("{replica} is owned by {owner}, not by this peer")]
    NotOwner {
        /// The replica.
        replica: ReplicaId,
        /// Its current owner.
        owner: PeerId,
    },

    /// The replica was created without migration support.
    #[error("{replica} is not migratable")]
    NotMigratable {
        /// The replica.
        replica: ReplicaId,
    },

    /// The peer is not connected to this manager.
    #[error("unknown or disconnected peer {peer}")]
    UnknownPeer {
        /// The missing peer.
        peer: PeerId,
    },

    /// The in-flight migration refused the request.
    #[error(transparent)]
    Migration(#[from] MigrationError),

    /// A message could not be handed to the transport.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Replica state could not be encoded or decoded for hand-off.
    #[error("replica state serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
