//! # Migration Wire Messages
//!
//! What travels between peers while a replica migrates. Every request
//! carries the [`Epoch`] of the phase that sent it; the receiver echoes that
//! epoch back in an [`MigrationMessage::Ack`].

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use gridmate_core::{Epoch, PeerId, ReplicaId};

/// A migration protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MigrationMessage {
    /// Stop sending upstream data to the owner and confirm in-flight data
    /// has been applied.
    SuspendUpstream { replica: ReplicaId, epoch: Epoch },
    /// Confirm outbound data for the replica has drained.
    FlushDownstream { replica: ReplicaId, epoch: Epoch },
    /// Route upstream traffic for the replica to `new_owner`.
    RoutingChange {
        replica: ReplicaId,
        new_owner: PeerId,
        epoch: Epoch,
    },
    /// Full replica state and the ownership token.
    Handoff {
        replica: ReplicaId,
        state: Vec<u8>,
        owner_seq: u64,
        subscribers: BTreeSet<PeerId>,
        epoch: Epoch,
    },
    /// The migration did not happen; `owner` still owns the replica.
    Rollback {
        replica: ReplicaId,
        owner: PeerId,
        epoch: Epoch,
    },
    /// Ownership announcement after commit. Not acknowledged.
    NewOwner {
        replica: ReplicaId,
        owner: PeerId,
        owner_seq: u64,
    },
    /// Acknowledgment of a request, echoing its epoch.
    Ack { replica: ReplicaId, epoch: Epoch },
}

impl MigrationMessage {
    /// The replica this message concerns.
    pub fn replica(&self) -> ReplicaId {
        match self {
            Self::SuspendUpstream { replica, .. }
            | Self::FlushDownstream { replica, .. }
            | Self::RoutingChange { replica, .. }
            | Self::Handoff { replica, .. }
            | Self::Rollback { replica, .. }
            | Self::NewOwner { replica, .. }
            | Self::Ack { replica, .. } => *replica,
        }
    }

    /// The request epoch, if the message takes part in an ack exchange.
    pub fn epoch(&self) -> Option<Epoch> {
        match self {
            Self::SuspendUpstream { epoch, .. }
            | Self::FlushDownstream { epoch, .. }
            | Self::RoutingChange { epoch, .. }
            | Self::Handoff { epoch, .. }
            | Self::Rollback { epoch, .. }
            | Self::Ack { epoch, .. } => Some(*epoch),
            Self::NewOwner { .. } => None,
        }
    }

    /// Whether the receiver must answer with an [`Ack`](Self::Ack).
    pub fn expects_ack(&self) -> bool {
        !matches!(self, Self::NewOwner { .. } | Self::Ack { .. })
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SuspendUpstream { .. } => "suspend_upstream",
            Self::FlushDownstream { .. } => "flush_downstream",
            Self::RoutingChange { .. } => "routing_change",
            Self::Handoff { .. } => "handoff",
            Self::Rollback { .. } => "rollback",
            Self::NewOwner { .. } => "new_owner",
            Self::Ack { .. } => "ack",
        }
    }
}
