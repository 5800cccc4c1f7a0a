//! # Peer Acknowledgment Tracker
//!
//! The set of peers that must answer before the current migration phase
//! may advance. The tracker is policy-free: what a lost peer means for the
//! phase is decided by the migration sequence, not here.

use std::collections::BTreeSet;

use gridmate_core::PeerId;

/// Peers pending acknowledgment for one phase.
///
/// Backed by an ordered set so iteration (and therefore the order of
/// outbound requests) is deterministic. Acknowledging is idempotent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerAckTracker {
    pending: BTreeSet<PeerId>,
}

impl PeerAckTracker {
    /// An empty tracker (already satisfied).
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the pending set. Called when a phase begins.
    pub fn reset<I>(&mut self, peers: I)
    where
        I: IntoIterator<Item = PeerId>,
    {
        self.pending = peers.into_iter().collect();
    }

    /// Remove `peer` from the pending set.
    ///
    /// Returns `true` if the peer was pending. Acknowledging a peer that is
    /// not pending (unknown, or already acknowledged) is a no-op.
    pub fn ack(&mut self, peer: PeerId) -> bool {
        self.pending.remove(&peer)
    }

    /// Whether every pending peer has acknowledged.
    pub fn is_satisfied(&self) -> bool {
        self.pending.is_empty()
    }

    /// Whether `peer` still has to acknowledge.
    pub fn contains(&self, peer: PeerId) -> bool {
        self.pending.contains(&peer)
    }

    /// Number of outstanding acknowledgments.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Same as [`is_satisfied`](Self::is_satisfied).
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Outstanding peers in ascending order.
    pub fn pending(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.pending.iter().copied()
    }

    /// Outstanding peers as an owned, ordered list.
    pub fn to_vec(&self) -> Vec<PeerId> {
        self.pending.iter().copied().collect()
    }

    /// Drop every outstanding peer.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
