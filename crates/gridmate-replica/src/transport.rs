//! # Transport Seam
//!
//! The replica manager hands every outbound [`MigrationMessage`] to a
//! [`Transport`]. Delivery, ordering and loss are the transport's business;
//! the migration sequence's retry policy covers lost messages.
//!
//! Two in-memory implementations are provided:
//!
//! - [`RecordingTransport`] keeps every message for inspection and can be
//!   told to fail sends to chosen peers. Used by tests.
//! - [`QueueTransport`] buffers outbound envelopes until the owner of the
//!   network drains them. Used by [`SimNetwork`](crate::SimNetwork).

use std::collections::{BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use gridmate_core::PeerId;

use crate::message::MigrationMessage;

/// Outbound message sink for one peer.
pub trait Transport {
    /// Queue `message` for delivery to `to`.
    fn send(&mut self, to: PeerId, message: MigrationMessage) -> Result<(), TransportError>;
}

/// Errors from handing a message to a transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No route to the peer.
    #[error("peer {peer} is unreachable")]
    Unreachable {
        /// The unreachable peer.
        peer: PeerId,
    },
    /// The transport has been shut down.
    #[error("transport closed")]
    Closed,
}

/// A message in flight between two peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Sender.
    pub from: PeerId,
    /// Recipient.
    pub to: PeerId,
    /// Payload.
    pub message: MigrationMessage,
}

/// Records every sent message.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    /// All messages passed to `send()`, in order.
    pub sent: Vec<(PeerId, MigrationMessage)>,
    unreachable: BTreeSet<PeerId>,
}

impl RecordingTransport {
    /// An empty recorder that accepts every send.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sends to `peer` fail with [`TransportError::Unreachable`].
    pub fn fail_sends_to(&mut self, peer: PeerId) {
        self.unreachable.insert(peer);
    }

    /// Take the recorded messages, leaving the record empty.
    pub fn take(&mut self) -> Vec<(PeerId, MigrationMessage)> {
        std::mem::take(&mut self.sent)
    }

    /// Recorded messages addressed to `peer`.
    pub fn sent_to(&self, peer: PeerId) -> impl Iterator<Item = &MigrationMessage> {
        self.sent
            .iter()
            .filter(move |(to, _)| *to == peer)
            .map(|(_, m)| m)
    }
}

impl Transport for RecordingTransport {
    fn send(&mut self, to: PeerId, message: MigrationMessage) -> Result<(), TransportError> {
        if self.unreachable.contains(&to) {
            return Err(TransportError::Unreachable { peer: to });
        }
        self.sent.push((to, message));
        Ok(())
    }
}

/// Buffers outbound envelopes for a simulated network to deliver.
#[derive(Debug)]
pub struct QueueTransport {
    local: PeerId,
    outbound: VecDeque<Envelope>,
    closed: bool,
}

impl QueueTransport {
    /// A queue for messages sent by `local`.
    pub fn new(local: PeerId) -> Self {
        Self {
            local,
            outbound: VecDeque::new(),
            closed: false,
        }
    }

    /// Remove and return everything queued so far.
    pub fn drain(&mut self) -> Vec<Envelope> {
        self.outbound.drain(..).collect()
    }

    /// Number of queued envelopes.
    pub fn len(&self) -> usize {
        self.outbound.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty()
    }

    /// Refuse further sends and drop anything queued.
    pub fn close(&mut self) {
        self.closed = true;
        self.outbound.clear();
    }
}

impl Transport for QueueTransport {
    fn send(&mut self, to: PeerId, message: MigrationMessage) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.outbound.push_back(Envelope {
            from: self.local,
            to,
            message,
        });
        Ok(())
    }
}
