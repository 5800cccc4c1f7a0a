//! # Simulated Network
//!
//! A fully connected, in-memory network of replica managers driven by an
//! explicit tick. Each tick pumps every manager once and then delivers
//! queued messages until the network is quiet. Messages to disconnected
//! peers vanish; loss can be injected per recipient with
//! [`SimNetwork::drop_next`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use gridmate_core::{PeerId, ReplicaId};
use gridmate_state::MigrationConfig;

use crate::error::ReplicaError;
use crate::history::MigrationRecord;
use crate::manager::{MigrateOutcome, ReplicaManager};
use crate::transport::{Envelope, QueueTransport};

/// Delivery rounds per tick before the remaining traffic waits for the
/// next tick.
const MAX_DELIVERY_ROUNDS: usize = 64;

/// Counters accumulated by a [`SimNetwork`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStats {
    /// Ticks run so far.
    pub ticks: u64,
    /// Messages handed to a recipient.
    pub delivered: u64,
    /// Messages lost to injected drops or disconnected recipients.
    pub dropped: u64,
}

/// One manager per peer, every peer connected to every other.
#[derive(Debug)]
pub struct SimNetwork {
    config: MigrationConfig,
    nodes: BTreeMap<PeerId, ReplicaManager<QueueTransport>>,
    drops: BTreeMap<PeerId, u32>,
    backlog: Vec<Envelope>,
    stats: NetworkStats,
}

impl SimNetwork {
    /// An empty network whose managers use `config`.
    pub fn new(config: MigrationConfig) -> Self {
        Self {
            config,
            nodes: BTreeMap::new(),
            drops: BTreeMap::new(),
            backlog: Vec::new(),
            stats: NetworkStats::default(),
        }
    }

    /// Connect a new peer to every existing one.
    pub fn add_peer(&mut self, peer: PeerId) {
        if self.nodes.contains_key(&peer) {
            return;
        }
        let mut manager = ReplicaManager::new(peer, self.config, QueueTransport::new(peer));
        for (other, node) in self.nodes.iter_mut() {
            node.add_peer(peer);
            manager.add_peer(*other);
        }
        self.nodes.insert(peer, manager);
        debug!(peer = %peer, "peer joined simulated network");
    }

    /// Connected peers.
    pub fn peers(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.nodes.keys().copied()
    }

    /// The manager running on `peer`.
    pub fn manager(&self, peer: PeerId) -> Option<&ReplicaManager<QueueTransport>> {
        self.nodes.get(&peer)
    }

    /// The manager running on `peer`, mutably.
    pub fn manager_mut(&mut self, peer: PeerId) -> Option<&mut ReplicaManager<QueueTransport>> {
        self.nodes.get_mut(&peer)
    }

    /// Counters so far.
    pub fn stats(&self) -> NetworkStats {
        self.stats
    }

    /// Create a replica on `owner` with a proxy on each subscriber.
    pub fn create_replica(
        &mut self,
        owner: PeerId,
        id: ReplicaId,
        state: serde_json::Value,
        migratable: bool,
        subscribers: &[PeerId],
    ) -> Result<(), ReplicaError> {
        for peer in subscribers {
            if !self.nodes.contains_key(peer) {
                return Err(ReplicaError::UnknownPeer { peer: *peer });
            }
        }
        let node = self
            .nodes
            .get_mut(&owner)
            .ok_or(ReplicaError::UnknownPeer { peer: owner })?;
        node.create_replica(id, state, migratable)?;
        for peer in subscribers.iter().copied().filter(|p| *p != owner) {
            node.subscribe(id, peer)?;
        }
        for peer in subscribers.iter().copied().filter(|p| *p != owner) {
            if let Some(proxy) = self.nodes.get_mut(&peer) {
                proxy.install_proxy(id, owner, 0);
            }
        }
        Ok(())
    }

    /// The peer currently holding the primary of `replica`.
    pub fn owner_of(&self, replica: ReplicaId) -> Option<PeerId> {
        self.nodes.iter().find_map(|(peer, node)| {
            node.replica(replica)
                .filter(|r| r.is_owned_by(*peer))
                .map(|_| *peer)
        })
    }

    /// Map of every replica to the peer holding its primary.
    pub fn ownership(&self) -> BTreeMap<ReplicaId, PeerId> {
        let mut table = BTreeMap::new();
        for (peer, node) in &self.nodes {
            for replica in node.replicas().owned_by(*peer) {
                table.insert(replica.id, *peer);
            }
        }
        table
    }

    /// Where `peer` currently routes upstream traffic for `replica`.
    pub fn route(&self, peer: PeerId, replica: ReplicaId) -> Option<PeerId> {
        self.nodes.get(&peer).and_then(|n| n.route(replica))
    }

    /// Ask the owner of `replica` to migrate it to `to`.
    pub fn migrate(&mut self, replica: ReplicaId, to: PeerId) -> Result<MigrateOutcome, ReplicaError> {
        let owner = self
            .owner_of(replica)
            .ok_or(ReplicaError::UnknownReplica { replica })?;
        let node = self
            .nodes
            .get_mut(&owner)
            .ok_or(ReplicaError::UnknownPeer { peer: owner })?;
        let outcome = node.migrate_replica(replica, to)?;
        info!(replica = %replica, from = %owner, to = %to, outcome = ?outcome, "migration requested");
        Ok(outcome)
    }

    /// Disconnect `peer`. Its queued traffic is lost and every remaining
    /// manager is told the peer is gone.
    pub fn disconnect(&mut self, peer: PeerId) -> bool {
        let Some(mut node) = self.nodes.remove(&peer) else {
            return false;
        };
        node.transport_mut().close();
        self.backlog.retain(|e| e.from != peer && e.to != peer);
        self.drops.remove(&peer);
        for other in self.nodes.values_mut() {
            other.remove_peer(peer);
        }
        info!(peer = %peer, "peer disconnected");
        true
    }

    /// Destroy `replica` on its owner and every proxy holder.
    pub fn destroy_replica(&mut self, replica: ReplicaId) -> Result<(), ReplicaError> {
        let owner = self
            .owner_of(replica)
            .ok_or(ReplicaError::UnknownReplica { replica })?;
        if let Some(node) = self.nodes.get_mut(&owner) {
            node.destroy_replica(replica)?;
        }
        for node in self.nodes.values_mut() {
            if node.replica(replica).is_some() {
                node.destroy_replica(replica)?;
            }
        }
        Ok(())
    }

    /// Lose the next `count` messages addressed to `peer`.
    pub fn drop_next(&mut self, peer: PeerId, count: u32) {
        *self.drops.entry(peer).or_insert(0) += count;
    }

    /// Whether no manager has a migration in flight.
    pub fn is_idle(&self) -> bool {
        self.nodes.values().all(|n| n.is_idle())
    }

    /// Every manager's migration history, in peer order.
    pub fn history(&self) -> Vec<MigrationRecord> {
        self.nodes
            .values()
            .flat_map(|n| n.history().iter().cloned())
            .collect()
    }

    /// Pump every manager once, then deliver until quiet.
    pub fn tick(&mut self) {
        for node in self.nodes.values_mut() {
            node.update();
        }
        for _ in 0..MAX_DELIVERY_ROUNDS {
            let mut batch = std::mem::take(&mut self.backlog);
            for node in self.nodes.values_mut() {
                batch.extend(node.transport_mut().drain());
            }
            if batch.is_empty() {
                break;
            }
            for envelope in batch {
                self.deliver(envelope);
            }
        }
        for node in self.nodes.values_mut() {
            self.backlog.extend(node.transport_mut().drain());
        }
        self.stats.ticks += 1;
    }

    /// Tick until no migration is in flight or `max_ticks` have run.
    /// Returns the number of ticks run.
    pub fn run_until_idle(&mut self, max_ticks: u64) -> u64 {
        let mut ran = 0;
        while ran < max_ticks && !self.is_idle() {
            self.tick();
            ran += 1;
        }
        if !self.is_idle() {
            warn!(max_ticks, "network still busy after tick limit");
        }
        ran
    }

    fn deliver(&mut self, envelope: Envelope) {
        let Envelope { from, to, message } = envelope;
        if let Some(remaining) = self.drops.get_mut(&to) {
            if *remaining > 0 {
                *remaining -= 1;
                self.stats.dropped += 1;
                debug!(from = %from, to = %to, kind = message.kind(), "message dropped");
                return;
            }
        }
        let Some(node) = self.nodes.get_mut(&to) else {
            self.stats.dropped += 1;
            return;
        };
        self.stats.delivered += 1;
        if let Err(err) = node.receive(from, message) {
            warn!(from = %from, to = %to, error = %err, "inbound message rejected");
        }
    }
}
