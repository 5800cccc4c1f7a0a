//! # Replica Manager
//!
//! One manager per peer. It owns the peer's [`ReplicaTable`], its routing
//! view, and every in-flight [`MigrationSequence`] for replicas it owns.
//!
//! ## Responsibilities
//!
//! - Start a migration on [`migrate_replica`](ReplicaManager::migrate_replica),
//!   or redirect the one already in flight for that replica.
//! - Pump every sequence once per [`update`](ReplicaManager::update), execute
//!   the effects it returns, and retire it into the history once done.
//! - Translate network events into sequence events: inbound acknowledgments
//!   become `ME_PEER_ACK`, disconnects become `ME_PEER_REMOVED`, replica
//!   destruction becomes `ME_REPLICA_REMOVED`.
//! - Answer migration requests from other owners with acknowledgments.
//!
//! ## Failure Handling
//!
//! Effects naming a replica no longer in the table are skipped. Transport
//! failures are logged and left to the sequence's retry policy; they never
//! abort the manager.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use gridmate_core::{EpochClock, MigrationId, PeerId, ReplicaId, Timestamp};
use gridmate_state::{
    MigrationConfig, MigrationEffect, MigrationSequence, ModifyOutcome,
};

use crate::error::ReplicaError;
use crate::history::MigrationRecord;
use crate::message::MigrationMessage;
use crate::replica::{Replica, ReplicaTable};
use crate::transport::Transport;

/// Result of a successful [`ReplicaManager::migrate_replica`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrateOutcome {
    /// A new sequence was started.
    Started(MigrationId),
    /// The sequence already in flight was redirected.
    Redirected(ModifyOutcome),
    /// The requested owner already owns the replica; nothing to do.
    AlreadyOwner,
}

#[derive(Debug)]
struct InFlight {
    sequence: MigrationSequence,
    started_at: Timestamp,
}

/// Replica and migration bookkeeping for one peer.
#[derive(Debug)]
pub struct ReplicaManager<T: Transport> {
    local: PeerId,
    peers: BTreeSet<PeerId>,
    replicas: ReplicaTable,
    routes: BTreeMap<ReplicaId, PeerId>,
    sequences: BTreeMap<ReplicaId, InFlight>,
    history: Vec<MigrationRecord>,
    clock: EpochClock,
    config: MigrationConfig,
    transport: T,
}

impl<T: Transport> ReplicaManager<T> {
    /// A manager for `local` with no peers and no replicas.
    pub fn new(local: PeerId, config: MigrationConfig, transport: T) -> Self {
        Self {
            local,
            peers: BTreeSet::new(),
            replicas: ReplicaTable::new(),
            routes: BTreeMap::new(),
            sequences: BTreeMap::new(),
            history: Vec::new(),
            clock: EpochClock::new(),
            config,
            transport,
        }
    }

    // ── Accessors ────────────────────────────────────────────────────

    /// The peer this manager runs on.
    pub fn local(&self) -> PeerId {
        self.local
    }

    /// Retry policy handed to new sequences.
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// The outbound transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The outbound transport, mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Connected remote peers.
    pub fn peers(&self) -> &BTreeSet<PeerId> {
        &self.peers
    }

    /// Look up a replica record.
    pub fn replica(&self, id: ReplicaId) -> Option<&Replica> {
        self.replicas.get(id)
    }

    /// Every replica record held locally.
    pub fn replicas(&self) -> &ReplicaTable {
        &self.replicas
    }

    /// Where upstream traffic for `id` is currently sent.
    pub fn route(&self, id: ReplicaId) -> Option<PeerId> {
        self.routes.get(&id).copied()
    }

    /// The in-flight sequence for `replica`, if any.
    pub fn sequence(&self, replica: ReplicaId) -> Option<&MigrationSequence> {
        self.sequences.get(&replica).map(|f| &f.sequence)
    }

    /// Every in-flight sequence.
    pub fn in_flight(&self) -> impl Iterator<Item = &MigrationSequence> {
        self.sequences.values().map(|f| &f.sequence)
    }

    /// Whether no migration is in flight.
    pub fn is_idle(&self) -> bool {
        self.sequences.is_empty()
    }

    /// Finished migrations, oldest first.
    pub fn history(&self) -> &[MigrationRecord] {
        &self.history
    }

    // ── Membership ───────────────────────────────────────────────────

    /// Register a connected remote peer.
    pub fn add_peer(&mut self, peer: PeerId) {
        if peer != self.local && self.peers.insert(peer) {
            debug!(local = %self.local, peer = %peer, "peer added");
        }
    }

    /// Handle a disconnect: forget `peer` everywhere and tell every
    /// in-flight sequence.
    pub fn remove_peer(&mut self, peer: PeerId) {
        if self.peers.remove(&peer) {
            info!(local = %self.local, peer = %peer, "peer removed");
        }
        self.replicas.forget_subscriber(peer);
        let active: Vec<ReplicaId> = self.sequences.keys().copied().collect();
        for replica in active {
            let effects = match self.sequences.get_mut(&replica) {
                Some(flight) => flight.sequence.on_peer_removed(peer),
                None => continue,
            };
            self.execute(effects);
            self.retire_if_done(replica);
        }
    }

    // ── Replicas ─────────────────────────────────────────────────────

    /// Register a replica owned by this peer.
    pub fn create_replica(
        &mut self,
        id: ReplicaId,
        state: serde_json::Value,
        migratable: bool,
    ) -> Result<(), ReplicaError> {
        if self.replicas.contains(id) {
            return Err(ReplicaError::DuplicateReplica { replica: id });
        }
        self.replicas
            .insert(Replica::primary(id, self.local, state, migratable));
        self.routes.insert(id, self.local);
        info!(local = %self.local, replica = %id, migratable, "replica created");
        Ok(())
    }

    /// Register a proxy of a replica owned by `owner`.
    pub fn install_proxy(&mut self, id: ReplicaId, owner: PeerId, owner_seq: u64) {
        self.replicas.insert(Replica::proxy(id, owner, owner_seq));
        self.routes.insert(id, owner);
        debug!(local = %self.local, replica = %id, owner = %owner, "proxy installed");
    }

    /// Record that `peer` holds a proxy of a locally owned replica.
    pub fn subscribe(&mut self, replica: ReplicaId, peer: PeerId) -> Result<(), ReplicaError> {
        if !self.peers.contains(&peer) {
            return Err(ReplicaError::UnknownPeer { peer });
        }
        let local = self.local;
        let record = self
            .replicas
            .get_mut(replica)
            .ok_or(ReplicaError::UnknownReplica { replica })?;
        if !record.is_owned_by(local) {
            return Err(ReplicaError::NotOwner {
                replica,
                owner: record.owner,
            });
        }
        record.subscribers.insert(peer);
        Ok(())
    }

    /// Destroy a replica. An in-flight migration of it is aborted.
    pub fn destroy_replica(&mut self, replica: ReplicaId) -> Result<Replica, ReplicaError> {
        let record = self
            .replicas
            .remove(replica)
            .ok_or(ReplicaError::UnknownReplica { replica })?;
        self.routes.remove(&replica);
        info!(local = %self.local, replica = %replica, "replica destroyed");

        let effects = match self.sequences.get_mut(&replica) {
            Some(flight) => flight.sequence.on_replica_removed(),
            None => Vec::new(),
        };
        self.execute(effects);
        self.retire_if_done(replica);
        Ok(record)
    }

    // ── Migration ────────────────────────────────────────────────────

    /// Move ownership of a locally owned replica to `new_owner`.
    ///
    /// If a migration of the replica is already in flight it is redirected
    /// instead of starting a second one.
    pub fn migrate_replica(
        &mut self,
        replica: ReplicaId,
        new_owner: PeerId,
    ) -> Result<MigrateOutcome, ReplicaError> {
        let record = self
            .replicas
            .get(replica)
            .ok_or(ReplicaError::UnknownReplica { replica })?;
        if !record.is_owned_by(self.local) {
            return Err(ReplicaError::NotOwner {
                replica,
                owner: record.owner,
            });
        }
        if !record.migratable {
            return Err(ReplicaError::NotMigratable { replica });
        }
        if new_owner != self.local && !self.peers.contains(&new_owner) {
            return Err(ReplicaError::UnknownPeer { peer: new_owner });
        }
        let subscribers = record.subscribers.clone();

        if let Some(flight) = self.sequences.get_mut(&replica) {
            let redirect = flight.sequence.modify_new_owner(new_owner)?;
            self.execute(redirect.effects);
            return Ok(MigrateOutcome::Redirected(redirect.outcome));
        }

        if new_owner == self.local {
            return Ok(MigrateOutcome::AlreadyOwner);
        }

        let epoch = self.clock.next_generation();
        let sequence = MigrationSequence::new(
            replica,
            self.local,
            new_owner,
            subscribers,
            epoch,
            self.config,
        );
        let id = sequence.id();
        self.sequences.insert(
            replica,
            InFlight {
                sequence,
                started_at: Timestamp::now(),
            },
        );
        Ok(MigrateOutcome::Started(id))
    }

    /// Pump every in-flight sequence once.
    pub fn update(&mut self) {
        let active: Vec<ReplicaId> = self.sequences.keys().copied().collect();
        for replica in active {
            let effects = match self.sequences.get_mut(&replica) {
                Some(flight) => flight.sequence.update(),
                None => continue,
            };
            self.execute(effects);
            self.retire_if_done(replica);
        }
    }

    fn retire_if_done(&mut self, replica: ReplicaId) {
        let done = self
            .sequences
            .get(&replica)
            .is_some_and(|f| f.sequence.is_done());
        if !done {
            return;
        }
        let Some(flight) = self.sequences.remove(&replica) else {
            return;
        };
        let seq = flight.sequence;
        let Some(outcome) = seq.outcome() else {
            warn!(replica = %replica, "finished migration without outcome");
            return;
        };
        let record = MigrationRecord {
            id: seq.id(),
            replica,
            from: seq.source_owner(),
            to: seq.new_owner(),
            outcome,
            started_at: flight.started_at,
            finished_at: Timestamp::now(),
        };
        info!(local = %self.local, record = %record, "migration retired");
        self.history.push(record);
    }

    // ── Effects ──────────────────────────────────────────────────────

    fn execute(&mut self, effects: Vec<MigrationEffect>) {
        for effect in effects {
            if let Err(err) = self.apply(&effect) {
                warn!(
                    local = %self.local,
                    replica = %effect.replica(),
                    error = %err,
                    "migration effect failed"
                );
            }
        }
    }

    fn apply(&mut self, effect: &MigrationEffect) -> Result<(), ReplicaError> {
        let replica = effect.replica();
        if !self.replicas.contains(replica) {
            debug!(local = %self.local, replica = %replica, effect = ?effect, "effect for missing replica skipped");
            return Ok(());
        }

        match *effect {
            MigrationEffect::SuspendUpstream { replica } => {
                if let Some(record) = self.replicas.get_mut(replica) {
                    record.upstream_suspended = true;
                }
                Ok(())
            }
            MigrationEffect::ResumeUpstream { replica } => {
                if let Some(record) = self.replicas.get_mut(replica) {
                    record.upstream_suspended = false;
                }
                Ok(())
            }
            MigrationEffect::RequestUpstreamFlush { peer, replica, epoch } => {
                self.send(peer, MigrationMessage::SuspendUpstream { replica, epoch })
            }
            MigrationEffect::RequestDownstreamFlush { peer, replica, epoch } => {
                self.send(peer, MigrationMessage::FlushDownstream { replica, epoch })
            }
            MigrationEffect::SendRoutingChange {
                peer,
                replica,
                new_owner,
                epoch,
            } => self.send(
                peer,
                MigrationMessage::RoutingChange {
                    replica,
                    new_owner,
                    epoch,
                },
            ),
            MigrationEffect::SendHandoffPayload { peer, replica, epoch } => {
                let message = self.handoff_message(replica, peer, epoch)?;
                self.send(peer, message)
            }
            MigrationEffect::SendRollback {
                peer,
                replica,
                owner,
                epoch,
            } => self.send(
                peer,
                MigrationMessage::Rollback {
                    replica,
                    owner,
                    epoch,
                },
            ),
            MigrationEffect::CommitOwnership { replica, new_owner } => {
                if let Some(record) = self.replicas.get_mut(replica) {
                    record.owner = new_owner;
                    record.owner_seq += 1;
                    record.upstream_suspended = false;
                    record.subscribers.clear();
                }
                self.routes.insert(replica, new_owner);
                Ok(())
            }
            MigrationEffect::AnnounceOwner {
                peer,
                replica,
                new_owner,
            } => {
                let owner_seq = self.replicas.get(replica).map_or(0, |r| r.owner_seq);
                self.send(
                    peer,
                    MigrationMessage::NewOwner {
                        replica,
                        owner: new_owner,
                        owner_seq,
                    },
                )
            }
        }
    }

    fn handoff_message(
        &self,
        replica: ReplicaId,
        to: PeerId,
        epoch: gridmate_core::Epoch,
    ) -> Result<MigrationMessage, ReplicaError> {
        let record = self
            .replicas
            .get(replica)
            .ok_or(ReplicaError::UnknownReplica { replica })?;
        let state = serde_json::to_vec(&record.state)?;
        let mut subscribers = record.subscribers.clone();
        subscribers.insert(self.local);
        subscribers.remove(&to);
        Ok(MigrationMessage::Handoff {
            replica,
            state,
            owner_seq: record.owner_seq,
            subscribers,
            epoch,
        })
    }

    fn send(&mut self, to: PeerId, message: MigrationMessage) -> Result<(), ReplicaError> {
        trace!(local = %self.local, to = %to, kind = message.kind(), replica = %message.replica(), "send");
        self.transport.send(to, message)?;
        Ok(())
    }

    // ── Inbound ──────────────────────────────────────────────────────

    /// Handle a message from `from`.
    ///
    /// Requests are applied and acknowledged with their own epoch.
    /// Acknowledgments are fed to the matching sequence. Messages about
    /// replicas this peer does not know are dropped.
    pub fn receive(&mut self, from: PeerId, message: MigrationMessage) -> Result<(), ReplicaError> {
        let replica = message.replica();
        trace!(local = %self.local, from = %from, kind = message.kind(), replica = %replica, "receive");

        match message {
            MigrationMessage::SuspendUpstream { epoch, .. } => {
                let Some(record) = self.replicas.get_mut(replica) else {
                    return self.drop_unknown(from, replica);
                };
                record.upstream_suspended = true;
                self.reply_ack(from, replica, epoch);
            }
            MigrationMessage::FlushDownstream { epoch, .. } => {
                if !self.replicas.contains(replica) {
                    return self.drop_unknown(from, replica);
                }
                self.reply_ack(from, replica, epoch);
            }
            MigrationMessage::RoutingChange {
                new_owner, epoch, ..
            } => {
                self.routes.insert(replica, new_owner);
                debug!(local = %self.local, replica = %replica, route = %new_owner, "route changed");
                // Routing back to the current owner ends the migration attempt.
                if let Some(record) = self.replicas.get_mut(replica) {
                    if record.owner == new_owner && record.upstream_suspended {
                        record.upstream_suspended = false;
                        debug!(local = %self.local, replica = %replica, "upstream resumed");
                    }
                }
                self.reply_ack(from, replica, epoch);
            }
            MigrationMessage::Handoff {
                state,
                owner_seq,
                subscribers,
                epoch,
                ..
            } => {
                let installed = self
                    .replicas
                    .get(replica)
                    .is_some_and(|r| r.is_owned_by(self.local) && r.owner_seq == owner_seq + 1);
                if installed {
                    debug!(local = %self.local, replica = %replica, from = %from, "duplicate hand-off acknowledged");
                    self.reply_ack(from, replica, epoch);
                    return Ok(());
                }
                let state: serde_json::Value = serde_json::from_slice(&state)?;
                let mut record = Replica::primary(replica, self.local, state, true);
                record.owner_seq = owner_seq + 1;
                record.subscribers = subscribers;
                record.subscribers.remove(&self.local);
                self.replicas.insert(record);
                self.routes.insert(replica, self.local);
                info!(local = %self.local, replica = %replica, from = %from, owner_seq = owner_seq + 1, "replica handed off to this peer");
                self.reply_ack(from, replica, epoch);
            }
            MigrationMessage::Rollback { owner, epoch, .. } => {
                self.routes.insert(replica, owner);
                if let Some(record) = self.replicas.get_mut(replica) {
                    record.owner = owner;
                    record.upstream_suspended = false;
                }
                info!(local = %self.local, replica = %replica, owner = %owner, "migration rolled back");
                self.reply_ack(from, replica, epoch);
            }
            MigrationMessage::NewOwner {
                owner, owner_seq, ..
            } => {
                self.routes.insert(replica, owner);
                if let Some(record) = self.replicas.get_mut(replica) {
                    if owner_seq >= record.owner_seq {
                        record.owner = owner;
                        record.owner_seq = owner_seq;
                        record.upstream_suspended = false;
                    } else {
                        debug!(local = %self.local, replica = %replica, owner_seq, "outdated owner announcement ignored");
                    }
                }
            }
            MigrationMessage::Ack { epoch, .. } => {
                let effects = match self.sequences.get_mut(&replica) {
                    Some(flight) => flight.sequence.on_peer_ack(from, epoch),
                    None => {
                        debug!(local = %self.local, replica = %replica, from = %from, epoch = %epoch, "ack without migration dropped");
                        return Ok(());
                    }
                };
                self.execute(effects);
                self.retire_if_done(replica);
            }
        }
        Ok(())
    }

    fn drop_unknown(&self, from: PeerId, replica: ReplicaId) -> Result<(), ReplicaError> {
        debug!(local = %self.local, from = %from, replica = %replica, "message for unknown replica dropped");
        Ok(())
    }

    fn reply_ack(&mut self, to: PeerId, replica: ReplicaId, epoch: gridmate_core::Epoch) {
        if let Err(err) = self.send(to, MigrationMessage::Ack { replica, epoch }) {
            warn!(local = %self.local, to = %to, replica = %replica, error = %err, "acknowledgment not sent");
        }
    }
}
