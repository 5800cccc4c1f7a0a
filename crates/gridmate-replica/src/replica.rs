//! # Replica Records
//!
//! A [`Replica`] is one peer's view of a replicated object. The owning peer
//! holds the primary (authoritative state and the subscriber set); every
//! other holder has a proxy whose `owner` tells it where upstream traffic
//! goes.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use gridmate_core::{PeerId, ReplicaId};

/// One peer's record of a replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Replica {
    /// Replica identifier.
    pub id: ReplicaId,
    /// The peer believed to own the replica.
    pub owner: PeerId,
    /// Ownership sequence number. Incremented once per committed migration.
    pub owner_seq: u64,
    /// Remote peers holding a proxy. Only maintained on the primary.
    pub subscribers: BTreeSet<PeerId>,
    /// Whether ownership may be migrated.
    pub migratable: bool,
    /// Whether upstream writes are currently held back.
    pub upstream_suspended: bool,
    /// Application state. Transferred in full on hand-off.
    pub state: serde_json::Value,
}

impl Replica {
    /// A freshly created primary owned by `owner`.
    pub fn primary(id: ReplicaId, owner: PeerId, state: serde_json::Value, migratable: bool) -> Self {
        Self {
            id,
            owner,
            owner_seq: 0,
            subscribers: BTreeSet::new(),
            migratable,
            upstream_suspended: false,
            state,
        }
    }

    /// A proxy of a replica owned by `owner`.
    pub fn proxy(id: ReplicaId, owner: PeerId, owner_seq: u64) -> Self {
        Self {
            id,
            owner,
            owner_seq,
            subscribers: BTreeSet::new(),
            migratable: true,
            upstream_suspended: false,
            state: serde_json::Value::Null,
        }
    }

    /// Whether `local` holds the primary.
    pub fn is_owned_by(&self, local: PeerId) -> bool {
        self.owner == local
    }
}

/// The replicas known to one peer, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct ReplicaTable {
    replicas: BTreeMap<ReplicaId, Replica>,
}

impl ReplicaTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record, returning the previous one.
    pub fn insert(&mut self, replica: Replica) -> Option<Replica> {
        self.replicas.insert(replica.id, replica)
    }

    /// Remove a record.
    pub fn remove(&mut self, id: ReplicaId) -> Option<Replica> {
        self.replicas.remove(&id)
    }

    /// Look up a record.
    pub fn get(&self, id: ReplicaId) -> Option<&Replica> {
        self.replicas.get(&id)
    }

    /// Look up a record mutably.
    pub fn get_mut(&mut self, id: ReplicaId) -> Option<&mut Replica> {
        self.replicas.get_mut(&id)
    }

    /// Whether a record exists.
    pub fn contains(&self, id: ReplicaId) -> bool {
        self.replicas.contains_key(&id)
    }

    /// All records in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Replica> {
        self.replicas.values()
    }

    /// Primaries held by `local`.
    pub fn owned_by(&self, local: PeerId) -> impl Iterator<Item = &Replica> {
        self.replicas.values().filter(move |r| r.is_owned_by(local))
    }

    /// Remove `peer` from the subscriber set of every record.
    pub fn forget_subscriber(&mut self, peer: PeerId) {
        for replica in self.replicas.values_mut() {
            replica.subscribers.remove(&peer);
        }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }
}
