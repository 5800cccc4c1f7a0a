//! # Replica Ownership Migration Sequence
//!
//! Coordinates the hand-off of one replica from its current owner to a new
//! owner. The sequence is a hierarchical state machine:
//!
//! ```text
//! Top                          default sink for unhandled events
//! ├── Migrating                replica removal, peer loss, acks, redirects
//! │   ├── FlushUpstream        (initial)
//! │   ├── FlushDownstream
//! │   ├── ChangeRoutingForMigration
//! │   ├── HandoffReplica
//! │   ├── Rollback
//! │   └── Abort
//! ├── ChangeRoutingOnly
//! └── Idle                     (terminal)
//! ```
//!
//! The happy path is `FlushUpstream → FlushDownstream →
//! ChangeRoutingForMigration → HandoffReplica → Idle`. Each of those phases
//! sends a request to a set of peers, waits in a [`PeerAckTracker`] until
//! every peer has acknowledged with the phase's [`Epoch`], and advances on
//! the next `ME_UPDATE`.
//!
//! ## Side-Effect Model
//!
//! The sequence never talks to the network or touches a replica. Every
//! action it wants performed is returned from [`MigrationSequence::dispatch`]
//! (and its wrappers) as a [`MigrationEffect`]. The replica manager executes
//! them. This keeps the transition logic testable without a network layer.
//!
//! ## Handles, Not References
//!
//! The sequence names its replica by [`ReplicaId`] only. Once
//! `ME_REPLICA_REMOVED` is delivered it emits nothing further.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use gridmate_core::{Epoch, MigrationId, PeerId, ReplicaId};

use crate::acks::PeerAckTracker;
use crate::config::MigrationConfig;
use crate::hsm::{self, Handled, Hierarchy};

// ── Migration State ──────────────────────────────────────────────────

/// Node of the migration state hierarchy.
///
/// `Top` and `Migrating` are superstates; a live sequence always rests in
/// one of the leaf states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MigrationState {
    /// Root superstate. Its handler is the default sink.
    Top,
    /// Superstate of every phase of a full ownership migration.
    Migrating,
    /// Upstream writes suspended; waiting for peers to apply in-flight state.
    FlushUpstream,
    /// Waiting for peers to drain outbound data destined for the replica.
    FlushDownstream,
    /// Peers repoint routing to the new owner.
    ChangeRoutingForMigration,
    /// Full state sent to the new owner; ownership flips on its ack.
    HandoffReplica,
    /// Restoring prior routing after a failed precondition.
    Rollback,
    /// Replica destroyed mid-sequence; no further side effects.
    Abort,
    /// Routing fix without ownership hand-off.
    ChangeRoutingOnly,
    /// Finished. Terminal.
    Idle,
}

impl MigrationState {
    /// Every node of the hierarchy, parents before children.
    pub const ALL: [MigrationState; 10] = [
        Self::Top,
        Self::Migrating,
        Self::FlushUpstream,
        Self::FlushDownstream,
        Self::ChangeRoutingForMigration,
        Self::HandoffReplica,
        Self::Rollback,
        Self::Abort,
        Self::ChangeRoutingOnly,
        Self::Idle,
    ];

    /// The canonical string name of this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Top => "TOP",
            Self::Migrating => "MIGRATING",
            Self::FlushUpstream => "FLUSH_UPSTREAM",
            Self::FlushDownstream => "FLUSH_DOWNSTREAM",
            Self::ChangeRoutingForMigration => "CHANGE_ROUTING_FOR_MIGRATION",
            Self::HandoffReplica => "HANDOFF_REPLICA",
            Self::Rollback => "ROLLBACK",
            Self::Abort => "ABORT",
            Self::ChangeRoutingOnly => "CHANGE_ROUTING_ONLY",
            Self::Idle => "IDLE",
        }
    }

    /// Whether this is the terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Whether this node only groups other states.
    pub fn is_superstate(&self) -> bool {
        matches!(self, Self::Top | Self::Migrating)
    }

    /// Whether the state sends requests and waits for acknowledgments.
    pub fn awaits_acks(&self) -> bool {
        matches!(
            self,
            Self::FlushUpstream
                | Self::FlushDownstream
                | Self::ChangeRoutingForMigration
                | Self::HandoffReplica
                | Self::Rollback
                | Self::ChangeRoutingOnly
        )
    }

    /// Phases before ownership has been committed. Losing the new owner in
    /// one of these rolls the migration back.
    pub fn is_pre_commit(&self) -> bool {
        matches!(
            self,
            Self::FlushUpstream
                | Self::FlushDownstream
                | Self::ChangeRoutingForMigration
                | Self::HandoffReplica
        )
    }

    /// Phases in which the target owner may still be changed.
    pub fn accepts_redirect(&self) -> bool {
        matches!(
            self,
            Self::FlushUpstream | Self::FlushDownstream | Self::ChangeRoutingForMigration
        )
    }

    /// The state entered once this phase's acknowledgments are complete.
    ///
    /// No wildcard, so a new variant must be placed here explicitly.
    pub fn successor(&self) -> Option<MigrationState> {
        match self {
            Self::FlushUpstream => Some(Self::FlushDownstream),
            Self::FlushDownstream => Some(Self::ChangeRoutingForMigration),
            Self::ChangeRoutingForMigration => Some(Self::HandoffReplica),
            Self::HandoffReplica | Self::Rollback | Self::ChangeRoutingOnly | Self::Abort => {
                Some(Self::Idle)
            }
            Self::Top | Self::Migrating | Self::Idle => None,
        }
    }
}

impl Hierarchy for MigrationState {
    fn parent(self) -> Option<Self> {
        match self {
            Self::Top => None,
            Self::Migrating | Self::ChangeRoutingOnly | Self::Idle => Some(Self::Top),
            Self::FlushUpstream
            | Self::FlushDownstream
            | Self::ChangeRoutingForMigration
            | Self::HandoffReplica
            | Self::Rollback
            | Self::Abort => Some(Self::Migrating),
        }
    }
}

impl std::fmt::Display for MigrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static transition table: `(from, trigger, to)`.
///
/// Documents every edge the handlers can take. Used for rendering; the
/// handlers below are the source of truth.
pub const TRANSITIONS: &[(MigrationState, &str, MigrationState)] = &[
    (MigrationState::FlushUpstream, "acks complete", MigrationState::FlushDownstream),
    (MigrationState::FlushDownstream, "acks complete", MigrationState::ChangeRoutingForMigration),
    (MigrationState::ChangeRoutingForMigration, "acks complete", MigrationState::HandoffReplica),
    (MigrationState::ChangeRoutingForMigration, "ME_MODIFY_NEW_OWNER (third peer)", MigrationState::ChangeRoutingForMigration),
    (MigrationState::HandoffReplica, "new owner ack (commit)", MigrationState::Idle),
    (MigrationState::Migrating, "ME_PEER_REMOVED (new owner, pre-commit)", MigrationState::Rollback),
    (MigrationState::Migrating, "retries exhausted (new owner pending)", MigrationState::Rollback),
    (MigrationState::Migrating, "ME_MODIFY_NEW_OWNER (current owner)", MigrationState::ChangeRoutingOnly),
    (MigrationState::Migrating, "ME_REPLICA_REMOVED", MigrationState::Abort),
    (MigrationState::ChangeRoutingOnly, "ME_REPLICA_REMOVED", MigrationState::Abort),
    (MigrationState::Rollback, "acks complete", MigrationState::Idle),
    (MigrationState::ChangeRoutingOnly, "acks complete", MigrationState::Idle),
    (MigrationState::Abort, "any event", MigrationState::Idle),
];

// ── Events ───────────────────────────────────────────────────────────

/// Input to the migration state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationEvent {
    /// Per-tick pump.
    Update,
    /// The replica was destroyed.
    ReplicaRemoved {
        /// The destroyed replica.
        replica: ReplicaId,
    },
    /// A peer disconnected.
    PeerRemoved {
        /// The lost peer.
        peer: PeerId,
    },
    /// A peer acknowledged a request.
    PeerAck {
        /// The acknowledging peer.
        peer: PeerId,
        /// The epoch echoed from the request.
        epoch: Epoch,
    },
    /// Redirect the migration to a different target owner.
    ModifyNewOwner {
        /// The requested target.
        new_owner: PeerId,
    },
}

impl MigrationEvent {
    /// Protocol name of the event, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Update => "ME_UPDATE",
            Self::ReplicaRemoved { .. } => "ME_REPLICA_REMOVED",
            Self::PeerRemoved { .. } => "ME_PEER_REMOVED",
            Self::PeerAck { .. } => "ME_PEER_ACK",
            Self::ModifyNewOwner { .. } => "ME_MODIFY_NEW_OWNER",
        }
    }
}

// ── Effects ──────────────────────────────────────────────────────────

/// An action the sequence asks its replica manager to perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationEffect {
    /// Stop accepting upstream writes for the replica locally.
    SuspendUpstream {
        /// Target replica.
        replica: ReplicaId,
    },
    /// Resume upstream writes for the replica locally.
    ResumeUpstream {
        /// Target replica.
        replica: ReplicaId,
    },
    /// Ask `peer` to stop sending upstream data and confirm in-flight state
    /// has been applied.
    RequestUpstreamFlush {
        /// Recipient.
        peer: PeerId,
        /// Target replica.
        replica: ReplicaId,
        /// Epoch the acknowledgment must echo.
        epoch: Epoch,
    },
    /// Ask `peer` to confirm outbound data for the replica has drained.
    RequestDownstreamFlush {
        /// Recipient.
        peer: PeerId,
        /// Target replica.
        replica: ReplicaId,
        /// Epoch the acknowledgment must echo.
        epoch: Epoch,
    },
    /// Tell `peer` to route upstream traffic for the replica to `new_owner`.
    SendRoutingChange {
        /// Recipient.
        peer: PeerId,
        /// Target replica.
        replica: ReplicaId,
        /// Where traffic should go from now on.
        new_owner: PeerId,
        /// Epoch the acknowledgment must echo.
        epoch: Epoch,
    },
    /// Send the full replica state and ownership token to `peer`. The
    /// manager serializes the state when it executes this effect.
    SendHandoffPayload {
        /// Recipient (the new owner).
        peer: PeerId,
        /// Target replica.
        replica: ReplicaId,
        /// Epoch the acknowledgment must echo.
        epoch: Epoch,
    },
    /// Tell `peer` the migration did not happen and `owner` is still the
    /// owner.
    SendRollback {
        /// Recipient.
        peer: PeerId,
        /// Target replica.
        replica: ReplicaId,
        /// The unchanged owner.
        owner: PeerId,
        /// Epoch the acknowledgment must echo.
        epoch: Epoch,
    },
    /// Flip the local replica record to `new_owner`. Emitted exactly once,
    /// on the commit transition.
    CommitOwnership {
        /// Target replica.
        replica: ReplicaId,
        /// The new authoritative owner.
        new_owner: PeerId,
    },
    /// Inform `peer` of the committed owner. Not acknowledged.
    AnnounceOwner {
        /// Recipient.
        peer: PeerId,
        /// Target replica.
        replica: ReplicaId,
        /// The new authoritative owner.
        new_owner: PeerId,
    },
}

impl MigrationEffect {
    /// The replica this effect concerns.
    pub fn replica(&self) -> ReplicaId {
        match self {
            Self::SuspendUpstream { replica }
            | Self::ResumeUpstream { replica }
            | Self::RequestUpstreamFlush { replica, .. }
            | Self::RequestDownstreamFlush { replica, .. }
            | Self::SendRoutingChange { replica, .. }
            | Self::SendHandoffPayload { replica, .. }
            | Self::SendRollback { replica, .. }
            | Self::CommitOwnership { replica, .. }
            | Self::AnnounceOwner { replica, .. } => *replica,
        }
    }

    /// The remote recipient, or `None` for effects applied locally.
    pub fn peer(&self) -> Option<PeerId> {
        match self {
            Self::SuspendUpstream { .. }
            | Self::ResumeUpstream { .. }
            | Self::CommitOwnership { .. } => None,
            Self::RequestUpstreamFlush { peer, .. }
            | Self::RequestDownstreamFlush { peer, .. }
            | Self::SendRoutingChange { peer, .. }
            | Self::SendHandoffPayload { peer, .. }
            | Self::SendRollback { peer, .. }
            | Self::AnnounceOwner { peer, .. } => Some(*peer),
        }
    }

    /// Whether executing the effect sends a message.
    pub fn is_outbound(&self) -> bool {
        self.peer().is_some()
    }
}

// ── Outcomes and Errors ──────────────────────────────────────────────

/// How a finished sequence ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationOutcome {
    /// Ownership moved to the new owner.
    Committed,
    /// A precondition failed; routing and ownership were restored.
    RolledBack,
    /// The target collapsed onto the current owner; only routing was fixed.
    RoutingOnly,
    /// The replica was destroyed mid-sequence.
    Aborted,
}

impl std::fmt::Display for MigrationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Committed => "committed",
            Self::RolledBack => "rolled_back",
            Self::RoutingOnly => "routing_only",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Result of a successful [`MigrationSequence::modify_new_owner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModifyOutcome {
    /// The requested peer already was the target.
    Unchanged,
    /// The requested peer is the current owner; only routing is fixed.
    CollapsedToRoutingOnly,
    /// The target changed; completed flush phases were kept.
    Retargeted {
        /// The previous target.
        previous: PeerId,
    },
}

/// A redirect and the effects it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    /// What the redirect did.
    pub outcome: ModifyOutcome,
    /// Effects to execute (non-empty when a phase was re-entered).
    pub effects: Vec<MigrationEffect>,
}

/// Errors from migration sequence operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MigrationError {
    /// The target can no longer be changed. The hand-off payload may
    /// already be applied at the current target.
    #[error("cannot redirect migration of {replica} to {requested} in state {state}")]
    RedirectRejected {
        /// The migrating replica.
        replica: ReplicaId,
        /// The rejected target.
        requested: PeerId,
        /// The state the sequence was in.
        state: MigrationState,
    },

    /// The sequence already reached `Idle`.
    #[error("migration of {replica} has already finished")]
    Finished {
        /// The replica whose migration finished.
        replica: ReplicaId,
    },
}

/// Serializable view of an in-flight sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStatus {
    /// Sequence identifier.
    pub id: MigrationId,
    /// The migrating replica.
    pub replica: ReplicaId,
    /// Owner when the sequence began.
    pub from: PeerId,
    /// Current target.
    pub to: PeerId,
    /// Current state.
    pub state: MigrationState,
    /// Current epoch.
    pub epoch: Epoch,
    /// Peers yet to acknowledge the current phase.
    pub pending: Vec<PeerId>,
    /// Retransmissions spent in the current phase.
    pub retries: u32,
}

// ── Migration Sequence ───────────────────────────────────────────────

/// One in-flight ownership migration of one replica.
///
/// Created by the replica manager; driven by [`update`](Self::update) once
/// per tick and by the notification methods as network events arrive;
/// dropped once [`is_done`](Self::is_done) is true.
#[derive(Debug, Clone)]
pub struct MigrationSequence {
    id: MigrationId,
    replica: ReplicaId,
    source_owner: PeerId,
    new_owner: PeerId,
    subscribers: BTreeSet<PeerId>,
    participants: BTreeSet<PeerId>,
    epoch: Epoch,
    state: MigrationState,
    pending: PeerAckTracker,
    config: MigrationConfig,
    ticks_waiting: u32,
    retries: u32,
    committed: bool,
    outcome: Option<MigrationOutcome>,
    outbox: Vec<MigrationEffect>,
    redirect_result: Option<Result<ModifyOutcome, MigrationError>>,
}

impl MigrationSequence {
    /// Start migrating `replica` from `source_owner` to `new_owner`.
    ///
    /// `subscribers` are the remote peers holding the replica; the source
    /// owner is filtered out. `epoch` is the first epoch of a fresh
    /// generation. The sequence enters `FlushUpstream` immediately; its
    /// entry effects are returned by the first [`update`](Self::update).
    ///
    /// A `new_owner` equal to `source_owner` starts in `ChangeRoutingOnly`.
    pub fn new<I>(
        replica: ReplicaId,
        source_owner: PeerId,
        new_owner: PeerId,
        subscribers: I,
        epoch: Epoch,
        config: MigrationConfig,
    ) -> Self
    where
        I: IntoIterator<Item = PeerId>,
    {
        let subscribers: BTreeSet<PeerId> = subscribers
            .into_iter()
            .filter(|p| *p != source_owner)
            .collect();

        let mut seq = Self {
            id: MigrationId::new(),
            replica,
            source_owner,
            new_owner,
            subscribers,
            participants: BTreeSet::new(),
            epoch,
            state: MigrationState::Top,
            pending: PeerAckTracker::new(),
            config,
            ticks_waiting: 0,
            retries: 0,
            committed: false,
            outcome: None,
            outbox: Vec::new(),
            redirect_result: None,
        };

        info!(
            migration = %seq.id,
            replica = %replica,
            from = %source_owner,
            to = %new_owner,
            "starting replica migration"
        );

        let initial = if new_owner == source_owner {
            MigrationState::ChangeRoutingOnly
        } else {
            MigrationState::FlushUpstream
        };
        seq.transition_to(initial);
        seq
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Sequence identifier.
    pub fn id(&self) -> MigrationId {
        self.id
    }

    /// The migrating replica.
    pub fn replica(&self) -> ReplicaId {
        self.replica
    }

    /// Owner when the sequence began.
    pub fn source_owner(&self) -> PeerId {
        self.source_owner
    }

    /// Current target owner.
    pub fn new_owner(&self) -> PeerId {
        self.new_owner
    }

    /// Current leaf state.
    pub fn state(&self) -> MigrationState {
        self.state
    }

    /// Current epoch; acknowledgments must echo it.
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Peers yet to acknowledge the current phase.
    pub fn pending(&self) -> &PeerAckTracker {
        &self.pending
    }

    /// Remote peers still holding the replica.
    pub fn subscribers(&self) -> &BTreeSet<PeerId> {
        &self.subscribers
    }

    /// Peers that have received at least one request and are still connected.
    pub fn participants(&self) -> &BTreeSet<PeerId> {
        &self.participants
    }

    /// Retransmissions spent in the current phase.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Whether ownership has been committed to the new owner.
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// How the sequence ended (or is ending).
    pub fn outcome(&self) -> Option<MigrationOutcome> {
        self.outcome
    }

    /// True iff the sequence reached `Idle`.
    pub fn is_done(&self) -> bool {
        self.state.is_terminal()
    }

    /// Serializable snapshot.
    pub fn status(&self) -> MigrationStatus {
        MigrationStatus {
            id: self.id,
            replica: self.replica,
            from: self.source_owner,
            to: self.new_owner,
            state: self.state,
            epoch: self.epoch,
            pending: self.pending.to_vec(),
            retries: self.retries,
        }
    }

    // ── Event entry points ───────────────────────────────────────────

    /// Feed `ME_UPDATE`.
    pub fn update(&mut self) -> Vec<MigrationEffect> {
        self.dispatch(MigrationEvent::Update)
    }

    /// Feed `ME_PEER_ACK`.
    pub fn on_peer_ack(&mut self, peer: PeerId, epoch: Epoch) -> Vec<MigrationEffect> {
        self.dispatch(MigrationEvent::PeerAck { peer, epoch })
    }

    /// Feed `ME_PEER_REMOVED`.
    pub fn on_peer_removed(&mut self, peer: PeerId) -> Vec<MigrationEffect> {
        self.dispatch(MigrationEvent::PeerRemoved { peer })
    }

    /// Feed `ME_REPLICA_REMOVED` for this sequence's replica.
    pub fn on_replica_removed(&mut self) -> Vec<MigrationEffect> {
        self.dispatch(MigrationEvent::ReplicaRemoved {
            replica: self.replica,
        })
    }

    /// Feed `ME_MODIFY_NEW_OWNER`.
    ///
    /// Redirects are accepted until the hand-off begins. From
    /// `HandoffReplica` on they are rejected: the payload may already be
    /// applied at the current target, so the caller must migrate again from
    /// the new owner once this sequence completes.
    pub fn modify_new_owner(&mut self, new_owner: PeerId) -> Result<Redirect, MigrationError> {
        if self.is_done() {
            return Err(MigrationError::Finished {
                replica: self.replica,
            });
        }
        self.redirect_result = None;
        let effects = self.dispatch(MigrationEvent::ModifyNewOwner { new_owner });
        let result = self.redirect_result.take().unwrap_or_else(|| {
            Err(MigrationError::RedirectRejected {
                replica: self.replica,
                requested: new_owner,
                state: self.state,
            })
        });
        result.map(|outcome| Redirect { outcome, effects })
    }

    /// Offer an event to the state hierarchy and collect the effects.
    pub fn dispatch(&mut self, event: MigrationEvent) -> Vec<MigrationEffect> {
        trace!(replica = %self.replica, state = %self.state, event = event.name(), "dispatch");
        let start = self.state;
        hsm::dispatch(start, |s| self.handle(s, &event));
        std::mem::take(&mut self.outbox)
    }

    // ── Handlers ─────────────────────────────────────────────────────

    fn handle(&mut self, state: MigrationState, event: &MigrationEvent) -> Handled {
        match state {
            MigrationState::Top => self.default_handler(event),
            MigrationState::Migrating => self.migrating_handler(event),
            MigrationState::FlushUpstream
            | MigrationState::FlushDownstream
            | MigrationState::ChangeRoutingForMigration
            | MigrationState::HandoffReplica
            | MigrationState::Rollback => self.waiting_handler(event),
            MigrationState::Abort => self.abort_handler(event),
            MigrationState::ChangeRoutingOnly => self.routing_only_handler(event),
            MigrationState::Idle => self.idle_handler(event),
        }
    }

    fn default_handler(&mut self, event: &MigrationEvent) -> Handled {
        debug!(
            replica = %self.replica,
            state = %self.state,
            event = event.name(),
            "unhandled migration event ignored"
        );
        Handled::Consumed
    }

    fn migrating_handler(&mut self, event: &MigrationEvent) -> Handled {
        match *event {
            MigrationEvent::ReplicaRemoved { replica } if replica == self.replica => {
                info!(replica = %self.replica, state = %self.state, "replica removed, aborting migration");
                self.transition_to(MigrationState::Abort);
                Handled::Consumed
            }
            MigrationEvent::PeerRemoved { peer } => {
                self.forget_peer(peer);
                if peer == self.new_owner && self.state.is_pre_commit() {
                    warn!(
                        replica = %self.replica,
                        peer = %peer,
                        state = %self.state,
                        "new owner lost before commit, rolling back"
                    );
                    self.transition_to(MigrationState::Rollback);
                }
                Handled::Consumed
            }
            MigrationEvent::PeerAck { peer, epoch } => {
                self.accept_ack(peer, epoch);
                Handled::Consumed
            }
            MigrationEvent::ModifyNewOwner { new_owner } => {
                let result = self.redirect(new_owner);
                self.redirect_result = Some(result);
                Handled::Consumed
            }
            _ => Handled::Unhandled,
        }
    }

    fn waiting_handler(&mut self, event: &MigrationEvent) -> Handled {
        match event {
            MigrationEvent::Update => {
                self.poll_phase();
                Handled::Consumed
            }
            _ => Handled::Unhandled,
        }
    }

    fn abort_handler(&mut self, event: &MigrationEvent) -> Handled {
        trace!(replica = %self.replica, event = event.name(), "abort drained");
        self.transition_to(MigrationState::Idle);
        Handled::Consumed
    }

    fn routing_only_handler(&mut self, event: &MigrationEvent) -> Handled {
        match *event {
            MigrationEvent::Update => self.poll_phase(),
            MigrationEvent::ReplicaRemoved { replica } if replica == self.replica => {
                info!(replica = %self.replica, "replica removed during routing fix, aborting");
                self.transition_to(MigrationState::Abort);
            }
            MigrationEvent::PeerRemoved { peer } => self.forget_peer(peer),
            MigrationEvent::PeerAck { peer, epoch } => self.accept_ack(peer, epoch),
            MigrationEvent::ModifyNewOwner { new_owner } => {
                let result = self.redirect(new_owner);
                self.redirect_result = Some(result);
            }
            MigrationEvent::ReplicaRemoved { .. } => return Handled::Unhandled,
        }
        Handled::Consumed
    }

    fn idle_handler(&mut self, event: &MigrationEvent) -> Handled {
        match event {
            MigrationEvent::Update => Handled::Consumed,
            _ => Handled::Unhandled,
        }
    }

    // ── Phase mechanics ──────────────────────────────────────────────

    /// Advance if the phase is satisfied, otherwise count a tick and
    /// retransmit on the retry cadence.
    fn poll_phase(&mut self) {
        if self.pending.is_satisfied() {
            if self.state == MigrationState::HandoffReplica {
                self.commit();
            } else if let Some(next) = self.state.successor() {
                self.transition_to(next);
            }
            return;
        }

        self.ticks_waiting = self.ticks_waiting.saturating_add(1);
        if self.ticks_waiting < self.config.retry_interval_ticks {
            return;
        }
        self.ticks_waiting = 0;

        if self.retries >= self.config.max_retries {
            self.give_up();
            return;
        }

        self.retries += 1;
        let laggards = self.pending.to_vec();
        debug!(
            replica = %self.replica,
            state = %self.state,
            epoch = %self.epoch,
            retry = self.retries,
            pending = laggards.len(),
            "retransmitting unacknowledged requests"
        );
        for peer in laggards {
            if let Some(effect) = self.request_for(peer) {
                self.outbox.push(effect);
            }
        }
    }

    /// Retries exhausted. Without the new owner there is nothing to hand
    /// off to, so roll back; any other laggard is dropped from the phase.
    fn give_up(&mut self) {
        let laggards = self.pending.to_vec();
        if self.state.is_pre_commit() && self.pending.contains(self.new_owner) {
            warn!(
                replica = %self.replica,
                state = %self.state,
                new_owner = %self.new_owner,
                "new owner unresponsive, rolling back"
            );
            self.transition_to(MigrationState::Rollback);
            return;
        }
        warn!(
            replica = %self.replica,
            state = %self.state,
            laggards = ?laggards,
            "retries exhausted, dropping unresponsive peers from phase"
        );
        for peer in laggards {
            self.pending.ack(peer);
        }
    }

    fn commit(&mut self) {
        self.committed = true;
        self.outcome = Some(MigrationOutcome::Committed);
        self.outbox.push(MigrationEffect::CommitOwnership {
            replica: self.replica,
            new_owner: self.new_owner,
        });
        let audience: BTreeSet<PeerId> = self
            .participants
            .iter()
            .chain(self.subscribers.iter())
            .copied()
            .filter(|p| *p != self.new_owner)
            .collect();
        for peer in audience {
            self.outbox.push(MigrationEffect::AnnounceOwner {
                peer,
                replica: self.replica,
                new_owner: self.new_owner,
            });
        }
        info!(
            migration = %self.id,
            replica = %self.replica,
            from = %self.source_owner,
            to = %self.new_owner,
            "replica ownership committed"
        );
        self.transition_to(MigrationState::Idle);
    }

    fn accept_ack(&mut self, peer: PeerId, epoch: Epoch) {
        if epoch != self.epoch {
            debug!(
                replica = %self.replica,
                peer = %peer,
                got = %epoch,
                current = %self.epoch,
                "stale acknowledgment discarded"
            );
            return;
        }
        if self.pending.ack(peer) {
            debug!(
                replica = %self.replica,
                peer = %peer,
                state = %self.state,
                remaining = self.pending.len(),
                "peer acknowledged"
            );
        } else {
            trace!(replica = %self.replica, peer = %peer, "duplicate acknowledgment");
        }
    }

    /// A lost peer counts as an implicit acknowledgment and receives no
    /// further requests.
    fn forget_peer(&mut self, peer: PeerId) {
        self.subscribers.remove(&peer);
        self.participants.remove(&peer);
        if self.pending.ack(peer) {
            debug!(replica = %self.replica, peer = %peer, state = %self.state, "pending peer removed");
        }
    }

    fn redirect(&mut self, requested: PeerId) -> Result<ModifyOutcome, MigrationError> {
        if requested == self.new_owner {
            return Ok(ModifyOutcome::Unchanged);
        }
        if !self.state.accepts_redirect() {
            warn!(
                replica = %self.replica,
                requested = %requested,
                state = %self.state,
                "redirect rejected"
            );
            return Err(MigrationError::RedirectRejected {
                replica: self.replica,
                requested,
                state: self.state,
            });
        }

        let previous = self.new_owner;
        self.new_owner = requested;
        if requested == self.source_owner {
            info!(replica = %self.replica, previous = %previous, "redirect to current owner, fixing routing only");
            self.transition_to(MigrationState::ChangeRoutingOnly);
            return Ok(ModifyOutcome::CollapsedToRoutingOnly);
        }

        info!(replica = %self.replica, previous = %previous, to = %requested, state = %self.state, "migration retargeted");
        if self.state == MigrationState::ChangeRoutingForMigration {
            self.transition_to(MigrationState::ChangeRoutingForMigration);
        }
        Ok(ModifyOutcome::Retargeted { previous })
    }

    // ── Transitions ──────────────────────────────────────────────────

    fn transition_to(&mut self, target: MigrationState) {
        let from = self.state;
        let path = hsm::transition_path(from, target);
        for s in &path.exit {
            self.on_exit(*s);
        }
        self.state = target;
        for s in &path.enter {
            self.on_enter(*s);
        }
        if from != MigrationState::Top {
            info!(
                replica = %self.replica,
                from = %from,
                to = %target,
                epoch = %self.epoch,
                "migration phase transition"
            );
        }
    }

    fn on_exit(&mut self, state: MigrationState) {
        trace!(replica = %self.replica, state = %state, "exit");
    }

    fn on_enter(&mut self, state: MigrationState) {
        match state {
            MigrationState::Top | MigrationState::Migrating => {}
            MigrationState::FlushUpstream => {
                self.outbox.push(MigrationEffect::SuspendUpstream {
                    replica: self.replica,
                });
                let peers = self.subscribers.clone();
                self.begin_phase(peers);
            }
            MigrationState::FlushDownstream => {
                let peers = self.subscribers.clone();
                self.begin_phase(peers);
            }
            MigrationState::ChangeRoutingForMigration => {
                let mut peers = self.subscribers.clone();
                peers.insert(self.new_owner);
                self.begin_phase(peers);
            }
            MigrationState::HandoffReplica => {
                self.begin_phase(BTreeSet::from([self.new_owner]));
            }
            MigrationState::Rollback => {
                self.outcome = Some(MigrationOutcome::RolledBack);
                let peers = self.participants.clone();
                self.begin_phase(peers);
                self.outbox.push(MigrationEffect::ResumeUpstream {
                    replica: self.replica,
                });
            }
            MigrationState::ChangeRoutingOnly => {
                self.outcome = Some(MigrationOutcome::RoutingOnly);
                let peers: BTreeSet<PeerId> = self
                    .subscribers
                    .union(&self.participants)
                    .copied()
                    .filter(|p| *p != self.source_owner)
                    .collect();
                self.begin_phase(peers);
                self.outbox.push(MigrationEffect::ResumeUpstream {
                    replica: self.replica,
                });
            }
            MigrationState::Abort => {
                self.outcome = Some(MigrationOutcome::Aborted);
                self.pending.clear();
                self.outbox.clear();
            }
            MigrationState::Idle => {
                self.pending.clear();
                info!(
                    migration = %self.id,
                    replica = %self.replica,
                    outcome = ?self.outcome,
                    "migration finished"
                );
            }
        }
    }

    /// Open a new acknowledgment round and send the current state's request
    /// to every peer in `peers`.
    fn begin_phase(&mut self, peers: BTreeSet<PeerId>) {
        self.epoch = self.epoch.next_round();
        self.ticks_waiting = 0;
        self.retries = 0;
        self.pending.reset(peers.iter().copied());
        for peer in peers {
            if let Some(effect) = self.request_for(peer) {
                self.participants.insert(peer);
                self.outbox.push(effect);
            }
        }
    }

    /// The request the current state sends to `peer`.
    fn request_for(&self, peer: PeerId) -> Option<MigrationEffect> {
        let replica = self.replica;
        let epoch = self.epoch;
        match self.state {
            MigrationState::FlushUpstream => Some(MigrationEffect::RequestUpstreamFlush {
                peer,
                replica,
                epoch,
            }),
            MigrationState::FlushDownstream => Some(MigrationEffect::RequestDownstreamFlush {
                peer,
                replica,
                epoch,
            }),
            MigrationState::ChangeRoutingForMigration => Some(MigrationEffect::SendRoutingChange {
                peer,
                replica,
                new_owner: self.new_owner,
                epoch,
            }),
            MigrationState::HandoffReplica => Some(MigrationEffect::SendHandoffPayload {
                peer,
                replica,
                epoch,
            }),
            MigrationState::Rollback => Some(MigrationEffect::SendRollback {
                peer,
                replica,
                owner: self.source_owner,
                epoch,
            }),
            MigrationState::ChangeRoutingOnly => Some(MigrationEffect::SendRoutingChange {
                peer,
                replica,
                new_owner: self.source_owner,
                epoch,
            }),
            MigrationState::Top
            | MigrationState::Migrating
            | MigrationState::Abort
            | MigrationState::Idle => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: PeerId = PeerId(1);
    const B: PeerId = PeerId(2);
    const C: PeerId = PeerId(3);
    const D: PeerId = PeerId(4);
    const E: PeerId = PeerId(5);
    const F: PeerId = PeerId(6);
    const R: ReplicaId = ReplicaId(100);

    fn config() -> MigrationConfig {
        MigrationConfig {
            retry_interval_ticks: 3,
            max_retries: 2,
        }
    }

    fn sequence() -> MigrationSequence {
        MigrationSequence::new(R, A, E, [B, C, D], Epoch::new(1), config())
    }

    fn ack_all(seq: &mut MigrationSequence) {
        let epoch = seq.epoch();
        for peer in seq.pending().to_vec() {
            assert!(seq.on_peer_ack(peer, epoch).is_empty());
        }
    }

    fn peers_of(effects: &[MigrationEffect]) -> Vec<PeerId> {
        effects.iter().filter_map(MigrationEffect::peer).collect()
    }

    #[test]
    fn fresh_sequence_starts_in_flush_upstream() {
        let seq = sequence();
        assert_eq!(seq.state(), MigrationState::FlushUpstream);
        assert!(!seq.is_done());
        assert_eq!(seq.pending().to_vec(), vec![B, C, D]);
        assert_eq!(seq.epoch(), Epoch { generation: 1, round: 1 });
    }

    #[test]
    fn first_update_emits_flush_requests() {
        let mut seq = sequence();
        let effects = seq.update();
        assert_eq!(effects[0], MigrationEffect::SuspendUpstream { replica: R });
        assert_eq!(peers_of(&effects), vec![B, C, D]);
        assert!(effects[1..]
            .iter()
            .all(|e| matches!(e, MigrationEffect::RequestUpstreamFlush { epoch, .. } if *epoch == seq.epoch())));
    }

    #[test]
    fn end_to_end_happy_path() {
        let mut seq = sequence();
        seq.update();

        ack_all(&mut seq);
        let effects = seq.update();
        assert_eq!(seq.state(), MigrationState::FlushDownstream);
        assert_eq!(seq.pending().to_vec(), vec![B, C, D]);
        assert!(effects
            .iter()
            .all(|e| matches!(e, MigrationEffect::RequestDownstreamFlush { .. })));

        ack_all(&mut seq);
        let effects = seq.update();
        assert_eq!(seq.state(), MigrationState::ChangeRoutingForMigration);
        assert_eq!(seq.pending().to_vec(), vec![B, C, D, E]);
        assert_eq!(peers_of(&effects), vec![B, C, D, E]);
        assert!(effects.iter().all(
            |e| matches!(e, MigrationEffect::SendRoutingChange { new_owner, .. } if *new_owner == E)
        ));

        ack_all(&mut seq);
        let effects = seq.update();
        assert_eq!(seq.state(), MigrationState::HandoffReplica);
        assert_eq!(seq.pending().to_vec(), vec![E]);
        assert_eq!(
            effects,
            vec![MigrationEffect::SendHandoffPayload {
                peer: E,
                replica: R,
                epoch: seq.epoch()
            }]
        );
        assert!(!seq.is_committed());

        ack_all(&mut seq);
        let effects = seq.update();
        assert!(seq.is_done());
        assert!(seq.is_committed());
        assert_eq!(seq.outcome(), Some(MigrationOutcome::Committed));
        assert_eq!(
            effects[0],
            MigrationEffect::CommitOwnership {
                replica: R,
                new_owner: E
            }
        );
        assert_eq!(peers_of(&effects[1..]), vec![B, C, D]);
    }

    #[test]
    fn phase_does_not_advance_until_every_ack() {
        let mut seq = sequence();
        seq.update();
        let epoch = seq.epoch();
        seq.on_peer_ack(B, epoch);
        seq.on_peer_ack(C, epoch);
        seq.update();
        assert_eq!(seq.state(), MigrationState::FlushUpstream);
        seq.on_peer_ack(D, epoch);
        assert_eq!(seq.state(), MigrationState::FlushUpstream);
        seq.update();
        assert_eq!(seq.state(), MigrationState::FlushDownstream);
    }

    #[test]
    fn stale_ack_is_ignored() {
        let mut seq = sequence();
        seq.update();
        let stale = Epoch { generation: 1, round: 0 };
        seq.on_peer_ack(B, stale);
        assert!(seq.pending().contains(B));

        ack_all(&mut seq);
        seq.update();
        assert_eq!(seq.state(), MigrationState::FlushDownstream);

        // An ack for the flush-upstream round arriving late.
        seq.on_peer_ack(B, Epoch { generation: 1, round: 1 });
        assert!(seq.pending().contains(B));
    }

    #[test]
    fn duplicate_ack_has_no_extra_effect() {
        let mut seq = sequence();
        seq.update();
        let epoch = seq.epoch();
        seq.on_peer_ack(B, epoch);
        let after_once = seq.pending().clone();
        seq.on_peer_ack(B, epoch);
        assert_eq!(seq.pending(), &after_once);
    }

    #[test]
    fn replica_removed_aborts_then_idles_without_effects() {
        let mut seq = sequence();
        seq.update();
        ack_all(&mut seq);
        seq.update();
        assert_eq!(seq.state(), MigrationState::FlushDownstream);

        let effects = seq.on_replica_removed();
        assert!(effects.is_empty());
        assert_eq!(seq.state(), MigrationState::Abort);
        assert!(!seq.is_done());

        let effects = seq.update();
        assert!(effects.is_empty());
        assert!(seq.is_done());
        assert_eq!(seq.outcome(), Some(MigrationOutcome::Aborted));
        assert!(seq.update().is_empty());
    }

    #[test]
    fn replica_removed_discards_unsent_entry_effects() {
        let mut seq = sequence();
        // Entry effects of FlushUpstream have not been collected yet.
        let effects = seq.on_replica_removed();
        assert!(effects.is_empty());
        assert!(seq.update().is_empty());
        assert!(seq.is_done());
    }

    #[test]
    fn removal_of_other_replica_is_ignored() {
        let mut seq = sequence();
        seq.update();
        seq.dispatch(MigrationEvent::ReplicaRemoved {
            replica: ReplicaId(999),
        });
        assert_eq!(seq.state(), MigrationState::FlushUpstream);
    }

    #[test]
    fn lost_subscriber_counts_as_implicit_ack() {
        let mut seq = sequence();
        seq.update();
        let epoch = seq.epoch();
        seq.on_peer_ack(B, epoch);
        seq.on_peer_ack(C, epoch);
        seq.on_peer_removed(D);
        assert!(seq.pending().is_satisfied());
        seq.update();
        assert_eq!(seq.state(), MigrationState::FlushDownstream);
        assert_eq!(seq.pending().to_vec(), vec![B, C]);
    }

    #[test]
    fn losing_new_owner_during_routing_rolls_back() {
        let mut seq = sequence();
        seq.update();
        ack_all(&mut seq);
        seq.update();
        ack_all(&mut seq);
        seq.update();
        assert_eq!(seq.state(), MigrationState::ChangeRoutingForMigration);

        let effects = seq.on_peer_removed(E);
        assert_eq!(seq.state(), MigrationState::Rollback);
        assert_eq!(peers_of(&effects), vec![B, C, D]);
        assert!(effects
            .iter()
            .any(|e| *e == MigrationEffect::ResumeUpstream { replica: R }));
        assert!(effects.iter().all(|e| !matches!(e, MigrationEffect::CommitOwnership { .. })));

        ack_all(&mut seq);
        let effects = seq.update();
        assert!(effects.is_empty());
        assert!(seq.is_done());
        assert!(!seq.is_committed());
        assert_eq!(seq.outcome(), Some(MigrationOutcome::RolledBack));
    }

    #[test]
    fn losing_new_owner_during_handoff_rolls_back() {
        let mut seq = sequence();
        seq.update();
        for _ in 0..3 {
            ack_all(&mut seq);
            seq.update();
        }
        assert_eq!(seq.state(), MigrationState::HandoffReplica);
        seq.on_peer_removed(E);
        assert_eq!(seq.state(), MigrationState::Rollback);
        ack_all(&mut seq);
        let effects = seq.update();
        assert!(seq.is_done());
        assert!(effects.iter().all(|e| !matches!(e, MigrationEffect::CommitOwnership { .. })));
    }

    #[test]
    fn redirect_to_current_owner_collapses_to_routing_only() {
        let mut seq = sequence();
        seq.update();
        ack_all(&mut seq);
        seq.update();

        let redirect = seq.modify_new_owner(A).unwrap();
        assert_eq!(redirect.outcome, ModifyOutcome::CollapsedToRoutingOnly);
        assert_eq!(seq.state(), MigrationState::ChangeRoutingOnly);
        assert!(redirect.effects.iter().any(
            |e| matches!(e, MigrationEffect::SendRoutingChange { new_owner, .. } if *new_owner == A)
        ));

        ack_all(&mut seq);
        let effects = seq.update();
        assert!(seq.is_done());
        assert!(!seq.is_committed());
        assert_eq!(seq.outcome(), Some(MigrationOutcome::RoutingOnly));
        assert!(effects.iter().all(|e| !matches!(e, MigrationEffect::CommitOwnership { .. })));
    }

    #[test]
    fn collapse_during_routing_reaches_previous_target() {
        let mut seq = sequence();
        seq.update();
        ack_all(&mut seq);
        seq.update();
        ack_all(&mut seq);
        seq.update();
        assert_eq!(seq.state(), MigrationState::ChangeRoutingForMigration);

        let redirect = seq.modify_new_owner(A).unwrap();
        // E was told to expect ownership; it must be pointed back at A.
        assert_eq!(peers_of(&redirect.effects), vec![B, C, D, E]);
    }

    #[test]
    fn redirect_to_same_target_is_noop() {
        let mut seq = sequence();
        seq.update();
        let epoch = seq.epoch();
        let redirect = seq.modify_new_owner(E).unwrap();
        assert_eq!(redirect.outcome, ModifyOutcome::Unchanged);
        assert!(redirect.effects.is_empty());
        assert_eq!(seq.state(), MigrationState::FlushUpstream);
        assert_eq!(seq.epoch(), epoch);
    }

    #[test]
    fn retarget_during_flush_keeps_progress() {
        let mut seq = sequence();
        seq.update();
        let epoch = seq.epoch();
        seq.on_peer_ack(B, epoch);

        let redirect = seq.modify_new_owner(F).unwrap();
        assert_eq!(redirect.outcome, ModifyOutcome::Retargeted { previous: E });
        assert!(redirect.effects.is_empty());
        assert_eq!(seq.state(), MigrationState::FlushUpstream);
        assert_eq!(seq.epoch(), epoch);
        assert!(!seq.pending().contains(B));
        assert_eq!(seq.new_owner(), F);
    }

    #[test]
    fn retarget_during_routing_reenters_phase() {
        let mut seq = sequence();
        seq.update();
        ack_all(&mut seq);
        seq.update();
        ack_all(&mut seq);
        seq.update();
        let before = seq.epoch();

        let redirect = seq.modify_new_owner(F).unwrap();
        assert_eq!(seq.state(), MigrationState::ChangeRoutingForMigration);
        assert!(seq.epoch() > before);
        assert_eq!(seq.pending().to_vec(), vec![B, C, D, F]);
        assert!(redirect.effects.iter().all(
            |e| matches!(e, MigrationEffect::SendRoutingChange { new_owner, .. } if *new_owner == F)
        ));
    }

    #[test]
    fn redirect_rejected_once_handoff_started() {
        let mut seq = sequence();
        seq.update();
        for _ in 0..3 {
            ack_all(&mut seq);
            seq.update();
        }
        assert_eq!(seq.state(), MigrationState::HandoffReplica);
        let err = seq.modify_new_owner(F).unwrap_err();
        assert!(matches!(
            err,
            MigrationError::RedirectRejected {
                state: MigrationState::HandoffReplica,
                ..
            }
        ));
        assert_eq!(seq.new_owner(), E);
    }

    #[test]
    fn redirect_rejected_when_idle() {
        let mut seq = sequence();
        seq.on_replica_removed();
        seq.update();
        assert!(seq.is_done());
        assert_eq!(
            seq.modify_new_owner(F).unwrap_err(),
            MigrationError::Finished { replica: R }
        );
    }

    #[test]
    fn redirect_rejected_while_aborting() {
        let mut seq = sequence();
        seq.update();
        seq.on_replica_removed();
        let err = seq.modify_new_owner(F).unwrap_err();
        assert!(matches!(err, MigrationError::RedirectRejected { .. }));
        assert!(seq.is_done());
    }

    #[test]
    fn unacked_requests_are_retransmitted_on_cadence() {
        let mut seq = sequence();
        seq.update();
        let epoch = seq.epoch();
        seq.on_peer_ack(B, epoch);

        // The first update already counted one tick.
        assert!(seq.update().is_empty());
        let effects = seq.update();
        assert_eq!(peers_of(&effects), vec![C, D]);
        assert_eq!(seq.retries(), 1);
        assert!(effects.iter().all(
            |e| matches!(e, MigrationEffect::RequestUpstreamFlush { epoch: sent, .. } if *sent == epoch)
        ));
    }

    #[test]
    fn exhausted_retries_drop_non_critical_laggards() {
        let mut seq = sequence();
        seq.update();
        let epoch = seq.epoch();
        seq.on_peer_ack(B, epoch);
        seq.on_peer_ack(C, epoch);

        let mut sends = 0;
        for _ in 1..config().phase_budget_ticks() {
            sends += seq.update().len();
        }
        assert_eq!(sends, config().max_retries as usize);
        assert!(seq.pending().is_satisfied());
        seq.update();
        assert_eq!(seq.state(), MigrationState::FlushDownstream);
    }

    #[test]
    fn unresponsive_new_owner_rolls_back() {
        let mut seq = sequence();
        seq.update();
        for _ in 0..2 {
            ack_all(&mut seq);
            seq.update();
        }
        assert_eq!(seq.state(), MigrationState::ChangeRoutingForMigration);
        let epoch = seq.epoch();
        for p in [B, C, D] {
            seq.on_peer_ack(p, epoch);
        }
        for _ in 0..config().phase_budget_ticks() {
            seq.update();
        }
        assert_eq!(seq.state(), MigrationState::Rollback);
    }

    #[test]
    fn migration_to_self_starts_routing_only() {
        let mut seq = MigrationSequence::new(R, A, A, [B], Epoch::new(1), config());
        assert_eq!(seq.state(), MigrationState::ChangeRoutingOnly);
        seq.update();
        ack_all(&mut seq);
        seq.update();
        assert!(seq.is_done());
        assert!(!seq.is_committed());
    }

    #[test]
    fn no_subscribers_advances_through_flushes() {
        let mut seq = MigrationSequence::new(R, A, E, [], Epoch::new(1), config());
        assert!(seq.pending().is_satisfied());
        seq.update();
        assert_eq!(seq.state(), MigrationState::FlushDownstream);
        seq.update();
        assert_eq!(seq.state(), MigrationState::ChangeRoutingForMigration);
        assert_eq!(seq.pending().to_vec(), vec![E]);
    }

    #[test]
    fn source_owner_is_never_a_subscriber() {
        let seq = MigrationSequence::new(R, A, E, [A, B], Epoch::new(1), config());
        assert_eq!(seq.pending().to_vec(), vec![B]);
    }

    #[test]
    fn hierarchy_parents() {
        assert_eq!(MigrationState::FlushUpstream.parent(), Some(MigrationState::Migrating));
        assert_eq!(MigrationState::Abort.parent(), Some(MigrationState::Migrating));
        assert_eq!(MigrationState::ChangeRoutingOnly.parent(), Some(MigrationState::Top));
        assert_eq!(MigrationState::Idle.parent(), Some(MigrationState::Top));
        assert_eq!(MigrationState::Top.parent(), None);
    }

    #[test]
    fn successor_order() {
        let mut s = MigrationState::FlushUpstream;
        let mut order = vec![s];
        while let Some(next) = s.successor() {
            order.push(next);
            s = next;
        }
        assert_eq!(
            order,
            vec![
                MigrationState::FlushUpstream,
                MigrationState::FlushDownstream,
                MigrationState::ChangeRoutingForMigration,
                MigrationState::HandoffReplica,
                MigrationState::Idle,
            ]
        );
    }

    #[test]
    fn event_names() {
        assert_eq!(MigrationEvent::Update.name(), "ME_UPDATE");
        assert_eq!(
            MigrationEvent::PeerAck {
                peer: A,
                epoch: Epoch::new(1)
            }
            .name(),
            "ME_PEER_ACK"
        );
        assert_eq!(
            MigrationEvent::ModifyNewOwner { new_owner: A }.name(),
            "ME_MODIFY_NEW_OWNER"
        );
    }

    #[test]
    fn status_serializes() {
        let seq = sequence();
        let json = serde_json::to_value(seq.status()).unwrap();
        assert_eq!(json["state"], "FlushUpstream");
        assert_eq!(json["pending"], serde_json::json!([2, 3, 4]));
    }

    #[test]
    fn error_display_names_state() {
        let err = MigrationError::RedirectRejected {
            replica: R,
            requested: F,
            state: MigrationState::HandoffReplica,
        };
        let msg = err.to_string();
        assert!(msg.contains("HANDOFF_REPLICA"));
        assert!(msg.contains("peer:6"));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        /// Drive a fresh sequence `phases` phases forward with full acks.
        fn advanced(phases: usize) -> MigrationSequence {
            let mut seq = sequence();
            seq.update();
            for _ in 0..phases {
                ack_all(&mut seq);
                seq.update();
            }
            seq
        }

        proptest! {
            /// Replica removal in any non-terminal state ends in Idle on the
            /// next event with no further effects.
            #[test]
            fn replica_removal_cancels_from_any_phase(phases in 0usize..4, extra in 0usize..5) {
                let mut seq = advanced(phases);
                prop_assert!(!seq.is_done());
                prop_assert!(seq.on_replica_removed().is_empty());
                for _ in 0..=extra {
                    prop_assert!(seq.update().is_empty());
                }
                prop_assert!(seq.is_done());
                prop_assert!(!seq.is_committed());
            }

            /// Losing the new owner before commit never commits ownership.
            #[test]
            fn new_owner_loss_never_commits(phases in 0usize..4) {
                let mut seq = advanced(phases);
                let mut effects = seq.on_peer_removed(E);
                prop_assert_eq!(seq.state(), MigrationState::Rollback);
                ack_all(&mut seq);
                effects.extend(seq.update());
                prop_assert!(seq.is_done());
                let never_commits = effects.iter().all(|e| !matches!(e, MigrationEffect::CommitOwnership { .. }));
                prop_assert!(never_commits);
            }

            /// Acks carrying any epoch other than the current one never
            /// shrink the pending set.
            #[test]
            fn mismatched_epoch_never_acks(generation in 0u32..4, round in 0u32..8) {
                let mut seq = sequence();
                let epoch = Epoch { generation, round };
                prop_assume!(epoch != seq.epoch());
                let before = seq.pending().clone();
                seq.on_peer_ack(B, epoch);
                prop_assert_eq!(seq.pending(), &before);
            }
        }
    }
}
