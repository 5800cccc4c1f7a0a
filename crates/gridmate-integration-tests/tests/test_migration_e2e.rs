//! # End-to-End Ownership Migration
//!
//! Drives complete migrations across a simulated network of replica
//! managers and checks the resulting ownership, routing and history on
//! every peer.

use gridmate_core::{PeerId, ReplicaId};
use gridmate_replica::{MigrateOutcome, SimNetwork};
use gridmate_state::{MigrationConfig, MigrationOutcome, MigrationState};
use serde_json::json;

const A: PeerId = PeerId(1);
const B: PeerId = PeerId(2);
const C: PeerId = PeerId(3);
const D: PeerId = PeerId(4);
const E: PeerId = PeerId(5);
const R: ReplicaId = ReplicaId(100);

fn network() -> SimNetwork {
    let mut net = SimNetwork::new(MigrationConfig {
        retry_interval_ticks: 3,
        max_retries: 2,
    });
    for p in [A, B, C, D, E] {
        net.add_peer(p);
    }
    net.create_replica(A, R, json!({"hp": 10, "name": "crate"}), true, &[B, C, D])
        .unwrap();
    net
}

// ---------------------------------------------------------------------------
// 1. Phase order observed from the owner
// ---------------------------------------------------------------------------

#[test]
fn phases_advance_in_order() {
    let mut net = network();
    net.migrate(R, E).unwrap();

    let mut seen = Vec::new();
    for _ in 0..20 {
        if let Some(seq) = net.manager(A).unwrap().sequence(R) {
            if seen.last() != Some(&seq.state()) {
                seen.push(seq.state());
            }
        }
        net.tick();
        if net.is_idle() {
            break;
        }
    }
    assert_eq!(
        seen,
        vec![
            MigrationState::FlushUpstream,
            MigrationState::FlushDownstream,
            MigrationState::ChangeRoutingForMigration,
            MigrationState::HandoffReplica,
        ]
    );
    assert!(net.is_idle());
}

// ---------------------------------------------------------------------------
// 2. Ownership, state and routing after commit
// ---------------------------------------------------------------------------

#[test]
fn commit_moves_state_and_routes() {
    let mut net = network();
    net.migrate(R, E).unwrap();
    net.run_until_idle(100);

    assert_eq!(net.owner_of(R), Some(E));
    let primary = net.manager(E).unwrap().replica(R).unwrap();
    assert_eq!(primary.state, json!({"hp": 10, "name": "crate"}));
    assert_eq!(primary.owner_seq, 1);
    assert!(primary.subscribers.contains(&A));

    for p in [A, B, C, D, E] {
        assert_eq!(net.route(p, R), Some(E), "{p} routes elsewhere");
    }
    for p in [B, C, D] {
        let proxy = net.manager(p).unwrap().replica(R).unwrap();
        assert_eq!(proxy.owner, E);
        assert_eq!(proxy.owner_seq, 1);
        assert!(!proxy.upstream_suspended);
    }

    let history = net.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outcome, MigrationOutcome::Committed);
    assert!(history[0].moved_ownership());
}

// ---------------------------------------------------------------------------
// 3. Chained migrations bump the owner sequence once each
// ---------------------------------------------------------------------------

#[test]
fn chained_migrations_increment_owner_seq() {
    let mut net = network();
    net.migrate(R, E).unwrap();
    net.run_until_idle(100);
    net.migrate(R, B).unwrap();
    net.run_until_idle(100);

    assert_eq!(net.owner_of(R), Some(B));
    assert_eq!(net.manager(B).unwrap().replica(R).unwrap().owner_seq, 2);
    for p in [A, C, D] {
        let proxy = net.manager(p).unwrap().replica(R).unwrap();
        assert_eq!((proxy.owner, proxy.owner_seq), (B, 2), "at {p}");
    }
    assert_eq!(net.history().len(), 2);
}

// ---------------------------------------------------------------------------
// 4. Independent replicas migrate concurrently
// ---------------------------------------------------------------------------

#[test]
fn concurrent_migrations_of_different_replicas() {
    let mut net = network();
    let other = ReplicaId(200);
    net.create_replica(C, other, json!([1, 2, 3]), true, &[A, D]).unwrap();

    net.migrate(R, E).unwrap();
    net.migrate(other, B).unwrap();
    net.run_until_idle(100);

    assert_eq!(net.owner_of(R), Some(E));
    assert_eq!(net.owner_of(other), Some(B));
    assert_eq!(net.ownership().len(), 2);
}

// ---------------------------------------------------------------------------
// 5. Message loss is healed by retransmission
// ---------------------------------------------------------------------------

#[test]
fn lost_requests_and_acks_are_retransmitted() {
    let mut net = network();
    net.drop_next(B, 2);
    net.drop_next(A, 1);
    net.migrate(R, E).unwrap();
    net.run_until_idle(100);

    assert_eq!(net.owner_of(R), Some(E));
    assert_eq!(net.stats().dropped, 3);
}

#[test]
fn unreachable_subscriber_is_dropped_after_retries() {
    let mut net = network();
    net.drop_next(D, 1_000);
    net.migrate(R, E).unwrap();
    let ticks = net.run_until_idle(200);

    assert!(ticks < 200);
    assert_eq!(net.owner_of(R), Some(E));
}

// ---------------------------------------------------------------------------
// 6. Rejected requests
// ---------------------------------------------------------------------------

#[test]
fn migrate_to_current_owner_is_noop() {
    let mut net = network();
    assert_eq!(net.migrate(R, A).unwrap(), MigrateOutcome::AlreadyOwner);
    assert!(net.is_idle());
}

#[test]
fn non_migratable_replica_stays() {
    let mut net = network();
    let pinned = ReplicaId(300);
    net.create_replica(A, pinned, json!(null), false, &[B]).unwrap();
    assert!(net.migrate(pinned, E).is_err());
    assert_eq!(net.owner_of(pinned), Some(A));
}
