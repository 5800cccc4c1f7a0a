//! # gridmate-state — Replica Ownership Migration State Machine
//!
//! Implements the sequence that moves ownership of one replica from its
//! current owner peer to a new owner peer while other peers keep
//! subscribing to it.
//!
//! ## Modules
//!
//! - **HSM engine** (`hsm.rs`): parent-chain event bubbling and least
//!   common ancestor exit/entry paths for any state type that implements
//!   [`Hierarchy`].
//!
//! - **Acknowledgment tracking** (`acks.rs`): the per-phase set of peers
//!   that still owe an acknowledgment.
//!
//! - **Configuration** (`config.rs`): retry cadence and retry limit for
//!   waiting phases.
//!
//! - **Migration** (`migration.rs`): the migration sequence itself. Flush
//!   upstream, flush downstream, reroute, hand off, with rollback, abort and
//!   routing-only branches.
//!
//! ## Design
//!
//! The sequence is a plain value that emits [`MigrationEffect`]s instead of
//! performing I/O. The replica manager in `gridmate-replica` owns sequences,
//! feeds them events, and executes their effects against its transport.
//!
//! ## Crate Policy
//!
//! - Depends only on `gridmate-core` internally.
//! - No `unsafe` code.
//! - No `.unwrap()` outside tests.

pub mod acks;
pub mod config;
pub mod hsm;
pub mod migration;

// ─── HSM re-exports ─────────────────────────────────────────────────

pub use hsm::{Handled, Hierarchy, TransitionPath};

// ─── Migration re-exports ───────────────────────────────────────────

pub use acks::PeerAckTracker;
pub use config::{ConfigError, MigrationConfig};
pub use migration::{
    MigrationEffect, MigrationError, MigrationEvent, MigrationOutcome, MigrationSequence,
    MigrationState, MigrationStatus, ModifyOutcome, Redirect, TRANSITIONS,
};
