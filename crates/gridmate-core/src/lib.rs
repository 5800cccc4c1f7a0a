//! # gridmate-core — Foundational Types for GridMate Replication
//!
//! This crate is the leaf of the GridMate workspace. It defines the
//! identifier and time primitives that every other crate shares. It depends
//! on nothing internal.
//!
//! ## Key Design Principles
//!
//! 1. **Newtype wrappers for identifiers.** `PeerId`, `ReplicaId` and
//!    `MigrationId` are distinct types. A replica id cannot be passed where a
//!    peer id is expected.
//!
//! 2. **Epochs, not wall clock, correlate acknowledgments.** Every migration
//!    request carries an [`Epoch`]; an acknowledgment only counts when it
//!    echoes the epoch of the phase currently waiting for it.
//!
//! 3. **UTC-only timestamps** for history records ([`Timestamp`]).
//!
//! ## Crate Policy
//!
//! - No dependencies on other `gridmate-*` crates.
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod error;
pub mod identity;
pub mod temporal;

// Re-export primary types for ergonomic imports.
pub use error::CoreError;
pub use identity::{MigrationId, PeerId, ReplicaId};
pub use temporal::{Epoch, EpochClock, Timestamp};
