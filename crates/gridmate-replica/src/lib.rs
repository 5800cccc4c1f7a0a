//! # gridmate-replica — Replica Management
//!
//! Hosts migration sequences from `gridmate-state` on behalf of one peer
//! and connects them to the network:
//!
//! - **Replica** (`replica.rs`): primary and proxy records, and the
//!   per-peer replica table.
//!
//! - **Messages** (`message.rs`): the migration wire protocol. Every
//!   request carries an epoch that its acknowledgment echoes.
//!
//! - **Transport** (`transport.rs`): the outbound seam, with recording and
//!   queueing in-memory implementations.
//!
//! - **Manager** (`manager.rs`): starts, redirects and pumps migrations,
//!   executes their effects, answers requests from other owners, and keeps
//!   the migration history (`history.rs`).
//!
//! - **Simulation** (`sim.rs`): a tick-driven network of managers with
//!   disconnects and injected message loss.
//!
//! ## Crate Policy
//!
//! - Depends on `gridmate-core` and `gridmate-state` internally.
//! - Single-threaded: every call happens on the owning update thread.
//! - Transport failures are logged, never propagated out of `update()`.

pub mod error;
pub mod history;
pub mod manager;
pub mod message;
pub mod replica;
pub mod sim;
pub mod transport;

pub use error::ReplicaError;
pub use history::MigrationRecord;
pub use manager::{MigrateOutcome, ReplicaManager};
pub use message::MigrationMessage;
pub use replica::{Replica, ReplicaTable};
pub use sim::{NetworkStats, SimNetwork};
pub use transport::{Envelope, QueueTransport, RecordingTransport, Transport, TransportError};
