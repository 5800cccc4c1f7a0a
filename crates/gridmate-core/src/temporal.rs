//! # Temporal Types — Migration Epochs and UTC Timestamps
//!
//! An [`Epoch`] is the token that correlates a migration request with its
//! acknowledgment. It has two parts:
//!
//! - `generation`: handed out once per migration attempt by the manager's
//!   [`EpochClock`], strictly increasing for the life of the manager;
//! - `round`: bumped by the migration sequence every time it (re)enters a
//!   phase that waits for acknowledgments.
//!
//! An acknowledgment is accepted only if it echoes the exact epoch of the
//! phase currently waiting. Late acknowledgments from an earlier phase or an
//! earlier attempt on the same replica therefore never satisfy the current
//! phase.
//!
//! [`Timestamp`] is a UTC-only, seconds-precision wall clock used for
//! migration history records.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Correlation token for one phase of one migration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Epoch {
    /// Per-attempt component, assigned by [`EpochClock::next_generation`].
    pub generation: u32,
    /// Per-phase component within the attempt.
    pub round: u32,
}

impl Epoch {
    /// The first epoch of a new generation.
    pub fn new(generation: u32) -> Self {
        Self {
            generation,
            round: 0,
        }
    }

    /// The epoch of the next round within the same generation.
    pub fn next_round(self) -> Self {
        Self {
            generation: self.generation,
            round: self.round.wrapping_add(1),
        }
    }
}

impl std::fmt::Display for Epoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "epoch:{}.{}", self.generation, self.round)
    }
}

/// Monotonic source of epoch generations.
///
/// Each replica manager owns one clock. Generations start at 1 so that a
/// zeroed epoch never matches a live migration.
#[derive(Debug, Clone, Default)]
pub struct EpochClock {
    last: u32,
}

impl EpochClock {
    /// Create a clock whose first generation will be 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clock that continues after `last`.
    pub fn starting_after(last: u32) -> Self {
        Self { last }
    }

    /// Allocate the next generation and return its first epoch.
    pub fn next_generation(&mut self) -> Epoch {
        self.last = self.last.wrapping_add(1).max(1);
        Epoch::new(self.last)
    }

    /// The most recently allocated generation (0 if none yet).
    pub fn last_generation(&self) -> u32 {
        self.last
    }
}

/// A UTC-only timestamp, truncated to seconds precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// The current UTC time, truncated to seconds.
    pub fn now() -> Self {
        Self(truncate_to_seconds(Utc::now()))
    }

    /// From a `DateTime<Utc>`, truncating sub-seconds.
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(truncate_to_seconds(dt))
    }

    /// From Unix epoch seconds.
    pub fn from_epoch_secs(secs: i64) -> Result<Self, CoreError> {
        DateTime::from_timestamp(secs, 0)
            .map(Self)
            .ok_or_else(|| CoreError::InvalidTimestamp(format!("unix seconds out of range: {secs}")))
    }

    /// Access the inner `DateTime<Utc>`.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Render as ISO8601 with Z suffix (e.g., `2026-01-15T12:00:00Z`).
    pub fn to_iso8601(&self) -> String {
        self.0.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_iso8601())
    }
}

fn truncate_to_seconds(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.with_nanosecond(0).unwrap_or(dt)
}
