//! # Migration Configuration
//!
//! Retry policy for phases that wait on peer acknowledgments. A waiting
//! phase counts `ME_UPDATE` ticks; every `retry_interval_ticks` it resends
//! its request to the peers that have not answered yet, at most
//! `max_retries` times per phase.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Retry and timeout policy for a migration sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Updates to wait between retransmissions of an unacknowledged request.
    #[serde(default = "default_retry_interval_ticks")]
    pub retry_interval_ticks: u32,
    /// Retransmissions allowed per phase before giving up on laggards.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_retry_interval_ticks() -> u32 {
    30
}

fn default_max_retries() -> u32 {
    5
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            retry_interval_ticks: default_retry_interval_ticks(),
            max_retries: default_max_retries(),
        }
    }
}

impl MigrationConfig {
    /// Reject configurations the sequence cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry_interval_ticks == 0 {
            return Err(ConfigError::ZeroRetryInterval);
        }
        Ok(())
    }

    /// Updates a phase may wait before its laggards are given up on.
    pub fn phase_budget_ticks(&self) -> u64 {
        u64::from(self.retry_interval_ticks) * (u64::from(self.max_retries) + 1)
    }
}

/// Invalid migration configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A zero retry interval would retransmit on every tick.
    #[error("retry_interval_ticks must be at least 1")]
    ZeroRetryInterval,
}
