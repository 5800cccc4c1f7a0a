//! # Error Types
//!
//! Errors raised by the foundational types. Higher crates wrap these in
//! their own `thiserror` enums with `#[from]`.

use thiserror::Error;

/// Errors from parsing or constructing core primitives.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// An identifier string could not be parsed.
    #[error("invalid {kind} identifier {input:?}: {reason}")]
    InvalidIdentifier {
        /// Which identifier namespace was being parsed (`peer`, `replica`).
        kind: &'static str,
        /// The rejected input.
        input: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A timestamp could not be constructed.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}
