//! Session setup errors.

use thiserror::Error;

/// Failures surfaced to the caller of session creation. Per-attempt
/// dispatch failures are never errors; they become history events.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session {0} is already active")]
    Conflict(String),

    #[error("session id must not be empty")]
    EmptyId,

    #[error("interval must be a positive duration")]
    InvalidInterval,

    #[error("expiry must be a positive duration")]
    InvalidExpiry,
}
