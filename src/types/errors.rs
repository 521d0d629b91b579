//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and
//! follow the core's failure taxonomy: capacity exhaustion, contract
//! violations, process-reported errors, resource refusal, and external
//! failures observed asynchronously.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the mudcore executor and agent subsystems.
#[derive(Error, Debug)]
pub enum Error {
    /// Identifier or queue exhaustion. Fatal-logged at the call site; the
    /// operation reports an invalid identifier to the caller.
    #[error("capacity exhausted: {0}")]
    Capacity(String),

    /// Contract violation by the caller (foreign RID, invalid argument).
    #[error("contract violation: {0}")]
    Contract(String),

    /// Referenced process, resource, or entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A resource declined to be attached to a process.
    #[error("resource refused: {0}")]
    Refused(String),

    /// Operation attempted on a closed or destructed channel.
    #[error("channel closed: {0}")]
    Closed(String),

    /// Security policy denied the operation.
    #[error("access denied: {0}")]
    Denied(String),

    /// The scheduler is shutting down and accepts no new work.
    #[error("shutting down: {0}")]
    Shutdown(String),

    /// Internal errors (corrupt invariants, collaborator failures).
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Convenience constructors
impl Error {
    pub fn capacity(msg: impl Into<String>) -> Self {
        Self::Capacity(msg.into())
    }

    pub fn contract(msg: impl Into<String>) -> Self {
        Self::Contract(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn refused(msg: impl Into<String>) -> Self {
        Self::Refused(msg.into())
    }

    pub fn closed(msg: impl Into<String>) -> Self {
        Self::Closed(msg.into())
    }

    pub fn denied(msg: impl Into<String>) -> Self {
        Self::Denied(msg.into())
    }

    pub fn shutdown(msg: impl Into<String>) -> Self {
        Self::Shutdown(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
