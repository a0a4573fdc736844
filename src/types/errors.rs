//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context.

use thiserror::Error;

use crate::codec::DecodeError;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the wheelhouse runtime.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid argument supplied by a caller.
    #[error("validation error: {0}")]
    Validation(String),

    /// No module, pool, handler or timer under the requested key.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation not allowed in the current lifecycle state.
    #[error("state transition error: {0}")]
    StateTransition(String),

    /// Missing or invalid configuration at construction time.
    #[error("configuration error: {0}")]
    Config(String),

    /// The target module no longer accepts events.
    #[error("mailbox closed: {0}")]
    MailboxClosed(String),

    /// The pending call was abandoned before it produced a result.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// Bounded wait elapsed.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Internal errors, including recovered handler panics.
    #[error("internal error: {0}")]
    Internal(String),

    /// Malformed wire bytes.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Serialization/deserialization errors (configuration, stats).
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// Convenience constructors
impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn state_transition(msg: impl Into<String>) -> Self {
        Self::StateTransition(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn mailbox_closed(msg: impl Into<String>) -> Self {
        Self::MailboxClosed(msg.into())
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
