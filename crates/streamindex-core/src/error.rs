//! Error types for the streamindex runner.

use thiserror::Error;

/// Errors that can occur while running an indexer.
///
/// Only `Configuration` is handled before any connection is attempted.
/// Every other variant raised inside the message loop is funneled into the
/// indexer's reconnection policy; if the policy declines, the error surfaces
/// unchanged from `run()`.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("stream transport error: {0}")]
    StreamTransport(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("handler error in '{handler}': {reason}")]
    Handler { handler: String, reason: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl RunnerError {
    /// Returns `true` if the error was raised during validation, before any
    /// network or storage activity.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
