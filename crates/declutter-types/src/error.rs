//! Error types for the declutter pipeline.
//!
//! [`DeclutterError`] is the top-level error type. Stage failures are not
//! errors in this sense: they travel between workers as data (see
//! [`StageFailure`](crate::message::StageFailure)).

use thiserror::Error;

/// Top-level error type for the declutter pipeline.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DeclutterError {
    // ── Boundary ─────────────────────────────────────────────────────

    /// A pipeline request is missing a required field or is malformed.
    #[error("invalid request: {reason}")]
    InvalidRequest {
        /// What is wrong with the request.
        reason: String,
    },

    /// A caller-supplied session id failed validation.
    #[error("invalid session id: {reason}")]
    InvalidSessionId {
        /// Why the id was rejected.
        reason: String,
    },

    /// No session with the given id is tracked.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    // ── Fatal ────────────────────────────────────────────────────────

    /// Configuration is malformed or semantically invalid.
    #[error("invalid config: {reason}")]
    ConfigInvalid {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// A message could not be delivered on the worker bus.
    #[error("bus error: {0}")]
    Bus(String),

    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, DeclutterError>;
