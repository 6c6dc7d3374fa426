//! Service error types.

use thiserror::Error;

use declutter_types::bus::BusError;
use declutter_types::error::DeclutterError;

/// Errors produced by services in this crate.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// A message could not be delivered on the worker bus.
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    /// Error from the pipeline core.
    #[error(transparent)]
    Core(#[from] DeclutterError),

    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An internal channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,
}

/// Convenience alias for results in this crate.
pub type Result<T> = std::result::Result<T, ServiceError>;
