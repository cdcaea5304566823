//! Error types for the neuroplace client runtime.

use crate::channel::ChannelError;
use crate::raster::RasterError;
use crate::sync::fallback::FallbackError;

/// Top-level error type for the canvas client.
#[derive(Debug, thiserror::Error)]
pub enum PlaceError {
    /// Configuration could not be read, parsed or validated.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Live channel failure.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Raster store rejected an operation.
    #[error("raster error: {0}")]
    Raster(#[from] RasterError),

    /// HTTP fallback request failed.
    #[error("fallback error: {0}")]
    Fallback(#[from] FallbackError),

    /// Persisted session could not be read or written.
    #[error("session error: {0}")]
    Session(String),

    /// A placement was attempted without an auth token.
    #[error("not logged in")]
    AuthRequired,

    /// A placement targeted a cell outside the grid.
    #[error("invalid cell ({x}, {y})")]
    InvalidCell {
        /// Requested column.
        x: i64,
        /// Requested row.
        y: i64,
    },

    /// The runtime driver is no longer running.
    #[error("runtime stopped")]
    Stopped,
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, PlaceError>;
