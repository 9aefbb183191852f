//! Error types for montage.

use crate::format::PixelFormat;
use thiserror::Error;

/// Result type alias using montage's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for aggregation operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A queued buffer carries no timestamp and cannot be placed on the
    /// output timeline. Fatal for the input that produced it.
    #[error("buffer has no timestamp, cannot be placed on the output timeline")]
    MissingTimestamp,

    /// No output format is acceptable to every attached port and to
    /// downstream. Aggregation is suspended until formats change.
    #[error("not negotiated: {0}")]
    NotNegotiated(String),

    /// No conversion path exists between a port's native format and the
    /// negotiated output format. Treated like a negotiation failure.
    #[error("no conversion path from {from} to {to}")]
    NoConversionPath {
        /// Source pixel format.
        from: PixelFormat,
        /// Requested destination pixel format.
        to: PixelFormat,
    },

    /// Output buffer or pool allocation failed. Aborts the current frame
    /// only; the cycle may retry on the next tick.
    #[error("allocation failed: {0}")]
    AllocationFailed(String),

    /// A buffer does not match the format it was declared with.
    #[error("invalid buffer: {0}")]
    InvalidBuffer(String),

    /// The output segment is not usable (e.g. reverse rate without a stop).
    #[error("invalid segment: {0}")]
    InvalidSegment(String),

    /// Per-port usage error (push after end-of-stream, unknown port, ...).
    #[error("port error: {0}")]
    Port(String),
}
