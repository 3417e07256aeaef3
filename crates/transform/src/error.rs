//! Transform Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A transform error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for transform operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("imagemagick/graphicsmagick not detected on your system")]
    EngineNotFound,
    /// The engine process could not be started.
    #[display("failed to start transform engine")]
    Spawn,
    /// Reading the source or the engine's output failed.
    #[display("transform I/O error")]
    Io,
    /// The engine process exited with a non-zero exit code.
    #[display("transform engine exited with code: {_0}")]
    Failed(#[error(not(source))] i32),
    /// The engine process was terminated by a signal.
    #[display("transform engine was killed")]
    Killed,
    /// The engine ran past its deadline and was stopped.
    #[display("transform timed out")]
    Timeout,
    /// The source is not a decodable image.
    #[display("source image could not be decoded")]
    Decode,
    #[display("derived image could not be encoded")]
    Encode,
    /// The engine finished without producing a single byte.
    #[display("transform produced no output")]
    EmptyOutput,
    #[display("invalid transform request: {_0}")]
    InvalidRequest(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io | Self::Timeout | Self::Killed)
    }
}
