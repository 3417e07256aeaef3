//! Library Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Lower-level errors (storage, cache,
//! transform) are kept as children of these kinds; only the kind itself is
//! ever shown to a client, through [`public_message()`](ErrorKind::public_message).

use derive_more::{Display, Error};

/// A library error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The album or its source photo doesn't exist.
    #[display("not found")]
    NotFound,
    /// Nothing under the album qualifies as a thumbnail source.
    #[display("no thumbnail found for this album")]
    NoThumbnail,
    /// The engine failed, timed out or produced nothing.
    #[display("error converting image")]
    Transform,
    /// The request path could not be normalized into an album path.
    #[display("invalid path")]
    InvalidPath,
    /// Width, height or quality overrides out of range.
    #[display("invalid thumbnail parameters")]
    InvalidQuery,
    /// Writing to the response failed; the client is most likely gone.
    #[display("could not write response")]
    Response,
    #[display("storage error")]
    Storage,
    #[display("cache error")]
    Cache,
    #[display("configuration error")]
    Config,
}

impl ErrorKind {
    /// HTTP-style status for a response to this failure.
    pub fn status(&self) -> u16 {
        match self {
            Self::NotFound | Self::NoThumbnail => 404,
            Self::InvalidPath | Self::InvalidQuery => 400,
            // Nginx's "client closed request"; nobody is there to read it.
            Self::Response => 499,
            Self::Transform | Self::Storage | Self::Cache | Self::Config => 500,
        }
    }

    /// Message safe to show to a client: never a path, never an error chain.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::NotFound => "Not found",
            Self::NoThumbnail => "No thumbnail found for this album",
            Self::Transform => "Error converting image",
            Self::InvalidPath => "Invalid path",
            Self::InvalidQuery => "Invalid thumbnail parameters",
            Self::Response | Self::Storage | Self::Cache | Self::Config => "Internal error",
        }
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transform | Self::Response | Self::Storage | Self::Cache)
    }
}
