//! Error type shared by every table operation.
//!
//! Iterators re-report their first failure through `status()` on every
//! call, so the type is `Clone`; the underlying `io::Error` (which is not)
//! is captured as its kind plus rendered message.

use thiserror::Error;

/// Result alias for table operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by the table read path.
///
/// A missing key is not an error: point lookups signal absence by never
/// invoking the caller's callback.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// An underlying file operation failed.
    #[error("io error: {0}")]
    Io(String),

    /// On-disk bytes failed structural validation.
    #[error("corruption: {0}")]
    Corruption(String),

    /// The caller handed us something unusable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_))
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(format!("{}: {}", err.kind(), err))
    }
}
