//! Error types for building and reading constant databases.

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building, reading, or converting a constant database.
///
/// A lookup that finds nothing is not an error; it is reported as `Ok(None)`.
#[derive(Debug, Error)]
pub enum Error {
    /// Text record input does not follow the `+klen,vlen:key->value` grammar.
    #[error("bad format: {0}")]
    Format(String),

    /// A length or offset does not fit the 32-bit fields of the image.
    #[error("{what} {value} exceeds the 32-bit limit")]
    OutOfRange {
        /// Which quantity overflowed.
        what: &'static str,
        /// The offending value.
        value: u64,
    },

    /// The image contains offsets or lengths that point outside valid regions.
    #[error("corrupt database: {0}")]
    Corrupt(String),

    /// Failure reported by the underlying source or sink.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn format(reason: impl Into<String>) -> Self {
        Self::Format(reason.into())
    }

    pub(crate) fn corrupt(reason: impl Into<String>) -> Self {
        Self::Corrupt(reason.into())
    }

    /// Returns `true` if this error was caused by malformed text input.
    pub fn is_format(&self) -> bool {
        matches!(self, Self::Format(_))
    }

    /// Returns `true` if the source ended before the requested bytes.
    pub fn is_unexpected_eof(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => e,
            other => std::io::Error::other(other),
        }
    }
}

/// Narrows a length to the `u32` field used by the image layout.
pub(crate) fn to_u32(what: &'static str, value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::OutOfRange { what, value })
}
