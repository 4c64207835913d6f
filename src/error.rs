//! Error types for the dictionary compression substrate.

use thiserror::Error;

/// Errors the core distinguishes, per the error-handling design.
///
/// Hot paths never terminate the process on these; they return a typed
/// error to the caller and bump the matching counter in [`crate::stats`].
#[derive(Error, Debug)]
pub enum Error {
    /// Bad arguments, or an unknown namespace passed to a snapshot lookup.
    #[error("invalid argument: {0}")]
    Invalid(String),

    /// A namespace has no stats, or an id is not present in the current
    /// routing table.
    #[error("not found: {0}")]
    NotFound(String),

    /// A chunked item was presented to `maybe_decompress`.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Manifest or dictionary blob I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapped codec error, with the codec's own textual description
    /// preserved.
    #[error("codec error ({algorithm}): {message}")]
    Codec {
        algorithm: &'static str,
        message: String,
    },

    /// Allocation failure.
    #[error("out of memory")]
    OutOfMemory,

    /// A compressed frame's header could not be read.
    #[error("corrupt frame: {0}")]
    Corrupt(String),

    /// Decompressed size would exceed the caller's buffer.
    #[error("decompressed size overflow: {0}")]
    Overflow(String),
}

impl Error {
    pub fn codec(algorithm: &'static str, message: impl Into<String>) -> Self {
        Error::Codec {
            algorithm,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
