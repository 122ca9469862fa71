//! Custom error types for remate operations.

use bstr::BString;
use thiserror::Error;

/// Result type alias for remate operations
pub type Result<T> = std::result::Result<T, RemateError>;

/// Error type for remate operations
#[derive(Error, Debug)]
pub enum RemateError {
    /// Two distinct read identifiers hashed to the same match key.
    ///
    /// Only raised in validation mode. Silently pairing mismatched mates
    /// would corrupt downstream results, so this is fatal.
    #[error(
        "match key collision: {key:#018x} maps both '{existing}' and '{incoming}'; \
         mates cannot be paired reliably"
    )]
    KeyCollision {
        /// The colliding 64-bit match key
        key: u64,
        /// Identifier already registered under the key
        existing: BString,
        /// Identifier that produced the same key
        incoming: BString,
    },

    /// A SAM record line that cannot be parsed
    #[error("malformed SAM record at line {line}: {reason}")]
    MalformedRecord {
        /// 1-based line number in the input stream
        line: u64,
        /// Explanation of the problem
        reason: String,
    },

    /// The supplier cannot reposition its input
    #[error("reinit is not supported on this supplier; construct it with a partition instead")]
    ReinitUnsupported,

    /// I/O error from the underlying stream
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
