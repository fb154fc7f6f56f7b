//! Error types for the wire codec.

use thiserror::Error;

/// Errors that can occur while encoding or decoding protocol messages.
#[derive(Debug, Error)]
pub enum WireError {
    /// MessagePack serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),

    /// Encoded message exceeds the size limit
    #[error("message too large: {size} > {limit}")]
    TooLarge {
        /// Size of the offending message in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        limit: usize,
    },
}
