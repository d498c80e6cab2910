//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors produced while encoding, decoding or validating protocol messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Failed to encode a message to CBOR.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode CBOR bytes.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// Change entries were not strictly increasing.
    #[error("change log out of order: position {position} follows {previous}")]
    OutOfOrder {
        /// Position of the offending entry.
        position: u64,
        /// Position (or watermark) it had to exceed.
        previous: u64,
    },

    /// The advertised watermark is behind the entries it covers.
    #[error("watermark {watermark} is behind position {position}")]
    WatermarkBehind {
        /// Advertised watermark.
        watermark: u64,
        /// Highest entry position in the batch.
        position: u64,
    },
}

impl ProtocolError {
    /// Creates an encoding error.
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Creates a decoding error.
    pub fn decoding(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }
}
