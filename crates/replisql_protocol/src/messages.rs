//! Protocol messages exchanged between a replica and its primary.
//!
//! Every message is a plain serde struct carried as a CBOR body.

use crate::change::{check_order, ChangeEntry};
use crate::error::{ProtocolError, ProtocolResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Protocol version spoken by this crate.
pub const PROTOCOL_VERSION: u16 = 1;

fn encode_cbor<T: Serialize>(message: &T) -> ProtocolResult<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::into_writer(message, &mut out).map_err(|e| ProtocolError::encoding(e.to_string()))?;
    Ok(out)
}

fn decode_cbor<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    ciborium::from_reader(bytes).map_err(|e| ProtocolError::decoding(e.to_string()))
}

/// Handshake request from a replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    /// Replica identity, stable across restarts.
    pub client_id: [u8; 16],
    /// Protocol version spoken by the replica.
    pub protocol_version: u16,
    /// Replica's local watermark.
    pub watermark: u64,
}

impl HandshakeRequest {
    /// Creates a handshake request for the current protocol version.
    pub fn new(client_id: [u8; 16], watermark: u64) -> Self {
        Self {
            client_id,
            protocol_version: PROTOCOL_VERSION,
            watermark,
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode_cbor(bytes)
    }
}

/// Handshake response from the primary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    /// Whether the handshake was accepted.
    pub success: bool,
    /// Rejection reason.
    pub error: Option<String>,
    /// Protocol version spoken by the primary.
    pub protocol_version: u16,
    /// Head position of the primary's log.
    pub head: u64,
}

impl HandshakeResponse {
    /// Creates an accepting response.
    pub fn success(head: u64) -> Self {
        Self {
            success: true,
            error: None,
            protocol_version: PROTOCOL_VERSION,
            head,
        }
    }

    /// Creates a rejecting response.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            protocol_version: PROTOCOL_VERSION,
            head: 0,
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode_cbor(bytes)
    }
}

/// Pull request from a replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Return entries strictly after this position.
    pub since: u64,
    /// Maximum number of entries to return.
    pub limit: u32,
}

impl PullRequest {
    /// Creates a new pull request.
    pub fn new(since: u64, limit: u32) -> Self {
        Self { since, limit }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode_cbor(bytes)
    }
}

/// Pull response from the primary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullResponse {
    /// Entries after the requested position, in log order.
    pub entries: Vec<ChangeEntry>,
    /// Watermark the replica reaches once these entries are applied.
    pub new_watermark: u64,
    /// Whether more entries are available.
    pub has_more: bool,
}

impl PullResponse {
    /// Creates a new pull response.
    pub fn new(entries: Vec<ChangeEntry>, new_watermark: u64, has_more: bool) -> Self {
        Self {
            entries,
            new_watermark,
            has_more,
        }
    }

    /// Checks that the entries follow `since` in order and that the
    /// watermark covers them.
    pub fn check_order(&self, since: u64) -> ProtocolResult<()> {
        check_order(&self.entries, since, self.new_watermark)
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode_cbor(bytes)
    }
}
