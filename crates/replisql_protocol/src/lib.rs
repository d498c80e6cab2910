//! # replisql Protocol
//!
//! Replication wire types and CBOR codecs for replisql.
//!
//! This crate provides:
//! - [`Value`], the dynamically typed SQL value shared by the driver and the wire
//! - [`ChangeEntry`], one positioned record of the primary's change log
//! - Protocol messages (Handshake, Pull)
//! - CBOR encoding/decoding
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change;
mod error;
mod messages;
mod value;

pub use change::{check_order, ChangeEntry};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    HandshakeRequest, HandshakeResponse, PullRequest, PullResponse, PROTOCOL_VERSION,
};
pub use value::Value;
