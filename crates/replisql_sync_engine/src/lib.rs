//! # replisql Sync Engine
//!
//! Embedded-replica synchronization for replisql.
//!
//! This crate provides:
//! - Replica sync state machine (idle → connecting → pulling → applying → synced)
//! - The [`SyncApplier`] seam through which changes reach the local database
//! - The [`SyncTransport`] seam and an HTTP transport (CBOR over `reqwest`)
//! - [`RemoteClient::fetch_changes`], paging and validating the primary's log
//! - The persisted replica info record (`<database>-info`)
//!
//! ## Key Invariants
//!
//! - Sync is pull-only; local writes are never sent to the primary
//! - The local watermark never decreases
//! - A failed sync applies nothing and leaves the watermark untouched
//! - Applying is idempotent: entries at or below the watermark are skipped
//! - No automatic retries or background sync

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod config;
mod error;
mod http;
mod state;
mod transport;
mod watermark;

pub use client::RemoteClient;
pub use config::{is_remote_url, normalize_url, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use http::{
    http_transport, HttpClient, HttpResponse, HttpTransport, LoopbackClient, LoopbackServer,
    ReqwestClient, HANDSHAKE_PATH, PULL_PATH,
};
pub use state::{
    MemoryApplier, ReplicaSyncEngine, SyncApplier, SyncOutcome, SyncState, SyncStats,
};
pub use transport::{MockTransport, SyncTransport};
pub use watermark::{ReplicaInfo, ReplicaInfoFile, INFO_VERSION};
