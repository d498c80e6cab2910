//! # replisql Core
//!
//! Sessions over an embedded SQLite database, optionally kept in sync with
//! a remote primary as an embedded replica.
//!
//! This crate provides:
//! - [`Session`]: one connection, its transaction state machine and cursors
//! - [`Cursor`]: statement execution and buffered row fetching
//! - The transaction rules for the configured isolation level and
//!   [`AutocommitMode`]
//! - Explicit, pull-only replica sync through [`Session::sync`]
//!
//! ## Key Invariants
//!
//! - A session's engine is reached only through the session lock
//! - Transaction state always matches the engine's autocommit flag after
//!   every statement
//! - Sync never runs while the open transaction holds uncommitted changes
//! - Cursors never outlive their session's validity
//!
//! ```no_run
//! use replisql_core::{connect, params, ConnectOptions};
//!
//! let session = connect(ConnectOptions::new("app.db"))?;
//! session.execute("CREATE TABLE IF NOT EXISTS users (id INTEGER, name TEXT)", &[])?;
//! session.execute("INSERT INTO users VALUES (?, ?)", &params![1, "alice"])?;
//! session.commit()?;
//!
//! let mut cursor = session.execute("SELECT name FROM users", &[])?;
//! let rows = cursor.fetchall()?;
//! # Ok::<(), replisql_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod cursor;
pub mod engine;
mod error;
mod replica;
mod session;
mod statement;
pub mod transaction;

pub use config::{AutocommitMode, ConnectOptions, IsolationLevel, Target};
pub use cursor::Cursor;
pub use engine::{Engine, SqliteEngine, StatementOutput};
pub use error::{CoreError, CoreResult, ErrorKind};
pub use replica::REPLICA_STATE_TABLE;
pub use replisql_protocol::Value;
pub use replisql_sync_engine::{SyncState, SyncStats, SyncTransport};
pub use session::Session;
pub use statement::{Column, Row, StatementHandle, StatementKind};
pub use transaction::{TransactionState, TransactionStateMachine};

use tracing::debug;

/// Opens a session described by `options`.
///
/// A plain path or `:memory:` opens a local session. A `sync_url` turns a
/// file-backed database into an embedded replica that syncs on demand. A
/// remote URL as the database opens an in-memory replica and syncs it once
/// before returning.
pub fn connect(options: ConnectOptions) -> CoreResult<Session> {
    options.validate()?;
    let Some(config) = options.sync_config() else {
        return Session::open(&options);
    };
    debug!(sync_url = %config.sync_url, "opening replica");
    let transport = replisql_sync_engine::http_transport(&config)
        .map_err(|e| CoreError::connection(format!("cannot create sync transport: {e}")))?;
    Session::open_replica_with_transport(&options, Box::new(transport))
}
