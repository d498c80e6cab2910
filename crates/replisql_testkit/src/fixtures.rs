//! Test fixtures and session helpers.
//!
//! Provides convenience functions for opening sessions on temporary
//! databases and replicas of an [`InMemoryPrimary`].

use crate::primary::{InMemoryPrimary, PRIMARY_URL};
use replisql_core::{ConnectOptions, Session};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use tempfile::TempDir;

/// A database file in a temporary directory, removed on drop.
pub struct TestDatabase {
    dir: TempDir,
    path: PathBuf,
}

impl TestDatabase {
    /// Creates a fresh temporary location for `test.db`.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let path = dir.path().join("test.db");
        Self { dir, path }
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path as a connect string.
    pub fn database(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    /// Path of the replica info record.
    pub fn info_path(&self) -> PathBuf {
        self.dir.path().join("test.db-info")
    }

    /// Options for a local session on this database.
    pub fn options(&self) -> ConnectOptions {
        ConnectOptions::new(self.database())
    }

    /// Options for a replica of the loopback primary on this database.
    pub fn replica_options(&self, token: &str) -> ConnectOptions {
        self.options().sync_url(PRIMARY_URL).auth_token(token)
    }

    /// Opens a local session with `options` pointed at this database.
    pub fn open(&self, options: ConnectOptions) -> Session {
        let options = ConnectOptions {
            database: self.database(),
            ..options
        };
        Session::open(&options).expect("Failed to open session")
    }

    /// Opens a replica of `primary` presenting `token`.
    pub fn open_replica(&self, primary: &Arc<InMemoryPrimary>, token: &str) -> Session {
        replica_session(&self.replica_options(token), primary, token)
            .expect("Failed to open replica")
    }
}

impl Default for TestDatabase {
    fn default() -> Self {
        Self::new()
    }
}

/// Opens an in-memory session with default options.
pub fn memory_session() -> Session {
    Session::open(&ConnectOptions::default()).expect("Failed to open in-memory session")
}

/// Opens an in-memory session with `options`.
pub fn memory_session_with(options: ConnectOptions) -> Session {
    let options = ConnectOptions {
        database: ":memory:".to_string(),
        ..options
    };
    Session::open(&options).expect("Failed to open in-memory session")
}

/// Opens a replica session syncing from `primary` over loopback HTTP.
pub fn replica_session(
    options: &ConnectOptions,
    primary: &Arc<InMemoryPrimary>,
    token: &str,
) -> replisql_core::CoreResult<Session> {
    Session::open_replica_with_transport(options, Box::new(primary.loopback(token)))
}

/// Runs `f` with a fresh in-memory session.
pub fn with_memory_session<F, R>(f: F) -> R
where
    F: FnOnce(&Session) -> R,
{
    let session = memory_session();
    f(&session)
}

/// Installs a test tracing subscriber once; filtered by `RUST_LOG`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
