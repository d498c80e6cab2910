//! Sessions.
//!
//! A [`Session`] owns one engine connection, the transaction state machine
//! driving it, and optionally a replica sync engine. Cursors refer back to
//! their session weakly, by pointer and id, so dropping the session
//! invalidates them.

use crate::config::{AutocommitMode, ConnectOptions, IsolationLevel, Target};
use crate::cursor::Cursor;
use crate::engine::{Engine, SqliteEngine, StatementOutput};
use crate::error::{CoreError, CoreResult};
use crate::replica::{Replica, SessionApplier};
use crate::statement::{StatementHandle, StatementKind};
use crate::transaction::{ScopeExit, TransactionStateMachine, TxnCommand};
use parking_lot::{Mutex, MutexGuard};
use replisql_protocol::Value;
use replisql_sync_engine::{ReplicaInfo, ReplicaSyncEngine, SyncStats, SyncTransport};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use tracing::{debug, info, warn};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Result of one statement as seen by a cursor.
#[derive(Debug)]
pub(crate) struct ExecOutcome {
    pub(crate) output: StatementOutput,
    pub(crate) lastrowid: i64,
}

/// State shared between a session, its cursors and its replica applier.
pub(crate) struct SessionShared {
    id: u64,
    owner: Option<ThreadId>,
    closed: AtomicBool,
    inner: Mutex<SessionInner>,
}

pub(crate) struct SessionInner {
    engine: Option<Box<dyn Engine>>,
    pub(crate) txn: TransactionStateMachine,
    cursors: Vec<Weak<AtomicBool>>,
}

impl SessionShared {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Rejects use of a closed session or use from a foreign thread.
    pub(crate) fn check(&self) -> CoreResult<()> {
        if self.is_closed() {
            return Err(CoreError::session_closed());
        }
        if let Some(owner) = self.owner {
            let current = thread::current().id();
            if owner != current {
                return Err(CoreError::programming(format!(
                    "session created in thread {owner:?} cannot be used in thread {current:?}"
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock()
    }

    pub(crate) fn execute(&self, handle: &StatementHandle) -> CoreResult<ExecOutcome> {
        self.check()?;
        self.lock().execute(handle)
    }

    pub(crate) fn execute_script(&self, sql: &str) -> CoreResult<()> {
        self.check()?;
        let mut inner = self.lock();
        inner.ensure_not_syncing()?;
        if let Some(command) = inner.txn.commit() {
            inner.run_command(command)?;
        }

        let engine = inner.engine()?;
        let result = engine.execute_batch(sql);
        let in_transaction = !engine.is_autocommit();
        inner.txn.after_statement(StatementKind::Other, in_transaction);
        result?;

        inner.reopen_if_disabled()
    }

    pub(crate) fn register_cursor(&self, flag: &Arc<AtomicBool>) {
        let mut inner = self.lock();
        inner.cursors.retain(|c| c.strong_count() > 0);
        inner.cursors.push(Arc::downgrade(flag));
    }
}

impl SessionInner {
    pub(crate) fn engine(&mut self) -> CoreResult<&mut (dyn Engine + 'static)> {
        self.engine.as_deref_mut().ok_or_else(CoreError::session_closed)
    }

    fn ensure_not_syncing(&self) -> CoreResult<()> {
        if self.txn.is_syncing() {
            return Err(CoreError::interface("sync in progress"));
        }
        Ok(())
    }

    /// Runs a transaction command and reconciles the state machine.
    pub(crate) fn run_command(&mut self, command: TxnCommand) -> CoreResult<()> {
        let engine = self.engine()?;
        let result = match command {
            TxnCommand::Begin(level) => engine.begin(level),
            TxnCommand::Commit => engine.commit(),
            TxnCommand::Rollback => engine.rollback(),
        };
        let in_transaction = !engine.is_autocommit();
        self.txn.reconcile(in_transaction);
        debug!(?command, in_transaction, "transaction command");
        result
    }

    fn execute(&mut self, handle: &StatementHandle) -> CoreResult<ExecOutcome> {
        if let Some(command) = self.txn.before_statement(handle.kind)? {
            self.run_command(command)?;
        }

        let engine = self.engine()?;
        let result = engine.execute(&handle.sql, &handle.params);
        let in_transaction = !engine.is_autocommit();
        let lastrowid = engine.last_insert_rowid();
        self.txn.after_statement(handle.kind, in_transaction);

        Ok(ExecOutcome {
            output: result?,
            lastrowid,
        })
    }

    fn reopen_if_disabled(&mut self) -> CoreResult<()> {
        if self.txn.in_transaction() {
            return Ok(());
        }
        match self.txn.after_commit() {
            Some(command) => self.run_command(command),
            None => Ok(()),
        }
    }
}

/// A connection to a local database or embedded replica.
pub struct Session {
    shared: Arc<SessionShared>,
    replica: Option<Replica>,
}

impl Session {
    /// Opens a session on the SQLite database `options` points at.
    ///
    /// Replication settings in `options` are ignored; use
    /// [`connect`](crate::connect) to open replicas.
    pub fn open(options: &ConnectOptions) -> CoreResult<Self> {
        options.validate()?;
        let engine = SqliteEngine::open(options)?;
        Self::open_with_engine(Box::new(engine), options)
    }

    /// Opens a session over an already opened engine.
    pub fn open_with_engine(engine: Box<dyn Engine>, options: &ConnectOptions) -> CoreResult<Self> {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let txn = TransactionStateMachine::new(options.isolation_level, options.autocommit);
        let opening = txn.on_open();
        let shared = Arc::new(SessionShared {
            id,
            owner: options.check_same_thread.then(|| thread::current().id()),
            closed: AtomicBool::new(false),
            inner: Mutex::new(SessionInner {
                engine: Some(engine),
                txn,
                cursors: Vec::new(),
            }),
        });
        if let Some(command) = opening {
            shared.lock().run_command(command)?;
        }
        info!(
            session = id,
            database = %options.database,
            isolation_level = ?options.isolation_level,
            autocommit = ?options.autocommit,
            "session opened"
        );
        Ok(Self {
            shared,
            replica: None,
        })
    }

    /// Opens an embedded replica that syncs through `transport`.
    ///
    /// A file-backed replica keeps its identity in `<database>-info` and does
    /// not contact the primary until [`sync`](Self::sync). A remote URL opens
    /// an in-memory replica and syncs once before returning.
    pub fn open_replica_with_transport(
        options: &ConnectOptions,
        transport: Box<dyn SyncTransport>,
    ) -> CoreResult<Self> {
        options.validate()?;
        let config = options
            .sync_config()
            .ok_or_else(|| CoreError::configuration("replica requires sync_url or a remote database URL"))?;
        let engine = SqliteEngine::open(options)?;
        let mut session = Self::open_with_engine(Box::new(engine), options)?;

        let info_file = options.info_file();
        let info = match &info_file {
            Some(file) => file.load_or_create().map_err(|e| {
                CoreError::connection(format!("cannot read replica info {}: {e}", file.path().display()))
            })?,
            None => ReplicaInfo::fresh(),
        };
        let applier = SessionApplier::new(Arc::downgrade(&session.shared), info_file, info.client_id);
        let replica = ReplicaSyncEngine::new(config, transport, applier, info.client_id)
            .map_err(|e| CoreError::connection(format!("cannot initialize replica: {e}")))?;
        if replica.watermark() != info.watermark {
            debug!(
                stored = replica.watermark(),
                mirrored = info.watermark,
                "replica info record is stale; database watermark wins"
            );
        }
        session.replica = Some(replica);

        if let Target::Remote(url) = options.target() {
            session
                .sync()
                .map_err(|e| CoreError::connection(format!("initial sync with {url} failed: {e}")))?;
        }
        Ok(session)
    }

    /// Process-unique session id.
    pub fn id(&self) -> u64 {
        self.shared.id()
    }

    /// Configured isolation level.
    pub fn isolation_level(&self) -> Option<IsolationLevel> {
        self.shared.lock().txn.isolation()
    }

    /// Configured autocommit mode.
    pub fn autocommit_mode(&self) -> AutocommitMode {
        self.shared.lock().txn.mode()
    }

    /// Returns true while a transaction is open.
    pub fn in_transaction(&self) -> bool {
        !self.is_closed() && self.shared.lock().txn.in_transaction()
    }

    /// Returns true once the session is closed.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Creates a cursor sharing this session's transaction.
    pub fn cursor(&self) -> CoreResult<Cursor> {
        self.shared.check()?;
        Ok(Cursor::new(&self.shared))
    }

    /// Executes one statement on a new cursor.
    pub fn execute(&self, sql: &str, params: &[Value]) -> CoreResult<Cursor> {
        let mut cursor = self.cursor()?;
        cursor.execute(sql, params)?;
        Ok(cursor)
    }

    /// Executes one statement per parameter set on a new cursor.
    pub fn executemany<I>(&self, sql: &str, param_sets: I) -> CoreResult<Cursor>
    where
        I: IntoIterator<Item = Vec<Value>>,
    {
        let mut cursor = self.cursor()?;
        cursor.executemany(sql, param_sets)?;
        Ok(cursor)
    }

    /// Commits any open transaction, then runs a multi-statement script.
    pub fn executescript(&self, sql: &str) -> CoreResult<Cursor> {
        let mut cursor = self.cursor()?;
        cursor.executescript(sql)?;
        Ok(cursor)
    }

    /// Commits the open transaction; a no-op when idle.
    pub fn commit(&self) -> CoreResult<()> {
        self.shared.check()?;
        let mut inner = self.shared.lock();
        inner.ensure_not_syncing()?;
        if let Some(command) = inner.txn.commit() {
            inner.run_command(command)?;
            inner.reopen_if_disabled()?;
        }
        Ok(())
    }

    /// Rolls back the open transaction; a no-op when idle.
    pub fn rollback(&self) -> CoreResult<()> {
        self.shared.check()?;
        let mut inner = self.shared.lock();
        inner.ensure_not_syncing()?;
        if let Some(command) = inner.txn.rollback() {
            inner.run_command(command)?;
        }
        Ok(())
    }

    /// Runs `f` as one transaction: commit on `Ok`, roll back on `Err`.
    ///
    /// Scopes nest and share the outermost transaction. A failed inner
    /// scope marks the whole transaction for rollback; if an outer scope
    /// then returns `Ok`, the rollback is reported as
    /// [`CoreError::RolledBack`]. Errors from `f` are returned unchanged.
    ///
    /// The scope opens a transaction in every autocommit mode, so
    /// [`in_transaction`](Self::in_transaction) reports `true` inside it
    /// even with [`AutocommitMode::Enabled`]. [`sync`](Self::sync) is
    /// refused with a conflict until the outermost scope exits.
    pub fn with_scope<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Session) -> Result<T, E>,
        E: From<CoreError>,
    {
        self.shared.check()?;
        {
            let mut inner = self.shared.lock();
            inner.ensure_not_syncing()?;
            if let Some(command) = inner.txn.enter_scope() {
                if let Err(e) = inner.run_command(command) {
                    inner.txn.exit_scope(false);
                    return Err(e.into());
                }
            }
        }

        let guard = ScopeGuard {
            shared: &self.shared,
            armed: true,
        };
        let result = f(self);
        guard.disarm();

        let exit = self.shared.lock().txn.exit_scope(result.is_ok());
        match exit {
            ScopeExit::Nested => result,
            ScopeExit::Commit => match result {
                Ok(value) => {
                    self.commit()?;
                    Ok(value)
                }
                Err(e) => Err(e),
            },
            ScopeExit::Rollback => {
                let rolled_back = self.rollback();
                match result {
                    Err(e) => {
                        if let Err(rb) = rolled_back {
                            warn!(session = self.id(), error = %rb, "rollback after failed scope failed");
                        }
                        Err(e)
                    }
                    Ok(_) => {
                        rolled_back?;
                        Err(CoreError::rolled_back("an inner scope failed").into())
                    }
                }
            }
        }
    }

    /// Pulls and applies changes from the primary; returns the new watermark.
    ///
    /// Fails with a conflict inside [`with_scope`](Self::with_scope) or when
    /// the open transaction holds uncommitted changes. A clean transaction
    /// (as kept open in `Disabled` mode) is released for the duration of the
    /// sync and re-opened afterwards.
    pub fn sync(&self) -> CoreResult<u64> {
        self.shared.check()?;
        let replica = self
            .replica
            .as_ref()
            .ok_or_else(|| CoreError::interface("session is not a replica"))?;

        {
            let mut inner = self.shared.lock();
            if let Some(command) = inner.txn.begin_sync()? {
                if let Err(e) = inner.run_command(command) {
                    inner.txn.end_sync();
                    return Err(e);
                }
            }
        }

        // the lock is released so the applier can take it
        let result = replica.sync();

        let restored = {
            let mut inner = self.shared.lock();
            match inner.txn.end_sync() {
                Some(command) => inner.run_command(command),
                None => Ok(()),
            }
        };

        let outcome = result?;
        restored?;
        Ok(outcome.watermark)
    }

    /// Local watermark of a replica.
    pub fn watermark(&self) -> Option<u64> {
        self.replica.as_ref().map(|r| r.watermark())
    }

    /// Sync statistics of a replica.
    pub fn sync_stats(&self) -> Option<SyncStats> {
        self.replica.as_ref().map(|r| r.stats())
    }

    /// Returns true if this session is an embedded replica.
    pub fn is_replica(&self) -> bool {
        self.replica.is_some()
    }

    /// Closes cursors, rolls back any open transaction, releases the
    /// replica transport and closes the engine. Idempotent.
    pub fn close(&self) -> CoreResult<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.shared.check()?;
        self.close_inner()
    }

    fn close_inner(&self) -> CoreResult<()> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut first_error = None;
        {
            let mut inner = self.shared.lock();
            for flag in inner.cursors.drain(..) {
                if let Some(flag) = flag.upgrade() {
                    flag.store(true, Ordering::SeqCst);
                }
            }
            if let Some(command) = inner.txn.close() {
                if let Err(e) = inner.run_command(command) {
                    warn!(session = self.id(), error = %e, "rollback on close failed");
                    first_error = Some(e);
                }
            }
            if let Some(engine) = inner.engine.take() {
                if let Err(e) = engine.close() {
                    warn!(session = self.id(), error = %e, "engine close failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(replica) = &self.replica {
            if let Err(e) = replica.close() {
                warn!(session = self.id(), error = %e, "replica transport close failed");
            }
        }
        info!(session = self.id(), "session closed");
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.close_inner() {
            warn!(session = self.id(), error = %e, "error closing session on drop");
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id())
            .field("closed", &self.is_closed())
            .field("replica", &self.is_replica())
            .finish()
    }
}

/// Leaves the scope as failed if the scope body panics.
struct ScopeGuard<'a> {
    shared: &'a Arc<SessionShared>,
    armed: bool,
}

impl ScopeGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        if !self.armed || self.shared.is_closed() {
            return;
        }
        let mut inner = self.shared.lock();
        if inner.txn.exit_scope(false) == ScopeExit::Rollback {
            if let Some(command) = inner.txn.rollback() {
                if let Err(e) = inner.run_command(command) {
                    warn!(error = %e, "rollback after panicking scope failed");
                }
            }
        }
    }
}
