//! Result cursors.

use crate::error::{CoreError, CoreResult};
use crate::session::SessionShared;
use crate::statement::{Column, Row, StatementHandle, StatementKind};
use replisql_protocol::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Executes statements on a session and buffers their rows.
///
/// Rows are consumed front to back; fetching past the end returns nothing
/// rather than failing. A cursor holds only a weak reference to its
/// session: once the session is closed or dropped, every operation on the
/// cursor fails with an interface error.
pub struct Cursor {
    session: Weak<SessionShared>,
    session_id: u64,
    closed: Arc<AtomicBool>,
    statement: Option<StatementHandle>,
    description: Option<Vec<Column>>,
    rows: VecDeque<Row>,
    rowcount: i64,
    lastrowid: Option<i64>,
    arraysize: usize,
}

impl Cursor {
    pub(crate) fn new(session: &Arc<SessionShared>) -> Self {
        let closed = Arc::new(AtomicBool::new(false));
        session.register_cursor(&closed);
        Self {
            session: Arc::downgrade(session),
            session_id: session.id(),
            closed,
            statement: None,
            description: None,
            rows: VecDeque::new(),
            rowcount: -1,
            lastrowid: None,
            arraysize: 1,
        }
    }

    fn session(&self) -> CoreResult<Arc<SessionShared>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CoreError::cursor_closed());
        }
        let session = self
            .session
            .upgrade()
            .filter(|s| s.id() == self.session_id)
            .ok_or_else(CoreError::session_closed)?;
        session.check()?;
        Ok(session)
    }

    fn reset(&mut self, handle: StatementHandle) {
        self.statement = Some(handle);
        self.description = None;
        self.rows.clear();
        self.rowcount = -1;
    }

    /// Executes one statement, replacing any buffered results.
    pub fn execute(&mut self, sql: &str, params: &[Value]) -> CoreResult<&mut Self> {
        let session = self.session()?;
        let handle = StatementHandle::new(sql, params.to_vec());
        let outcome = session.execute(&handle);
        let kind = handle.kind;
        self.reset(handle);
        let outcome = outcome?;

        self.lastrowid = Some(outcome.lastrowid);
        if kind == StatementKind::Dml {
            self.rowcount = outcome.output.changes as i64;
        }
        if !outcome.output.columns.is_empty() {
            self.description = Some(outcome.output.columns);
        }
        self.rows = outcome.output.rows.into();
        Ok(self)
    }

    /// Executes `sql` once per parameter set, in order.
    ///
    /// Each execution follows the same transaction rules as [`execute`];
    /// a failure stops the loop without undoing earlier executions.
    /// `rowcount` is the total number of changed rows for DML.
    ///
    /// [`execute`]: Cursor::execute
    pub fn executemany<I>(&mut self, sql: &str, param_sets: I) -> CoreResult<&mut Self>
    where
        I: IntoIterator<Item = Vec<Value>>,
    {
        let session = self.session()?;
        let mut handle = StatementHandle::new(sql, Vec::new());
        let kind = handle.kind;
        self.reset(handle.clone());

        let mut total: i64 = 0;
        for params in param_sets {
            handle.params = params;
            let outcome = session.execute(&handle)?;
            self.lastrowid = Some(outcome.lastrowid);
            total += outcome.output.changes as i64;
            if !outcome.output.columns.is_empty() {
                self.description = Some(outcome.output.columns);
            }
            self.rows = outcome.output.rows.into();
        }
        if kind == StatementKind::Dml {
            self.rowcount = total;
        }
        self.statement = Some(handle);
        Ok(self)
    }

    /// Commits any open transaction, then runs a multi-statement script.
    pub fn executescript(&mut self, sql: &str) -> CoreResult<&mut Self> {
        let session = self.session()?;
        self.reset(StatementHandle::new(sql, Vec::new()));
        session.execute_script(sql)?;
        Ok(self)
    }

    /// Next row, or `None` once exhausted.
    pub fn fetchone(&mut self) -> CoreResult<Option<Row>> {
        self.session()?;
        Ok(self.rows.pop_front())
    }

    /// Up to `n` rows; empty once exhausted.
    pub fn fetchmany(&mut self, n: usize) -> CoreResult<Vec<Row>> {
        self.session()?;
        let take = n.min(self.rows.len());
        Ok(self.rows.drain(..take).collect())
    }

    /// Up to [`arraysize`](Self::arraysize) rows.
    pub fn fetchmany_default(&mut self) -> CoreResult<Vec<Row>> {
        self.fetchmany(self.arraysize)
    }

    /// All remaining rows.
    pub fn fetchall(&mut self) -> CoreResult<Vec<Row>> {
        self.session()?;
        Ok(self.rows.drain(..).collect())
    }

    /// Columns of the last row-producing statement.
    pub fn description(&self) -> CoreResult<Option<&[Column]>> {
        self.session()?;
        Ok(self.description.as_deref())
    }

    /// Rowid of the last insert on the session, `None` before the cursor
    /// executed anything.
    pub fn lastrowid(&self) -> CoreResult<Option<i64>> {
        self.session()?;
        Ok(self.lastrowid)
    }

    /// Rows changed by the last DML statement, `-1` otherwise.
    pub fn rowcount(&self) -> CoreResult<i64> {
        self.session()?;
        Ok(self.rowcount)
    }

    /// Default batch size of [`fetchmany_default`](Self::fetchmany_default).
    pub fn arraysize(&self) -> usize {
        self.arraysize
    }

    /// Sets the default batch size.
    pub fn set_arraysize(&mut self, size: usize) {
        self.arraysize = size.max(1);
    }

    /// Last executed statement.
    pub fn statement(&self) -> Option<&StatementHandle> {
        self.statement.as_ref()
    }

    /// Returns true once the cursor or its session is closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
            || self.session.upgrade().map_or(true, |s| s.is_closed())
    }

    /// Closes the cursor and drops buffered rows. Idempotent.
    pub fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        self.rows.clear();
        self.description = None;
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("session", &self.session_id)
            .field("closed", &self.is_closed())
            .field("buffered", &self.rows.len())
            .field("rowcount", &self.rowcount)
            .finish()
    }
}
