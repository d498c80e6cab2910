//! SQL engine capability interface.
//!
//! A [`Session`](crate::Session) drives an [`Engine`] and never inspects its
//! concrete type; the implementation is chosen when the session is built.

mod sqlite;

pub use sqlite::SqliteEngine;

use crate::config::IsolationLevel;
use crate::error::CoreResult;
use crate::statement::{Column, Row};
use replisql_protocol::Value;

/// Everything one statement produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatementOutput {
    /// Result columns, empty for statements that return no rows.
    pub columns: Vec<Column>,
    /// Result rows.
    pub rows: Vec<Row>,
    /// Rows changed by the most recent DML statement.
    pub changes: u64,
}

/// The operations a session needs from an embedded SQL engine.
pub trait Engine: Send {
    /// Prepares, binds and runs one statement to completion.
    fn execute(&mut self, sql: &str, params: &[Value]) -> CoreResult<StatementOutput>;

    /// Runs a batch of statements without parameters.
    fn execute_batch(&mut self, sql: &str) -> CoreResult<()>;

    /// Opens a transaction at `level`.
    fn begin(&mut self, level: IsolationLevel) -> CoreResult<()> {
        self.execute_batch(level.begin_sql())
    }

    /// Commits the open transaction.
    fn commit(&mut self) -> CoreResult<()> {
        self.execute_batch("COMMIT")
    }

    /// Rolls back the open transaction.
    fn rollback(&mut self) -> CoreResult<()> {
        self.execute_batch("ROLLBACK")
    }

    /// Returns true when no transaction is open on the engine.
    fn is_autocommit(&self) -> bool;

    /// Rowid of the most recent successful insert.
    fn last_insert_rowid(&self) -> i64;

    /// Releases the engine.
    fn close(self: Box<Self>) -> CoreResult<()>;
}
