//! SQLite engine backed by `rusqlite`.

use super::{Engine, StatementOutput};
use crate::config::{ConnectOptions, Target};
use crate::error::{CoreError, CoreResult};
use crate::statement::{Column, Row};
use replisql_protocol::Value;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OpenFlags};
use tracing::debug;

/// The production [`Engine`].
pub struct SqliteEngine {
    conn: Connection,
}

impl SqliteEngine {
    /// Opens the database `options` points at.
    ///
    /// Remote targets open a private in-memory database that the replica
    /// fills on sync.
    pub fn open(options: &ConnectOptions) -> CoreResult<Self> {
        let conn = match options.target() {
            Target::Memory | Target::Remote(_) => Connection::open_in_memory(),
            Target::Path(path) => {
                let mut flags = OpenFlags::default();
                if !options.uri {
                    flags.remove(OpenFlags::SQLITE_OPEN_URI);
                }
                Connection::open_with_flags(&path, flags)
            }
        }
        .map_err(|e| CoreError::connection(format!("cannot open {}: {e}", options.database)))?;

        conn.busy_timeout(options.timeout)?;
        let engine = Self { conn };
        engine.apply_key(options)?;
        debug!(database = %options.database, "sqlite engine opened");
        Ok(engine)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> CoreResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CoreError::connection(format!("cannot open in-memory database: {e}")))?;
        Ok(Self { conn })
    }

    #[cfg(feature = "encryption")]
    fn apply_key(&self, options: &ConnectOptions) -> CoreResult<()> {
        let Some(key) = &options.encryption_key else {
            return Ok(());
        };
        self.conn.pragma_update(None, "key", key.as_str())?;
        // the key is only checked on first read
        self.conn
            .query_row("SELECT count(*) FROM sqlite_master", [], |_| Ok(()))
            .map_err(|e| CoreError::connection(format!("cannot decrypt database: {e}")))
    }

    #[cfg(not(feature = "encryption"))]
    fn apply_key(&self, options: &ConnectOptions) -> CoreResult<()> {
        if options.encryption_key.is_some() {
            return Err(CoreError::configuration(
                "encryption_key requires the `encryption` feature",
            ));
        }
        Ok(())
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(v) => SqlValue::Integer(*v),
        Value::Real(v) => SqlValue::Real(*v),
        Value::Text(v) => SqlValue::Text(v.clone()),
        Value::Blob(v) => SqlValue::Blob(v.clone()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Integer(v),
        ValueRef::Real(v) => Value::Real(v),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
    }
}

impl Engine for SqliteEngine {
    fn execute(&mut self, sql: &str, params: &[Value]) -> CoreResult<StatementOutput> {
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<Column> = stmt
            .columns()
            .iter()
            .map(|c| Column::new(c.name(), c.decl_type().map(str::to_string)))
            .collect();
        let bound = params_from_iter(params.iter().map(to_sql));

        if columns.is_empty() {
            let changes = stmt.execute(bound)? as u64;
            return Ok(StatementOutput {
                columns,
                rows: Vec::new(),
                changes,
            });
        }

        let width = columns.len();
        let mut rows = Vec::new();
        let mut cursor = stmt.query(bound)?;
        while let Some(row) = cursor.next()? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(from_sql(row.get_ref(i)?));
            }
            rows.push(Row::from(values));
        }
        drop(cursor);

        Ok(StatementOutput {
            columns,
            rows,
            changes: self.conn.changes(),
        })
    }

    fn execute_batch(&mut self, sql: &str) -> CoreResult<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    fn is_autocommit(&self) -> bool {
        self.conn.is_autocommit()
    }

    fn last_insert_rowid(&self) -> i64 {
        self.conn.last_insert_rowid()
    }

    fn close(self: Box<Self>) -> CoreResult<()> {
        self.conn.close().map_err(|(_, e)| e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IsolationLevel;

    fn engine() -> SqliteEngine {
        SqliteEngine::open_in_memory().unwrap()
    }

    #[test]
    fn execute_reports_columns_rows_and_changes() {
        let mut e = engine();
        let out = e
            .execute("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)", &[])
            .unwrap();
        assert!(out.columns.is_empty());

        let out = e
            .execute(
                "INSERT INTO t (name) VALUES (?), (?)",
                &[Value::from("a"), Value::Null],
            )
            .unwrap();
        assert_eq!(out.changes, 2);
        assert_eq!(e.last_insert_rowid(), 2);

        let out = e.execute("SELECT id, name FROM t ORDER BY id", &[]).unwrap();
        assert_eq!(out.columns[0], Column::new("id", Some("INTEGER".into())));
        assert_eq!(out.columns[1].name, "name");
        assert_eq!(out.rows.len(), 2);
        assert_eq!(out.rows[0][1], Value::Text("a".into()));
        assert_eq!(out.rows[1][1], Value::Null);
    }

    #[test]
    fn expression_columns_have_no_decl_type() {
        let mut e = engine();
        let out = e.execute("SELECT 1 + 1 AS two, x'00ff'", &[]).unwrap();
        assert_eq!(out.columns[0], Column::new("two", None));
        assert_eq!(out.rows[0][0], Value::Integer(2));
        assert_eq!(out.rows[0][1], Value::Blob(vec![0, 255]));
    }

    #[test]
    fn transaction_commands_track_autocommit() {
        let mut e = engine();
        assert!(e.is_autocommit());
        e.begin(IsolationLevel::Immediate).unwrap();
        assert!(!e.is_autocommit());
        e.rollback().unwrap();
        assert!(e.is_autocommit());
        e.begin(IsolationLevel::Deferred).unwrap();
        e.commit().unwrap();
        assert!(e.is_autocommit());
    }

    #[test]
    fn errors_carry_extended_codes() {
        let mut e = engine();
        e.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY)").unwrap();
        e.execute("INSERT INTO t VALUES (1)", &[]).unwrap();
        let err = e.execute("INSERT INTO t VALUES (1)", &[]).unwrap_err();
        assert_eq!(
            err.engine_code(),
            Some(rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
        );

        let err = e.execute("SELEC 1", &[]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Engine);
    }

    #[test]
    fn open_missing_directory_is_connection_error() {
        let options = ConnectOptions::new("/nonexistent-dir/for/sure/app.db");
        let err = SqliteEngine::open(&options).err().unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::Connection);
    }
}
