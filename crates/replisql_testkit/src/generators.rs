//! Property-based test generators using proptest.

use proptest::prelude::*;
use replisql_core::{AutocommitMode, IsolationLevel, Value};

/// Strategy for isolation levels, including none.
pub fn isolation_strategy() -> impl Strategy<Value = Option<IsolationLevel>> {
    prop_oneof![
        Just(None),
        Just(Some(IsolationLevel::Deferred)),
        Just(Some(IsolationLevel::Immediate)),
        Just(Some(IsolationLevel::Exclusive)),
    ]
}

/// Strategy for autocommit modes.
pub fn autocommit_strategy() -> impl Strategy<Value = AutocommitMode> {
    prop_oneof![
        Just(AutocommitMode::Legacy),
        Just(AutocommitMode::Enabled),
        Just(AutocommitMode::Disabled),
    ]
}

/// Strategy for bindable values.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<i64>().prop_map(Value::Integer),
        any::<f64>()
            .prop_filter("finite", |f| f.is_finite())
            .prop_map(Value::Real),
        "[a-zA-Z0-9 ]{0,16}".prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(Value::Blob),
    ]
}

/// One step a test drives a session through.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOp {
    /// A read-only `SELECT`.
    Query,
    /// An `INSERT` of one row.
    Insert(i64),
    /// A `CREATE TABLE IF NOT EXISTS`.
    CreateTable,
    /// `Session::commit`.
    Commit,
    /// `Session::rollback`.
    Rollback,
}

impl SessionOp {
    /// SQL executed for statement steps, `None` for commit and rollback.
    pub fn sql(&self) -> Option<(&'static str, Vec<Value>)> {
        match self {
            SessionOp::Query => Some(("SELECT count(*) FROM items", Vec::new())),
            SessionOp::Insert(v) => Some(("INSERT INTO items (v) VALUES (?)", vec![Value::Integer(*v)])),
            SessionOp::CreateTable => Some(("CREATE TABLE IF NOT EXISTS extra (x)", Vec::new())),
            SessionOp::Commit | SessionOp::Rollback => None,
        }
    }
}

/// Strategy for a single session step.
pub fn session_op_strategy() -> impl Strategy<Value = SessionOp> {
    prop_oneof![
        3 => Just(SessionOp::Query),
        4 => any::<i64>().prop_map(SessionOp::Insert),
        1 => Just(SessionOp::CreateTable),
        2 => Just(SessionOp::Commit),
        2 => Just(SessionOp::Rollback),
    ]
}

/// Strategy for a sequence of session steps.
pub fn session_ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<SessionOp>> {
    prop::collection::vec(session_op_strategy(), 0..max_len)
}
