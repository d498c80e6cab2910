//! Statements, rows and column metadata.

use replisql_protocol::Value;
use std::ops::Index;

/// What a statement does, as far as transaction handling is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    /// `SELECT`, `VALUES`, `EXPLAIN`, or a `WITH` query.
    Query,
    /// `INSERT`, `UPDATE`, `DELETE`, `REPLACE`.
    Dml,
    /// `CREATE`, `DROP`, `ALTER`.
    Ddl,
    /// `BEGIN`, `COMMIT`, `END`, `ROLLBACK`, `SAVEPOINT`, `RELEASE`.
    TransactionControl,
    /// Anything else (`PRAGMA`, `VACUUM`, `ATTACH`, ...).
    Other,
}

impl StatementKind {
    /// Classifies `sql` by its leading keyword.
    ///
    /// Whitespace, comments and opening parentheses before the keyword are
    /// skipped. A `WITH` statement is DML when its first top-level keyword
    /// after the common table expressions is a DML keyword.
    pub fn classify(sql: &str) -> Self {
        let mut words = TopLevelWords::new(sql);
        let Some(first) = words.next() else {
            return StatementKind::Other;
        };
        match first.as_str() {
            "WITH" => words
                .find_map(|word| match word.as_str() {
                    "INSERT" | "UPDATE" | "DELETE" | "REPLACE" => Some(StatementKind::Dml),
                    "SELECT" | "VALUES" => Some(StatementKind::Query),
                    _ => None,
                })
                .unwrap_or(StatementKind::Query),
            other => Self::from_keyword(other),
        }
    }

    fn from_keyword(keyword: &str) -> Self {
        match keyword {
            "INSERT" | "UPDATE" | "DELETE" | "REPLACE" => StatementKind::Dml,
            "CREATE" | "DROP" | "ALTER" => StatementKind::Ddl,
            "BEGIN" | "COMMIT" | "END" | "ROLLBACK" | "SAVEPOINT" | "RELEASE" => {
                StatementKind::TransactionControl
            }
            "SELECT" | "VALUES" | "EXPLAIN" => StatementKind::Query,
            _ => StatementKind::Other,
        }
    }

    /// Returns true for statements that modify the database (DML and DDL).
    pub fn is_write(self) -> bool {
        matches!(self, StatementKind::Dml | StatementKind::Ddl)
    }

    /// Returns true for DML.
    pub fn is_dml(self) -> bool {
        self == StatementKind::Dml
    }
}

/// Iterates over the upper-cased keywords of `sql` at parenthesis depth 0,
/// skipping comments and quoted text.
struct TopLevelWords<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    depth: usize,
    leading: bool,
}

impl<'a> TopLevelWords<'a> {
    fn new(sql: &'a str) -> Self {
        Self {
            chars: sql.chars().peekable(),
            depth: 0,
            leading: true,
        }
    }

    fn skip_quoted(&mut self, close: char) {
        while let Some(c) = self.chars.next() {
            if c == close {
                // doubled quote is an escaped quote
                if self.chars.peek() == Some(&close) {
                    self.chars.next();
                } else {
                    return;
                }
            }
        }
    }

    fn skip_line_comment(&mut self) {
        for c in self.chars.by_ref() {
            if c == '\n' {
                return;
            }
        }
    }

    fn skip_block_comment(&mut self) {
        let mut previous = '\0';
        for c in self.chars.by_ref() {
            if previous == '*' && c == '/' {
                return;
            }
            previous = c;
        }
    }
}

impl Iterator for TopLevelWords<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        while let Some(c) = self.chars.next() {
            match c {
                '-' if self.chars.peek() == Some(&'-') => self.skip_line_comment(),
                '/' if self.chars.peek() == Some(&'*') => {
                    self.chars.next();
                    self.skip_block_comment();
                }
                '\'' | '"' | '`' => self.skip_quoted(c),
                '[' => self.skip_quoted(']'),
                // parentheses before the first keyword wrap the statement
                '(' if !self.leading => self.depth += 1,
                ')' if !self.leading => self.depth = self.depth.saturating_sub(1),
                c if c.is_ascii_alphabetic() || c == '_' => {
                    let mut word = String::new();
                    word.push(c.to_ascii_uppercase());
                    while let Some(&next) = self.chars.peek() {
                        if next.is_ascii_alphanumeric() || next == '_' {
                            word.push(next.to_ascii_uppercase());
                            self.chars.next();
                        } else {
                            break;
                        }
                    }
                    if self.depth == 0 {
                        self.leading = false;
                        return Some(word);
                    }
                }
                _ => {}
            }
        }
        None
    }
}

/// A statement as executed: SQL text, bound parameters and classification.
#[derive(Debug, Clone, PartialEq)]
pub struct StatementHandle {
    /// SQL text.
    pub sql: String,
    /// Bound positional parameters.
    pub params: Vec<Value>,
    /// Classification of `sql`.
    pub kind: StatementKind,
}

impl StatementHandle {
    /// Creates a handle, classifying `sql`.
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        let sql = sql.into();
        let kind = StatementKind::classify(&sql);
        Self { sql, params, kind }
    }
}

/// A result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name as reported by the engine.
    pub name: String,
    /// Declared type, when the column maps to a table column.
    pub decl_type: Option<String>,
}

impl Column {
    /// Creates a column.
    pub fn new(name: impl Into<String>, decl_type: Option<String>) -> Self {
        Self {
            name: name.into(),
            decl_type,
        }
    }
}

/// One result row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    /// Value at `index`.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// All values.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Consumes the row.
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the row has no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Self { values }
    }
}

impl Index<usize> for Row {
    type Output = Value;

    fn index(&self, index: usize) -> &Value {
        &self.values[index]
    }
}

/// Builds a `Vec<Value>` of statement parameters.
///
/// ```
/// use replisql_core::{params, Value};
/// let p = params![1, "two", 3.0, None::<i64>];
/// assert_eq!(p[1], Value::Text("two".into()));
/// ```
#[macro_export]
macro_rules! params {
    () => {
        ::std::vec::Vec::<$crate::Value>::new()
    };
    ($($value:expr),+ $(,)?) => {
        vec![$($crate::Value::from($value)),+]
    };
}
