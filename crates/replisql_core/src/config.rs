//! Connection configuration.

use crate::error::{CoreError, CoreResult};
use replisql_sync_engine::{is_remote_url, normalize_url, ReplicaInfoFile, SyncConfig};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use zeroize::Zeroizing;

/// Locking mode of an implicitly or explicitly opened transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    /// Locks are taken on first access.
    Deferred,
    /// A write lock is taken immediately.
    Immediate,
    /// An exclusive lock is taken immediately.
    Exclusive,
}

impl IsolationLevel {
    /// SQL keyword for this level.
    pub const fn as_str(self) -> &'static str {
        match self {
            IsolationLevel::Deferred => "DEFERRED",
            IsolationLevel::Immediate => "IMMEDIATE",
            IsolationLevel::Exclusive => "EXCLUSIVE",
        }
    }

    /// `BEGIN` statement opening a transaction at this level.
    pub const fn begin_sql(self) -> &'static str {
        match self {
            IsolationLevel::Deferred => "BEGIN DEFERRED",
            IsolationLevel::Immediate => "BEGIN IMMEDIATE",
            IsolationLevel::Exclusive => "BEGIN EXCLUSIVE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IsolationLevel {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEFERRED" => Ok(IsolationLevel::Deferred),
            "IMMEDIATE" => Ok(IsolationLevel::Immediate),
            "EXCLUSIVE" => Ok(IsolationLevel::Exclusive),
            other => Err(CoreError::configuration(format!(
                "invalid isolation level {other:?}"
            ))),
        }
    }
}

/// How transactions are opened and closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AutocommitMode {
    /// Implicit `BEGIN` before writes when an isolation level is set.
    #[default]
    Legacy,
    /// Statements commit as they run; only user-issued transactions exist.
    Enabled,
    /// A transaction is always open; commit re-opens it.
    Disabled,
}

impl FromStr for AutocommitMode {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy" | "-1" => Ok(AutocommitMode::Legacy),
            "true" | "1" | "on" | "enabled" => Ok(AutocommitMode::Enabled),
            "false" | "0" | "off" | "disabled" => Ok(AutocommitMode::Disabled),
            other => Err(CoreError::configuration(format!(
                "invalid autocommit mode {other:?}"
            ))),
        }
    }
}

impl TryFrom<i64> for AutocommitMode {
    type Error = CoreError;

    fn try_from(value: i64) -> CoreResult<Self> {
        match value {
            -1 => Ok(AutocommitMode::Legacy),
            1 => Ok(AutocommitMode::Enabled),
            0 => Ok(AutocommitMode::Disabled),
            other => Err(CoreError::configuration(format!(
                "invalid autocommit mode {other}"
            ))),
        }
    }
}

/// What a session connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A private in-memory database.
    Memory,
    /// A database file.
    Path(PathBuf),
    /// A remote primary, replicated into memory.
    Remote(String),
}

/// Options for [`connect`](crate::connect).
#[derive(Clone)]
pub struct ConnectOptions {
    /// Database path, `:memory:`, or a remote URL.
    pub database: String,
    /// Primary to replicate from when `database` is a local path.
    pub sync_url: Option<String>,
    /// Bearer token for the primary.
    pub auth_token: String,
    /// SQLCipher key. Requires the `encryption` feature.
    pub encryption_key: Option<Zeroizing<String>>,
    /// Level of implicitly opened transactions; `None` disables them.
    pub isolation_level: Option<IsolationLevel>,
    /// Transaction mode.
    pub autocommit: AutocommitMode,
    /// Busy timeout and HTTP connect timeout.
    pub timeout: Duration,
    /// Per-request timeout for sync.
    pub sync_timeout: Option<Duration>,
    /// Reject use from threads other than the creator.
    pub check_same_thread: bool,
    /// Interpret `database` as an SQLite URI filename.
    pub uri: bool,
    /// Entries per pull request.
    pub pull_batch_size: u32,
}

impl ConnectOptions {
    /// Creates options for `database` with default values.
    #[must_use]
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            sync_url: None,
            auth_token: String::new(),
            encryption_key: None,
            isolation_level: Some(IsolationLevel::Deferred),
            autocommit: AutocommitMode::Legacy,
            timeout: Duration::from_secs(5),
            sync_timeout: None,
            check_same_thread: true,
            uri: false,
            pull_batch_size: 500,
        }
    }

    /// Creates options from untyped key/value pairs, as adapters pass them.
    pub fn from_pairs<I, K, V>(database: impl Into<String>, pairs: I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut options = Self::new(database);
        for (key, value) in pairs {
            options.set(key.as_ref(), value.as_ref())?;
        }
        Ok(options)
    }

    /// Sets one option from its string form.
    pub fn set(&mut self, key: &str, value: &str) -> CoreResult<()> {
        match key {
            "database" => self.database = value.to_string(),
            "sync_url" => {
                self.sync_url = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                }
            }
            "auth_token" => self.auth_token = value.to_string(),
            "encryption_key" => {
                self.encryption_key = if value.is_empty() {
                    None
                } else {
                    Some(Zeroizing::new(value.to_string()))
                }
            }
            "isolation_level" => {
                self.isolation_level = match value.trim() {
                    "" => None,
                    v if v.eq_ignore_ascii_case("none") => None,
                    v => Some(v.parse()?),
                }
            }
            "autocommit" => self.autocommit = value.parse()?,
            "timeout" => self.timeout = parse_seconds(key, value)?,
            "sync_timeout" => self.sync_timeout = Some(parse_seconds(key, value)?),
            "check_same_thread" => self.check_same_thread = parse_bool(key, value)?,
            "uri" => self.uri = parse_bool(key, value)?,
            "pull_batch_size" => {
                self.pull_batch_size = value.trim().parse().map_err(|_| {
                    CoreError::configuration(format!("invalid pull_batch_size {value:?}"))
                })?
            }
            other => {
                return Err(CoreError::configuration(format!("unknown option {other:?}")));
            }
        }
        Ok(())
    }

    /// Sets the primary to replicate from.
    #[must_use]
    pub fn sync_url(mut self, url: impl Into<String>) -> Self {
        self.sync_url = Some(url.into());
        self
    }

    /// Sets the bearer token.
    #[must_use]
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = token.into();
        self
    }

    /// Sets the SQLCipher key.
    #[must_use]
    pub fn encryption_key(mut self, key: impl Into<String>) -> Self {
        self.encryption_key = Some(Zeroizing::new(key.into()));
        self
    }

    /// Sets the isolation level; `None` disables implicit transactions.
    #[must_use]
    pub fn isolation_level(mut self, level: Option<IsolationLevel>) -> Self {
        self.isolation_level = level;
        self
    }

    /// Sets the transaction mode.
    #[must_use]
    pub fn autocommit(mut self, mode: AutocommitMode) -> Self {
        self.autocommit = mode;
        self
    }

    /// Sets the busy timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the per-request sync timeout.
    #[must_use]
    pub fn sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = Some(timeout);
        self
    }

    /// Sets whether cross-thread use is rejected.
    #[must_use]
    pub fn check_same_thread(mut self, value: bool) -> Self {
        self.check_same_thread = value;
        self
    }

    /// Sets whether `database` is an SQLite URI filename.
    #[must_use]
    pub fn uri(mut self, value: bool) -> Self {
        self.uri = value;
        self
    }

    /// Sets the pull batch size.
    #[must_use]
    pub fn pull_batch_size(mut self, size: u32) -> Self {
        self.pull_batch_size = size;
        self
    }

    /// Resolves what the session connects to.
    pub fn target(&self) -> Target {
        let database = self.database.trim();
        if is_remote_url(database) {
            Target::Remote(normalize_url(database))
        } else if database == ":memory:" {
            Target::Memory
        } else {
            Target::Path(PathBuf::from(database))
        }
    }

    /// Checks the options for consistency.
    pub fn validate(&self) -> CoreResult<()> {
        if self.database.trim().is_empty() {
            return Err(CoreError::configuration("database must not be empty"));
        }
        if self.pull_batch_size == 0 {
            return Err(CoreError::configuration("pull_batch_size must be positive"));
        }
        if let Some(url) = &self.sync_url {
            if !is_remote_url(url) {
                return Err(CoreError::configuration(format!(
                    "sync_url {url:?} is not an http(s) or libsql URL"
                )));
            }
            if matches!(self.target(), Target::Remote(_)) {
                return Err(CoreError::configuration(
                    "sync_url cannot be combined with a remote database URL",
                ));
            }
            if matches!(self.target(), Target::Memory) {
                return Err(CoreError::configuration(
                    "an in-memory database cannot persist a replica watermark; use a file path",
                ));
            }
        }
        if self.encryption_key.is_some() && !cfg!(feature = "encryption") {
            return Err(CoreError::configuration(
                "encryption_key requires the `encryption` feature",
            ));
        }
        Ok(())
    }

    /// Sync configuration, when the session is a replica.
    pub fn sync_config(&self) -> Option<SyncConfig> {
        let url = match self.target() {
            Target::Remote(url) => url,
            _ => self.sync_url.clone()?,
        };
        let mut config = SyncConfig::new(url)
            .with_auth_token(self.auth_token.clone())
            .with_pull_batch_size(self.pull_batch_size)
            .with_connect_timeout(self.timeout);
        if let Some(timeout) = self.sync_timeout {
            config = config.with_timeout(timeout);
        }
        Some(config)
    }

    /// Replica info record of a file-backed replica.
    pub fn info_file(&self) -> Option<ReplicaInfoFile> {
        match (self.target(), &self.sync_url) {
            (Target::Path(path), Some(_)) => Some(ReplicaInfoFile::for_database(path)),
            _ => None,
        }
    }
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self::new(":memory:")
    }
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("database", &self.database)
            .field("sync_url", &self.sync_url)
            .field("auth_token", &(!self.auth_token.is_empty()).then_some("<redacted>"))
            .field("encryption_key", &self.encryption_key.as_ref().map(|_| "<redacted>"))
            .field("isolation_level", &self.isolation_level)
            .field("autocommit", &self.autocommit)
            .field("timeout", &self.timeout)
            .field("sync_timeout", &self.sync_timeout)
            .field("check_same_thread", &self.check_same_thread)
            .field("uri", &self.uri)
            .field("pull_batch_size", &self.pull_batch_size)
            .finish()
    }
}

fn parse_bool(key: &str, value: &str) -> CoreResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "on" | "yes" => Ok(true),
        "false" | "0" | "off" | "no" => Ok(false),
        _ => Err(CoreError::configuration(format!(
            "invalid boolean {value:?} for {key}"
        ))),
    }
}

fn parse_seconds(key: &str, value: &str) -> CoreResult<Duration> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| CoreError::configuration(format!("invalid duration {value:?} for {key}")))
}
