//! Configuration for the sync engine.

use replisql_protocol::PROTOCOL_VERSION;
use std::time::Duration;

/// Configuration for replica sync.
///
/// The endpoint and token are fixed for the lifetime of an engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Primary base URL (`https://...`).
    pub sync_url: String,
    /// Bearer token, empty for none.
    pub auth_token: String,
    /// Protocol version.
    pub protocol_version: u16,
    /// Maximum number of entries per pull request.
    pub pull_batch_size: u32,
    /// Connect timeout for HTTP transports.
    pub connect_timeout: Duration,
    /// Per-request timeout, unbounded when `None`.
    pub timeout: Option<Duration>,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(sync_url: impl Into<String>) -> Self {
        Self {
            sync_url: normalize_url(&sync_url.into()),
            auth_token: String::new(),
            protocol_version: PROTOCOL_VERSION,
            pull_batch_size: 500,
            connect_timeout: Duration::from_secs(5),
            timeout: None,
        }
    }

    /// Sets the bearer token.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = token.into();
        self
    }

    /// Sets the pull batch size.
    pub fn with_pull_batch_size(mut self, size: u32) -> Self {
        self.pull_batch_size = size.max(1);
        self
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns the bearer token, if one is set.
    pub fn bearer(&self) -> Option<&str> {
        if self.auth_token.is_empty() {
            None
        } else {
            Some(&self.auth_token)
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("")
    }
}

/// Normalizes a primary URL: `libsql://` becomes `https://` and trailing
/// slashes are removed.
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();
    let url = match url.strip_prefix("libsql://") {
        Some(rest) => format!("https://{rest}"),
        None => url.to_string(),
    };
    url.trim_end_matches('/').to_string()
}

/// Returns true if `target` names a remote primary rather than a local file.
pub fn is_remote_url(target: &str) -> bool {
    let target = target.trim();
    ["libsql://", "http://", "https://"]
        .iter()
        .any(|scheme| target.starts_with(scheme))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_libsql_scheme() {
        assert_eq!(
            normalize_url("libsql://db.example.com/"),
            "https://db.example.com"
        );
        assert_eq!(normalize_url("http://127.0.0.1:8080"), "http://127.0.0.1:8080");
    }

    #[test]
    fn detects_remote_targets() {
        assert!(is_remote_url("libsql://x"));
        assert!(is_remote_url("https://x"));
        assert!(!is_remote_url(":memory:"));
        assert!(!is_remote_url("local.db"));
    }

    #[test]
    fn builder() {
        let config = SyncConfig::new("libsql://x")
            .with_auth_token("secret")
            .with_pull_batch_size(0)
            .with_timeout(Duration::from_secs(2));
        assert_eq!(config.sync_url, "https://x");
        assert_eq!(config.bearer(), Some("secret"));
        assert_eq!(config.pull_batch_size, 1);
        assert_eq!(config.timeout, Some(Duration::from_secs(2)));
        assert_eq!(SyncConfig::default().bearer(), None);
    }
}
