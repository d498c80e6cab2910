//! An in-process primary.
//!
//! [`InMemoryPrimary`] keeps a change log in memory and answers the sync
//! protocol either directly (as a [`SyncTransport`]) or behind the HTTP
//! transport through [`LoopbackClient`], so status-code handling and the
//! bearer check are exercised without a network.

use parking_lot::Mutex;
use replisql_protocol::{
    ChangeEntry, HandshakeRequest, HandshakeResponse, PullRequest, PullResponse, Value,
    PROTOCOL_VERSION,
};
use replisql_sync_engine::{
    HttpResponse, HttpTransport, LoopbackClient, LoopbackServer, SyncError, SyncResult,
    SyncTransport, HANDSHAKE_PATH, PULL_PATH,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Base URL the loopback transport pretends to talk to.
pub const PRIMARY_URL: &str = "https://primary.test";

/// HTTP transport routed to an [`InMemoryPrimary`].
pub type LoopbackTransport = HttpTransport<LoopbackClient<Arc<InMemoryPrimary>>>;

/// A primary database's change log held in memory.
#[derive(Debug)]
pub struct InMemoryPrimary {
    token: Option<String>,
    log: Mutex<Vec<ChangeEntry>>,
    unavailable: AtomicBool,
    handshakes: AtomicUsize,
    pulls: AtomicUsize,
}

impl InMemoryPrimary {
    /// Creates a primary that accepts any credentials.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(None))
    }

    /// Creates a primary that requires `token` as bearer credential.
    pub fn with_token(token: &str) -> Arc<Self> {
        Arc::new(Self::build(Some(token.to_string())))
    }

    fn build(token: Option<String>) -> Self {
        Self {
            token,
            log: Mutex::new(Vec::new()),
            unavailable: AtomicBool::new(false),
            handshakes: AtomicUsize::new(0),
            pulls: AtomicUsize::new(0),
        }
    }

    /// Appends a statement to the log and returns its position.
    pub fn append(&self, statement: &str, params: Vec<Value>) -> u64 {
        let mut log = self.log.lock();
        let position = log.len() as u64 + 1;
        log.push(ChangeEntry::with_params(position, statement, params));
        position
    }

    /// Appends several parameterless statements.
    pub fn append_all(&self, statements: &[&str]) -> u64 {
        statements
            .iter()
            .map(|s| self.append(s, Vec::new()))
            .last()
            .unwrap_or_else(|| self.head())
    }

    /// Position of the newest entry.
    pub fn head(&self) -> u64 {
        self.log.lock().len() as u64
    }

    /// Makes every request fail as if the primary were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of handshakes answered.
    pub fn handshake_count(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }

    /// Number of pulls answered.
    pub fn pull_count(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    /// HTTP transport to this primary presenting `token`.
    pub fn loopback(self: &Arc<Self>, token: &str) -> LoopbackTransport {
        HttpTransport::new(PRIMARY_URL, LoopbackClient::new(Arc::clone(self))).with_auth_token(token)
    }

    /// Answers a handshake.
    pub fn handle_handshake(&self, request: &HandshakeRequest) -> HandshakeResponse {
        self.handshakes.fetch_add(1, Ordering::SeqCst);
        if request.protocol_version != PROTOCOL_VERSION {
            return HandshakeResponse::error(format!(
                "unsupported protocol version {}",
                request.protocol_version
            ));
        }
        HandshakeResponse::success(self.head())
    }

    /// Answers a pull.
    pub fn handle_pull(&self, request: &PullRequest) -> PullResponse {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        let log = self.log.lock();
        let head = log.len() as u64;
        let entries: Vec<ChangeEntry> = log
            .iter()
            .filter(|e| e.position > request.since)
            .take(request.limit.max(1) as usize)
            .cloned()
            .collect();
        let watermark = entries.last().map_or(request.since, |e| e.position);
        PullResponse::new(entries, watermark, watermark < head)
    }

    fn is_up(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst)
    }
}

impl SyncTransport for InMemoryPrimary {
    fn handshake(&self, request: &HandshakeRequest) -> SyncResult<HandshakeResponse> {
        if !self.is_up() {
            return Err(SyncError::transport_retryable("primary unavailable"));
        }
        Ok(self.handle_handshake(request))
    }

    fn pull(&self, request: &PullRequest) -> SyncResult<PullResponse> {
        if !self.is_up() {
            return Err(SyncError::transport_retryable("primary unavailable"));
        }
        Ok(self.handle_pull(request))
    }

    fn is_connected(&self) -> bool {
        self.is_up()
    }

    fn close(&self) -> SyncResult<()> {
        Ok(())
    }
}

impl LoopbackServer for InMemoryPrimary {
    fn handle_post(&self, path: &str, bearer: Option<&str>, body: &[u8]) -> HttpResponse {
        if !self.is_up() {
            return HttpResponse::status(503, "primary unavailable");
        }
        if let Some(token) = &self.token {
            if bearer != Some(token.as_str()) {
                return HttpResponse::status(401, "invalid token");
            }
        }
        let encoded = match path {
            HANDSHAKE_PATH => HandshakeRequest::decode(body)
                .and_then(|request| self.handle_handshake(&request).encode()),
            PULL_PATH => PullRequest::decode(body).and_then(|request| self.handle_pull(&request).encode()),
            _ => return HttpResponse::status(404, "not found"),
        };
        match encoded {
            Ok(bytes) => HttpResponse::ok(bytes),
            Err(e) => HttpResponse::status(400, &e.to_string()),
        }
    }
}
