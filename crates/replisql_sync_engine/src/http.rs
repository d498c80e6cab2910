//! HTTP transport implementation.
//!
//! Protocol messages travel as CBOR bodies of `POST` requests to
//! `{sync_url}/sync/handshake` and `{sync_url}/sync/pull`, authenticated with
//! a bearer token. The actual HTTP client is abstracted behind [`HttpClient`]
//! so tests can route requests to an in-process primary.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use parking_lot::RwLock;
use replisql_protocol::{HandshakeRequest, HandshakeResponse, PullRequest, PullResponse};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Path of the handshake endpoint.
pub const HANDSHAKE_PATH: &str = "/sync/handshake";
/// Path of the pull endpoint.
pub const PULL_PATH: &str = "/sync/pull";

/// Raw HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a `200 OK` response.
    pub fn ok(body: Vec<u8>) -> Self {
        Self { status: 200, body }
    }

    /// Creates a response with an error status and a text body.
    pub fn status(status: u16, message: &str) -> Self {
        Self {
            status,
            body: message.as_bytes().to_vec(),
        }
    }

    fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request with an optional bearer token.
    ///
    /// Only failures to obtain a response are errors; non-2xx statuses are
    /// returned as responses.
    fn post(&self, url: &str, bearer: Option<&str>, body: Vec<u8>) -> SyncResult<HttpResponse>;

    /// Checks if the client is healthy.
    fn is_healthy(&self) -> bool;
}

/// HTTP-based sync transport.
pub struct HttpTransport<C: HttpClient> {
    base_url: String,
    auth_token: Option<String>,
    client: C,
    connected: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport without credentials.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token: None,
            client,
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Sets the bearer token sent with every request.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.auth_token = if token.is_empty() { None } else { Some(token) };
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn record<T>(&self, result: SyncResult<T>) -> SyncResult<T> {
        match &result {
            Ok(_) => *self.last_error.write() = None,
            Err(e) => *self.last_error.write() = Some(e.to_string()),
        }
        result
    }

    fn post_cbor(&self, endpoint: &str, body: Vec<u8>) -> SyncResult<Vec<u8>> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }

        let url = format!("{}{}", self.base_url, endpoint);
        debug!(url = %url, bytes = body.len(), "sync request");
        let response = self.client.post(&url, self.auth_token.as_deref(), body)?;

        match response.status {
            200..=299 => Ok(response.body),
            401 | 403 => Err(SyncError::AuthenticationFailed(format!(
                "HTTP {}: {}",
                response.status,
                response.body_text()
            ))),
            500..=599 => Err(SyncError::ServerError(format!(
                "HTTP {}: {}",
                response.status,
                response.body_text()
            ))),
            status => Err(SyncError::Protocol(format!(
                "unexpected HTTP status {status}: {}",
                response.body_text()
            ))),
        }
    }
}

impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    fn handshake(&self, request: &HandshakeRequest) -> SyncResult<HandshakeResponse> {
        let result = request
            .encode()
            .map_err(SyncError::from)
            .and_then(|body| self.post_cbor(HANDSHAKE_PATH, body))
            .and_then(|bytes| Ok(HandshakeResponse::decode(&bytes)?));
        self.record(result)
    }

    fn pull(&self, request: &PullRequest) -> SyncResult<PullResponse> {
        let result = request
            .encode()
            .map_err(SyncError::from)
            .and_then(|body| self.post_cbor(PULL_PATH, body))
            .and_then(|bytes| Ok(PullResponse::decode(&bytes)?));
        self.record(result)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Blocking [`HttpClient`] backed by `reqwest` with rustls.
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    /// Builds a client honoring the connect and request timeouts of `config`.
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .user_agent(concat!("replisql/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::transport_fatal(e.to_string()))?;
        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    fn post(&self, url: &str, bearer: Option<&str>, body: Vec<u8>) -> SyncResult<HttpResponse> {
        let mut request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/cbor")
            .body(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().map_err(map_reqwest_error)?.to_vec();
        Ok(HttpResponse { status, body })
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

fn map_reqwest_error(err: reqwest::Error) -> SyncError {
    if err.is_timeout() {
        SyncError::Timeout
    } else if err.is_connect() {
        SyncError::transport_retryable(err.to_string())
    } else {
        SyncError::transport_fatal(err.to_string())
    }
}

/// Creates the production transport for `config`.
pub fn http_transport(config: &SyncConfig) -> SyncResult<HttpTransport<ReqwestClient>> {
    let client = ReqwestClient::new(config)?;
    Ok(HttpTransport::new(config.sync_url.clone(), client).with_auth_token(config.auth_token.clone()))
}

/// Trait for in-process servers that can answer loopback requests.
pub trait LoopbackServer {
    /// Handles a POST request to `path`.
    fn handle_post(&self, path: &str, bearer: Option<&str>, body: &[u8]) -> HttpResponse;
}

impl<S: LoopbackServer + ?Sized> LoopbackServer for Arc<S> {
    fn handle_post(&self, path: &str, bearer: Option<&str>, body: &[u8]) -> HttpResponse {
        (**self).handle_post(path, bearer, body)
    }
}

/// A loopback HTTP client that routes requests directly to a server.
///
/// Useful for exercising the HTTP transport without a network.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, bearer: Option<&str>, body: Vec<u8>) -> SyncResult<HttpResponse> {
        let path = url.find("/sync/").map(|i| &url[i..]).unwrap_or(url);
        Ok(self.server.handle_post(path, bearer, &body))
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct TestClient {
        response: Mutex<HttpResponse>,
        seen: Mutex<Vec<(String, Option<String>)>>,
        healthy: AtomicBool,
    }

    impl TestClient {
        fn new(response: HttpResponse) -> Self {
            Self {
                response: Mutex::new(response),
                seen: Mutex::new(Vec::new()),
                healthy: AtomicBool::new(true),
            }
        }
    }

    impl HttpClient for &TestClient {
        fn post(&self, url: &str, bearer: Option<&str>, _body: Vec<u8>) -> SyncResult<HttpResponse> {
            self.seen
                .lock()
                .push((url.to_string(), bearer.map(str::to_string)));
            Ok(self.response.lock().clone())
        }

        fn is_healthy(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn transport_handshake_sends_bearer() {
        let client = TestClient::new(HttpResponse::ok(
            HandshakeResponse::success(42).encode().unwrap(),
        ));
        let transport =
            HttpTransport::new("https://primary.example.com/", &client).with_auth_token("tok");
        let response = transport
            .handshake(&HandshakeRequest::new([1u8; 16], 0))
            .unwrap();

        assert!(response.success);
        assert_eq!(response.head, 42);
        let seen = client.seen.lock();
        assert_eq!(seen[0].0, "https://primary.example.com/sync/handshake");
        assert_eq!(seen[0].1.as_deref(), Some("tok"));
    }

    #[test]
    fn empty_token_sends_no_bearer() {
        let client = TestClient::new(HttpResponse::ok(
            PullResponse::new(vec![], 0, false).encode().unwrap(),
        ));
        let transport = HttpTransport::new("https://p", &client).with_auth_token("");
        transport.pull(&PullRequest::new(0, 10)).unwrap();
        assert_eq!(client.seen.lock()[0].1, None);
    }

    #[test]
    fn status_mapping() {
        let cases = [
            (401, "auth"),
            (403, "auth"),
            (500, "server"),
            (503, "server"),
            (404, "protocol"),
        ];
        for (status, expected) in cases {
            let client = TestClient::new(HttpResponse::status(status, "nope"));
            let transport = HttpTransport::new("https://p", &client);
            let err = transport.pull(&PullRequest::new(0, 1)).unwrap_err();
            let kind = match err {
                SyncError::AuthenticationFailed(_) => "auth",
                SyncError::ServerError(_) => "server",
                SyncError::Protocol(_) => "protocol",
                other => panic!("unexpected error {other:?}"),
            };
            assert_eq!(kind, expected, "status {status}");
            assert!(transport.last_error().is_some());
        }
    }

    #[test]
    fn undecodable_body_is_protocol_error() {
        let client = TestClient::new(HttpResponse::ok(vec![0xff]));
        let transport = HttpTransport::new("https://p", &client);
        assert!(matches!(
            transport.handshake(&HandshakeRequest::new([0; 16], 0)),
            Err(SyncError::Protocol(_))
        ));
    }

    #[test]
    fn closed_transport_rejects_requests() {
        let client = TestClient::new(HttpResponse::ok(vec![]));
        let transport = HttpTransport::new("https://p", &client);
        transport.close().unwrap();
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.pull(&PullRequest::new(0, 1)),
            Err(SyncError::NotConnected)
        ));
        assert!(client.seen.lock().is_empty());
    }

    #[test]
    fn unhealthy_client_is_disconnected() {
        let client = TestClient::new(HttpResponse::ok(vec![]));
        client.healthy.store(false, Ordering::SeqCst);
        let transport = HttpTransport::new("https://p", &client);
        assert!(!transport.is_connected());
    }

    #[test]
    fn http_transport_from_config() {
        let config = SyncConfig::new("libsql://db.example.com").with_auth_token("t");
        let transport = http_transport(&config).unwrap();
        assert_eq!(transport.base_url(), "https://db.example.com");
    }
}
