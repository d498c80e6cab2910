//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use replisql_protocol::{HandshakeRequest, HandshakeResponse, PullRequest, PullResponse};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// A sync transport carries protocol messages to the primary.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, in-process primaries, mocks for testing).
pub trait SyncTransport: Send + Sync {
    /// Performs a handshake with the primary.
    fn handshake(&self, request: &HandshakeRequest) -> SyncResult<HandshakeResponse>;

    /// Pulls a page of change entries.
    fn pull(&self, request: &PullRequest) -> SyncResult<PullResponse>;

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool;

    /// Closes the transport connection.
    fn close(&self) -> SyncResult<()>;
}

impl<T: SyncTransport + ?Sized> SyncTransport for Arc<T> {
    fn handshake(&self, request: &HandshakeRequest) -> SyncResult<HandshakeResponse> {
        (**self).handshake(request)
    }

    fn pull(&self, request: &PullRequest) -> SyncResult<PullResponse> {
        (**self).pull(request)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn close(&self) -> SyncResult<()> {
        (**self).close()
    }
}

impl<T: SyncTransport + ?Sized> SyncTransport for Box<T> {
    fn handshake(&self, request: &HandshakeRequest) -> SyncResult<HandshakeResponse> {
        (**self).handshake(request)
    }

    fn pull(&self, request: &PullRequest) -> SyncResult<PullResponse> {
        (**self).pull(request)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn close(&self) -> SyncResult<()> {
        (**self).close()
    }
}

/// A scripted transport for testing.
///
/// Pull responses are served in the order they were queued; once the queue
/// is empty an empty page at the last served watermark is returned.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    handshake_response: Mutex<Option<HandshakeResponse>>,
    pull_responses: Mutex<VecDeque<PullResponse>>,
    pull_requests: Mutex<Vec<PullRequest>>,
    fail_next_pull: Mutex<Option<SyncError>>,
    handshakes: AtomicUsize,
}

impl MockTransport {
    /// Creates a new mock transport that accepts handshakes.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            handshake_response: Mutex::new(Some(HandshakeResponse::success(0))),
            pull_responses: Mutex::new(VecDeque::new()),
            pull_requests: Mutex::new(Vec::new()),
            fail_next_pull: Mutex::new(None),
            handshakes: AtomicUsize::new(0),
        }
    }

    /// Sets the handshake response.
    pub fn set_handshake_response(&self, response: HandshakeResponse) {
        *self.handshake_response.lock() = Some(response);
    }

    /// Queues a pull response.
    pub fn push_pull_response(&self, response: PullResponse) {
        self.pull_responses.lock().push_back(response);
    }

    /// Makes the next pull fail with `error`.
    pub fn fail_next_pull(&self, error: SyncError) {
        *self.fail_next_pull.lock() = Some(error);
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Pull requests received so far.
    pub fn pull_requests(&self) -> Vec<PullRequest> {
        self.pull_requests.lock().clone()
    }

    /// Number of handshakes received.
    pub fn handshake_count(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncTransport for MockTransport {
    fn handshake(&self, _request: &HandshakeRequest) -> SyncResult<HandshakeResponse> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        self.handshakes.fetch_add(1, Ordering::SeqCst);
        self.handshake_response
            .lock()
            .clone()
            .ok_or_else(|| SyncError::Protocol("no mock handshake response set".into()))
    }

    fn pull(&self, request: &PullRequest) -> SyncResult<PullResponse> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        self.pull_requests.lock().push(request.clone());
        if let Some(err) = self.fail_next_pull.lock().take() {
            return Err(err);
        }
        Ok(self
            .pull_responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| PullResponse::new(Vec::new(), request.since, false)))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replisql_protocol::ChangeEntry;

    #[test]
    fn mock_transport_connection() {
        let transport = MockTransport::new();
        assert!(transport.is_connected());

        transport.close().unwrap();
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.handshake(&HandshakeRequest::new([0; 16], 0)),
            Err(SyncError::NotConnected)
        ));
    }

    #[test]
    fn mock_transport_serves_queue_in_order() {
        let transport = MockTransport::new();
        transport.push_pull_response(PullResponse::new(vec![ChangeEntry::new(1, "x")], 1, true));
        transport.push_pull_response(PullResponse::new(vec![], 1, false));

        assert!(transport.pull(&PullRequest::new(0, 10)).unwrap().has_more);
        assert!(!transport.pull(&PullRequest::new(1, 10)).unwrap().has_more);

        let drained = transport.pull(&PullRequest::new(1, 10)).unwrap();
        assert!(drained.entries.is_empty());
        assert_eq!(drained.new_watermark, 1);
        assert_eq!(transport.pull_requests().len(), 3);
    }

    #[test]
    fn mock_transport_failure_injection() {
        let transport = MockTransport::new();
        transport.fail_next_pull(SyncError::Timeout);
        assert!(matches!(
            transport.pull(&PullRequest::new(0, 1)),
            Err(SyncError::Timeout)
        ));
        assert!(transport.pull(&PullRequest::new(0, 1)).is_ok());
    }

    #[test]
    fn arc_transport_delegates() {
        let transport = Arc::new(MockTransport::new());
        let shared: Arc<dyn SyncTransport> = transport.clone();
        shared.handshake(&HandshakeRequest::new([1; 16], 0)).unwrap();
        assert_eq!(transport.handshake_count(), 1);
    }
}
