//! Remote protocol client.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use replisql_protocol::{ChangeEntry, HandshakeRequest, PullRequest};
use tracing::{debug, trace};

/// Speaks the replication protocol to one primary over a transport.
pub struct RemoteClient<T: SyncTransport> {
    transport: T,
    client_id: [u8; 16],
    protocol_version: u16,
    pull_batch_size: u32,
}

impl<T: SyncTransport> RemoteClient<T> {
    /// Creates a client identifying itself as `client_id`.
    pub fn new(config: &SyncConfig, transport: T, client_id: [u8; 16]) -> Self {
        Self {
            transport,
            client_id,
            protocol_version: config.protocol_version,
            pull_batch_size: config.pull_batch_size,
        }
    }

    /// Returns the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Performs the handshake and returns the primary's head position.
    ///
    /// Fails if the primary rejects the replica, speaks another protocol
    /// version, or reports a head behind `watermark`.
    pub fn handshake(&self, watermark: u64) -> SyncResult<u64> {
        let mut request = HandshakeRequest::new(self.client_id, watermark);
        request.protocol_version = self.protocol_version;

        let response = self.transport.handshake(&request)?;
        if !response.success {
            let reason = response
                .error
                .unwrap_or_else(|| "handshake rejected".into());
            return Err(SyncError::ServerError(reason));
        }
        if response.protocol_version != self.protocol_version {
            return Err(SyncError::VersionMismatch {
                local: self.protocol_version,
                remote: response.protocol_version,
            });
        }
        if response.head < watermark {
            return Err(SyncError::WatermarkRegressed {
                local: watermark,
                remote: response.head,
            });
        }
        debug!(head = response.head, watermark, "handshake accepted");
        Ok(response.head)
    }

    /// Fetches every change after `since`, paging until the primary reports
    /// no more, and returns the entries with the resulting watermark.
    ///
    /// Entries are validated to be strictly increasing and above `since`.
    /// Nothing is returned on error.
    pub fn fetch_changes(&self, since: u64) -> SyncResult<(Vec<ChangeEntry>, u64)> {
        let mut cursor = since;
        let mut entries = Vec::new();

        loop {
            let response = self
                .transport
                .pull(&PullRequest::new(cursor, self.pull_batch_size))?;
            trace!(
                since = cursor,
                count = response.entries.len(),
                new_watermark = response.new_watermark,
                has_more = response.has_more,
                "pulled page"
            );

            if response.new_watermark < cursor {
                return Err(SyncError::WatermarkRegressed {
                    local: cursor,
                    remote: response.new_watermark,
                });
            }
            response.check_order(cursor)?;

            let progressed = response.new_watermark > cursor || !response.entries.is_empty();
            if response.has_more && !progressed {
                return Err(SyncError::Protocol(format!(
                    "primary reported more changes after {cursor} but returned none"
                )));
            }

            cursor = response.new_watermark;
            entries.extend(response.entries);

            if !response.has_more {
                break;
            }
        }

        Ok((entries, cursor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use replisql_protocol::{HandshakeResponse, PullResponse};

    fn client(transport: MockTransport) -> RemoteClient<MockTransport> {
        RemoteClient::new(
            &SyncConfig::new("https://p").with_pull_batch_size(2),
            transport,
            [9; 16],
        )
    }

    fn entry(position: u64) -> ChangeEntry {
        ChangeEntry::new(position, format!("INSERT INTO t VALUES ({position})"))
    }

    #[test]
    fn fetch_pages_until_done() {
        let transport = MockTransport::new();
        transport.push_pull_response(PullResponse::new(vec![entry(1), entry(2)], 2, true));
        transport.push_pull_response(PullResponse::new(vec![entry(3)], 3, false));

        let client = client(transport);
        let (entries, watermark) = client.fetch_changes(0).unwrap();

        assert_eq!(entries.len(), 3);
        assert_eq!(watermark, 3);
        let requests = client.transport().pull_requests();
        assert_eq!(requests[0], PullRequest::new(0, 2));
        assert_eq!(requests[1], PullRequest::new(2, 2));
    }

    #[test]
    fn no_changes_keeps_watermark() {
        let client = client(MockTransport::new());
        let (entries, watermark) = client.fetch_changes(7).unwrap();
        assert!(entries.is_empty());
        assert_eq!(watermark, 7);
    }

    #[test]
    fn regression_is_rejected() {
        let transport = MockTransport::new();
        transport.push_pull_response(PullResponse::new(vec![], 3, false));
        let err = client(transport).fetch_changes(5).unwrap_err();
        assert!(matches!(
            err,
            SyncError::WatermarkRegressed {
                local: 5,
                remote: 3
            }
        ));
    }

    #[test]
    fn out_of_order_is_rejected() {
        let transport = MockTransport::new();
        transport.push_pull_response(PullResponse::new(vec![entry(2), entry(1)], 2, false));
        assert!(matches!(
            client(transport).fetch_changes(0),
            Err(SyncError::Protocol(_))
        ));
    }

    #[test]
    fn stalled_paging_is_rejected() {
        let transport = MockTransport::new();
        transport.push_pull_response(PullResponse::new(vec![], 0, true));
        assert!(matches!(
            client(transport).fetch_changes(0),
            Err(SyncError::Protocol(_))
        ));
    }

    #[test]
    fn handshake_checks() {
        let transport = MockTransport::new();
        transport.set_handshake_response(HandshakeResponse::success(10));
        let c = client(transport);
        assert_eq!(c.handshake(4).unwrap(), 10);
        assert!(matches!(
            c.handshake(11),
            Err(SyncError::WatermarkRegressed { .. })
        ));

        let transport = MockTransport::new();
        transport.set_handshake_response(HandshakeResponse::error("unknown database"));
        assert!(matches!(
            client(transport).handshake(0),
            Err(SyncError::ServerError(msg)) if msg == "unknown database"
        ));

        let transport = MockTransport::new();
        let mut response = HandshakeResponse::success(0);
        response.protocol_version = 99;
        transport.set_handshake_response(response);
        assert!(matches!(
            client(transport).handshake(0),
            Err(SyncError::VersionMismatch { remote: 99, .. })
        ));
    }
}
