//! Replica sync state machine.

use crate::client::RemoteClient;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use parking_lot::RwLock;
use replisql_protocol::ChangeEntry;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Engine is idle, not syncing.
    Idle,
    /// Engine is performing the handshake.
    Connecting,
    /// Engine is pulling changes from the primary.
    Pulling,
    /// Engine is applying pulled changes locally.
    Applying,
    /// Engine has completed a sync.
    Synced,
    /// The last sync failed.
    Error,
}

impl SyncState {
    /// Returns true if the engine is in an active sync state.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Connecting | SyncState::Pulling | SyncState::Applying
        )
    }

    /// Returns true if the engine can start a new sync.
    pub fn can_start_sync(&self) -> bool {
        matches!(self, SyncState::Idle | SyncState::Synced | SyncState::Error)
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Number of successful syncs.
    pub syncs_completed: u64,
    /// Number of failed syncs.
    pub syncs_failed: u64,
    /// Total number of entries applied.
    pub entries_applied: u64,
    /// Time of the last successful sync.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of one successful sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Watermark before the sync.
    pub previous_watermark: u64,
    /// Watermark after the sync.
    pub watermark: u64,
    /// Number of entries applied.
    pub applied: u64,
    /// Duration of the sync.
    pub duration: Duration,
}

/// Applies pulled changes to the local database.
pub trait SyncApplier: Send + Sync {
    /// Watermark currently stored in the local database.
    fn local_watermark(&self) -> SyncResult<u64>;

    /// Applies `entries` and stores `new_watermark` in one local transaction.
    ///
    /// Entries at or below the stored watermark must be skipped. Returns the
    /// number of entries applied. On error nothing may be visible.
    fn apply_changes(&self, entries: &[ChangeEntry], new_watermark: u64) -> SyncResult<u64>;
}

/// Keeps a local replica consistent with a remote primary.
///
/// Sync is pull-only, explicit and blocking: each call to [`sync`] runs one
/// handshake, pulls every change after the local watermark, and applies
/// them atomically together with the new watermark. No retries.
///
/// [`sync`]: ReplicaSyncEngine::sync
pub struct ReplicaSyncEngine<T: SyncTransport, A: SyncApplier> {
    config: SyncConfig,
    client: RemoteClient<T>,
    applier: A,
    client_id: Uuid,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    watermark: AtomicU64,
    running: AtomicBool,
}

impl<T: SyncTransport, A: SyncApplier> ReplicaSyncEngine<T, A> {
    /// Creates a new engine.
    pub fn new(config: SyncConfig, transport: T, applier: A, client_id: Uuid) -> SyncResult<Self> {
        let watermark = applier.local_watermark()?;
        let client = RemoteClient::new(&config, transport, *client_id.as_bytes());
        Ok(Self {
            config,
            client,
            applier,
            client_id,
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            watermark: AtomicU64::new(watermark),
            running: AtomicBool::new(false),
        })
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Last known local watermark.
    pub fn watermark(&self) -> u64 {
        self.watermark.load(Ordering::SeqCst)
    }

    /// Replica identity.
    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    /// Engine configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The applier.
    pub fn applier(&self) -> &A {
        &self.applier
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    /// Runs one sync and returns its outcome.
    ///
    /// On any error the local watermark and data are unchanged.
    pub fn sync(&self) -> SyncResult<SyncOutcome> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SyncError::InProgress);
        }
        let start = Instant::now();
        let result = self.run(start);
        self.running.store(false, Ordering::SeqCst);

        match &result {
            Ok(outcome) => {
                self.set_state(SyncState::Synced);
                self.watermark.store(outcome.watermark, Ordering::SeqCst);
                let mut stats = self.stats.write();
                stats.syncs_completed += 1;
                stats.entries_applied += outcome.applied;
                stats.last_sync_time = Some(Instant::now());
                stats.last_error = None;
                info!(
                    applied = outcome.applied,
                    watermark = outcome.watermark,
                    elapsed_ms = outcome.duration.as_millis() as u64,
                    "replica synced"
                );
            }
            Err(e) => self.handle_error(e),
        }
        result
    }

    fn run(&self, start: Instant) -> SyncResult<SyncOutcome> {
        self.set_state(SyncState::Connecting);
        let previous = self.applier.local_watermark()?;
        self.client.handshake(previous)?;

        self.set_state(SyncState::Pulling);
        let (entries, new_watermark) = self.client.fetch_changes(previous)?;
        debug!(count = entries.len(), new_watermark, "changes fetched");

        self.set_state(SyncState::Applying);
        let applied = if new_watermark > previous || !entries.is_empty() {
            self.applier.apply_changes(&entries, new_watermark)?
        } else {
            0
        };
        let watermark = self.applier.local_watermark()?.max(previous);

        Ok(SyncOutcome {
            previous_watermark: previous,
            watermark,
            applied,
            duration: start.elapsed(),
        })
    }

    fn handle_error(&self, error: &SyncError) {
        self.set_state(SyncState::Error);
        let mut stats = self.stats.write();
        stats.syncs_failed += 1;
        stats.last_error = Some(error.to_string());
        warn!(error = %error, "replica sync failed");
    }

    /// Closes the transport.
    pub fn close(&self) -> SyncResult<()> {
        self.client.transport().close()
    }
}

/// An in-memory applier for testing.
#[derive(Default)]
pub struct MemoryApplier {
    applied: RwLock<Vec<ChangeEntry>>,
    watermark: AtomicU64,
    fail_next: AtomicBool,
}

impl MemoryApplier {
    /// Creates an empty applier at watermark 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an applier that already stores `watermark`.
    pub fn at(watermark: u64) -> Self {
        let applier = Self::default();
        applier.watermark.store(watermark, Ordering::SeqCst);
        applier
    }

    /// Entries applied so far.
    pub fn applied(&self) -> Vec<ChangeEntry> {
        self.applied.read().clone()
    }

    /// Makes the next apply fail without effect.
    pub fn fail_next_apply(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

impl SyncApplier for MemoryApplier {
    fn local_watermark(&self) -> SyncResult<u64> {
        Ok(self.watermark.load(Ordering::SeqCst))
    }

    fn apply_changes(&self, entries: &[ChangeEntry], new_watermark: u64) -> SyncResult<u64> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(SyncError::Apply("injected failure".into()));
        }
        let current = self.watermark.load(Ordering::SeqCst);
        let fresh: Vec<ChangeEntry> = entries
            .iter()
            .filter(|e| e.position > current)
            .cloned()
            .collect();
        let count = fresh.len() as u64;
        self.applied.write().extend(fresh);
        self.watermark
            .store(current.max(new_watermark), Ordering::SeqCst);
        Ok(count)
    }
}

impl<A: SyncApplier + ?Sized> SyncApplier for std::sync::Arc<A> {
    fn local_watermark(&self) -> SyncResult<u64> {
        (**self).local_watermark()
    }

    fn apply_changes(&self, entries: &[ChangeEntry], new_watermark: u64) -> SyncResult<u64> {
        (**self).apply_changes(entries, new_watermark)
    }
}
