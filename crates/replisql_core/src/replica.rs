//! Applying replicated changes through a session.

use crate::config::IsolationLevel;
use crate::engine::Engine;
use crate::error::CoreResult;
use crate::session::SessionShared;
use replisql_protocol::{ChangeEntry, Value};
use replisql_sync_engine::{
    ReplicaInfo, ReplicaInfoFile, ReplicaSyncEngine, SyncApplier, SyncError, SyncResult,
    SyncTransport, INFO_VERSION,
};
use std::sync::Weak;
use tracing::{debug, warn};
use uuid::Uuid;

/// The sync engine a replica session owns.
pub(crate) type Replica = ReplicaSyncEngine<Box<dyn SyncTransport>, SessionApplier>;

/// Table holding the replica watermark inside the database.
pub const REPLICA_STATE_TABLE: &str = "__replica_state";

const CREATE_STATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS __replica_state \
     (id INTEGER PRIMARY KEY CHECK (id = 0), watermark INTEGER NOT NULL)";
const STATE_TABLE_EXISTS: &str =
    "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = '__replica_state'";
const READ_WATERMARK: &str = "SELECT watermark FROM __replica_state WHERE id = 0";
const WRITE_WATERMARK: &str = "INSERT INTO __replica_state (id, watermark) VALUES (0, ?) \
     ON CONFLICT (id) DO UPDATE SET watermark = excluded.watermark";

/// Applies pulled changes to the session's engine.
///
/// All entries of one sync and the new watermark are written in a single
/// `BEGIN IMMEDIATE` transaction. Entries at or below the stored watermark
/// are skipped inside that transaction, so replaying a batch is harmless.
pub(crate) struct SessionApplier {
    session: Weak<SessionShared>,
    info: Option<ReplicaInfoFile>,
    client_id: Uuid,
}

impl SessionApplier {
    pub(crate) fn new(
        session: Weak<SessionShared>,
        info: Option<ReplicaInfoFile>,
        client_id: Uuid,
    ) -> Self {
        Self {
            session,
            info,
            client_id,
        }
    }

    fn mirror(&self, watermark: u64) {
        let Some(file) = &self.info else {
            return;
        };
        let info = ReplicaInfo {
            version: INFO_VERSION,
            watermark,
            client_id: self.client_id,
        };
        if let Err(e) = file.store(&info) {
            warn!(path = %file.path().display(), error = %e, "failed to mirror replica watermark");
        }
    }
}

fn stored_watermark(engine: &mut dyn Engine) -> CoreResult<u64> {
    let exists = engine.execute(STATE_TABLE_EXISTS, &[])?;
    let present = exists
        .rows
        .first()
        .and_then(|row| row.get(0))
        .and_then(Value::as_integer)
        .unwrap_or(0)
        > 0;
    if !present {
        return Ok(0);
    }
    let out = engine.execute(READ_WATERMARK, &[])?;
    Ok(out
        .rows
        .first()
        .and_then(|row| row.get(0))
        .and_then(Value::as_integer)
        .map_or(0, |w| w.max(0) as u64))
}

fn apply_in_transaction(
    engine: &mut dyn Engine,
    entries: &[ChangeEntry],
    new_watermark: u64,
) -> CoreResult<(u64, u64)> {
    engine.execute_batch(CREATE_STATE_TABLE)?;
    let current = stored_watermark(engine)?;

    let mut applied = 0u64;
    for entry in entries.iter().filter(|e| e.position > current) {
        engine.execute(&entry.statement, &entry.params)?;
        applied += 1;
    }

    let watermark = current.max(new_watermark);
    let stored = i64::try_from(watermark).unwrap_or(i64::MAX);
    engine.execute(WRITE_WATERMARK, &[Value::Integer(stored)])?;
    Ok((applied, watermark))
}

fn apply_error(err: impl std::fmt::Display) -> SyncError {
    SyncError::Apply(err.to_string())
}

impl SyncApplier for SessionApplier {
    fn local_watermark(&self) -> SyncResult<u64> {
        let session = self
            .session
            .upgrade()
            .ok_or_else(|| apply_error("session is closed"))?;
        let mut inner = session.lock();
        let engine = inner.engine().map_err(apply_error)?;
        stored_watermark(engine).map_err(apply_error)
    }

    fn apply_changes(&self, entries: &[ChangeEntry], new_watermark: u64) -> SyncResult<u64> {
        let session = self
            .session
            .upgrade()
            .ok_or_else(|| apply_error("session is closed"))?;

        let (applied, watermark) = {
            let mut inner = session.lock();
            let engine = inner.engine().map_err(apply_error)?;
            if !engine.is_autocommit() {
                return Err(SyncError::LocalTransactionOpen);
            }

            engine.begin(IsolationLevel::Immediate).map_err(apply_error)?;
            let result = apply_in_transaction(engine, entries, new_watermark)
                .and_then(|outcome| engine.commit().map(|()| outcome));
            match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    if !engine.is_autocommit() {
                        if let Err(rb) = engine.rollback() {
                            warn!(error = %rb, "rollback of failed apply failed");
                        }
                    }
                    return Err(apply_error(e));
                }
            }
        };

        debug!(applied, watermark, "changes applied");
        self.mirror(watermark);
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SqliteEngine;

    fn entry(position: u64, value: i64) -> ChangeEntry {
        ChangeEntry::with_params(position, "INSERT INTO t VALUES (?)", vec![Value::Integer(value)])
    }

    #[test]
    fn missing_state_table_means_watermark_zero() {
        let mut engine = SqliteEngine::open_in_memory().unwrap();
        assert_eq!(stored_watermark(&mut engine).unwrap(), 0);
    }

    #[test]
    fn entries_at_or_below_the_watermark_are_skipped() {
        let mut engine = SqliteEngine::open_in_memory().unwrap();
        engine.execute_batch("CREATE TABLE t (x)").unwrap();

        let batch = [entry(1, 10), entry(2, 20)];
        assert_eq!(apply_in_transaction(&mut engine, &batch, 2).unwrap(), (2, 2));

        let replay = [entry(2, 20), entry(3, 30)];
        assert_eq!(apply_in_transaction(&mut engine, &replay, 3).unwrap(), (1, 3));
        assert_eq!(stored_watermark(&mut engine).unwrap(), 3);

        let out = engine.execute("SELECT count(*) FROM t", &[]).unwrap();
        assert_eq!(out.rows[0][0], Value::Integer(3));
    }

    #[test]
    fn watermark_never_moves_backwards() {
        let mut engine = SqliteEngine::open_in_memory().unwrap();
        apply_in_transaction(&mut engine, &[], 5).unwrap();
        assert_eq!(apply_in_transaction(&mut engine, &[], 2).unwrap(), (0, 5));
    }
}
