//! Embedded replicas syncing from an in-process primary.

use replisql_core::{
    connect, params, AutocommitMode, ConnectOptions, CoreError, ErrorKind, Session, Value,
    REPLICA_STATE_TABLE,
};
use replisql_sync_engine::{ReplicaInfoFile, SyncError};
use replisql_testkit::{init_tracing, replica_session, InMemoryPrimary, TestDatabase, PRIMARY_URL};
use std::sync::Arc;

const TOKEN: &str = "secret-token";

fn seeded_primary() -> Arc<InMemoryPrimary> {
    let primary = InMemoryPrimary::with_token(TOKEN);
    primary.append("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)", vec![]);
    primary.append("INSERT INTO users (name) VALUES (?)", params!["alice"]);
    primary.append("INSERT INTO users (name) VALUES (?)", params!["bob"]);
    primary
}

fn names(session: &Session) -> Vec<String> {
    session
        .execute("SELECT name FROM users ORDER BY id", &[])
        .unwrap()
        .fetchall()
        .unwrap()
        .into_iter()
        .map(|row| row[0].as_text().unwrap().to_string())
        .collect()
}

#[test]
fn sync_applies_the_primary_log() {
    init_tracing();
    let primary = seeded_primary();
    let db = TestDatabase::new();
    let session = db.open_replica(&primary, TOKEN);
    assert!(session.is_replica());
    assert_eq!(session.watermark(), Some(0));
    assert_eq!(primary.handshake_count(), 0, "file replicas connect offline");

    assert_eq!(session.sync().unwrap(), 3);
    assert_eq!(session.watermark(), Some(3));
    assert_eq!(names(&session), vec!["alice", "bob"]);

    let stats = session.sync_stats().unwrap();
    assert_eq!(stats.syncs_completed, 1);
    assert_eq!(stats.entries_applied, 3);
    assert!(stats.last_error.is_none());

    let info = ReplicaInfoFile::for_database(db.path()).load().unwrap().unwrap();
    assert_eq!(info.watermark, 3);
}

#[test]
fn repeated_sync_without_changes_is_a_no_op() {
    let primary = seeded_primary();
    let db = TestDatabase::new();
    let session = db.open_replica(&primary, TOKEN);
    session.sync().unwrap();
    assert_eq!(session.sync().unwrap(), 3);
    assert_eq!(session.sync().unwrap(), 3);
    assert_eq!(names(&session), vec!["alice", "bob"]);
    assert_eq!(session.sync_stats().unwrap().entries_applied, 3);
}

#[test]
fn incremental_sync_pages_through_new_entries() {
    let primary = seeded_primary();
    let db = TestDatabase::new();
    let session = replica_session(&db.replica_options(TOKEN).pull_batch_size(2), &primary, TOKEN)
        .unwrap();
    session.sync().unwrap();

    for name in ["carol", "dave", "erin"] {
        primary.append("INSERT INTO users (name) VALUES (?)", params![name]);
    }
    let pulls_before = primary.pull_count();
    assert_eq!(session.sync().unwrap(), 6);
    assert_eq!(primary.pull_count() - pulls_before, 2);
    assert_eq!(names(&session), vec!["alice", "bob", "carol", "dave", "erin"]);
}

#[test]
fn sync_with_uncommitted_writes_is_a_conflict() {
    let primary = seeded_primary();
    let db = TestDatabase::new();
    let session = db.open_replica(&primary, TOKEN);
    session.sync().unwrap();

    session
        .execute("INSERT INTO users (name) VALUES ('local')", &[])
        .unwrap();
    assert!(session.in_transaction());
    let err = session.sync().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(session.in_transaction(), "local work is left untouched");

    session.commit().unwrap();
    primary.append("INSERT INTO users (name) VALUES ('remote')", vec![]);
    assert_eq!(session.sync().unwrap(), 4);
    assert_eq!(names(&session), vec!["alice", "bob", "local", "remote"]);
}

#[test]
fn disabled_mode_sync_reopens_the_transaction() {
    let primary = seeded_primary();
    let db = TestDatabase::new();
    let options = db.replica_options(TOKEN).autocommit(AutocommitMode::Disabled);
    let session = replica_session(&options, &primary, TOKEN).unwrap();
    assert!(session.in_transaction());

    assert_eq!(session.sync().unwrap(), 3);
    assert!(session.in_transaction());
    assert_eq!(names(&session), vec!["alice", "bob"]);

    session
        .execute("INSERT INTO users (name) VALUES ('pending')", &[])
        .unwrap();
    assert_eq!(session.sync().unwrap_err().kind(), ErrorKind::Conflict);
}

#[test]
fn unavailable_primary_changes_nothing() {
    let primary = seeded_primary();
    let db = TestDatabase::new();
    let session = db.open_replica(&primary, TOKEN);
    session.sync().unwrap();

    primary.append("INSERT INTO users (name) VALUES ('late')", vec![]);
    primary.set_unavailable(true);
    let err = session.sync().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Sync);
    assert!(matches!(err, CoreError::Sync(SyncError::ServerError(_))));
    assert_eq!(session.watermark(), Some(3));
    assert_eq!(names(&session), vec!["alice", "bob"]);

    let stats = session.sync_stats().unwrap();
    assert_eq!(stats.syncs_failed, 1);
    assert!(stats.last_error.is_some());

    primary.set_unavailable(false);
    assert_eq!(session.sync().unwrap(), 4);
    assert_eq!(names(&session), vec!["alice", "bob", "late"]);
}

#[test]
fn failed_apply_is_atomic() {
    let primary = seeded_primary();
    let db = TestDatabase::new();
    let session = db.open_replica(&primary, TOKEN);
    session.sync().unwrap();

    primary.append("INSERT INTO users (name) VALUES ('good')", vec![]);
    primary.append("INSERT INTO missing VALUES (1)", vec![]);
    let err = session.sync().unwrap_err();
    assert!(matches!(err, CoreError::Sync(SyncError::Apply(_))));
    assert_eq!(session.watermark(), Some(3));
    assert_eq!(names(&session), vec!["alice", "bob"]);
    assert!(!session.in_transaction());

    let info = ReplicaInfoFile::for_database(db.path()).load().unwrap().unwrap();
    assert_eq!(info.watermark, 3);
}

#[test]
fn wrong_token_is_an_authentication_failure() {
    let primary = seeded_primary();
    let db = TestDatabase::new();
    let session = db.open_replica(&primary, "wrong");
    let err = session.sync().unwrap_err();
    assert!(matches!(err, CoreError::Sync(SyncError::AuthenticationFailed(_))));
    assert_eq!(session.watermark(), Some(0));
}

#[test]
fn watermark_and_identity_survive_reopen() {
    let primary = seeded_primary();
    let db = TestDatabase::new();
    let client_id = {
        let session = db.open_replica(&primary, TOKEN);
        session.sync().unwrap();
        session
            .execute("INSERT INTO users (name) VALUES ('local')", &[])
            .unwrap();
        session.commit().unwrap();
        ReplicaInfoFile::for_database(db.path()).load().unwrap().unwrap().client_id
    };

    let session = db.open_replica(&primary, TOKEN);
    assert_eq!(session.watermark(), Some(3));
    assert_eq!(session.sync().unwrap(), 3);
    assert_eq!(names(&session), vec!["alice", "bob", "local"]);
    let info = ReplicaInfoFile::for_database(db.path()).load().unwrap().unwrap();
    assert_eq!(info.client_id, client_id);
}

#[test]
fn watermark_is_stored_in_the_database() {
    let primary = seeded_primary();
    let db = TestDatabase::new();
    {
        let session = db.open_replica(&primary, TOKEN);
        session.sync().unwrap();
    }
    std::fs::remove_file(db.info_path()).unwrap();

    let session = db.open(ConnectOptions::default());
    let row = session
        .execute(&format!("SELECT watermark FROM {REPLICA_STATE_TABLE}"), &[])
        .unwrap()
        .fetchone()
        .unwrap()
        .unwrap();
    assert_eq!(row[0], Value::Integer(3));
    drop(session);

    let replica = db.open_replica(&primary, TOKEN);
    assert_eq!(replica.watermark(), Some(3));
}

#[test]
fn primary_behind_the_replica_is_rejected() {
    let db = TestDatabase::new();
    {
        let session = db.open_replica(&seeded_primary(), TOKEN);
        session.sync().unwrap();
    }

    let other = InMemoryPrimary::with_token(TOKEN);
    other.append("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)", vec![]);
    let session = db.open_replica(&other, TOKEN);
    let err = session.sync().unwrap_err();
    assert!(matches!(
        err,
        CoreError::Sync(SyncError::WatermarkRegressed { local: 3, remote: 1 })
    ));
    assert_eq!(session.watermark(), Some(3));
}

#[test]
fn remote_database_syncs_at_connect() {
    let primary = seeded_primary();
    let options = ConnectOptions::new(PRIMARY_URL).auth_token(TOKEN);
    let session = replica_session(&options, &primary, TOKEN).unwrap();
    assert!(session.is_replica());
    assert_eq!(session.watermark(), Some(3));
    assert_eq!(names(&session), vec!["alice", "bob"]);
    assert_eq!(primary.handshake_count(), 1);
}

#[test]
fn remote_database_with_bad_credentials_fails_to_connect() {
    let primary = seeded_primary();
    let options = ConnectOptions::new(PRIMARY_URL).auth_token("wrong");
    let err = replica_session(&options, &primary, "wrong").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);

    primary.set_unavailable(true);
    let err = replica_session(&options, &primary, TOKEN).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
}

#[test]
fn file_replica_connects_offline_over_http() {
    let db = TestDatabase::new();
    // nothing listens on the discard port
    let session = connect(db.options().sync_url("http://127.0.0.1:9").auth_token(TOKEN)).unwrap();
    assert!(session.is_replica());
    session.execute("CREATE TABLE notes (x)", &[]).unwrap();
    session.commit().unwrap();

    let err = session.sync().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Sync);
    assert_eq!(session.watermark(), Some(0));
    assert!(db.info_path().exists());
}

#[test]
fn closed_replica_rejects_sync() {
    let primary = seeded_primary();
    let db = TestDatabase::new();
    let session = db.open_replica(&primary, TOKEN);
    session.close().unwrap();
    assert_eq!(session.sync().unwrap_err().kind(), ErrorKind::Interface);
    assert!(session.watermark().is_some());
}
