//! Persisted replica metadata.
//!
//! A replica keeps a small JSON record next to its database file
//! (`<database>-info`) holding the last applied watermark and the replica's
//! client id. The authoritative watermark lives inside the database and is
//! written in the same transaction as the applied changes; this record
//! mirrors it so the replica can identify itself before opening a
//! transaction.

use crate::error::SyncResult;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Current format version of the info record.
pub const INFO_VERSION: u32 = 1;

/// Replica metadata persisted next to the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaInfo {
    /// Record format version.
    pub version: u32,
    /// Last applied remote log position.
    pub watermark: u64,
    /// Replica identity sent in the handshake.
    pub client_id: Uuid,
}

impl ReplicaInfo {
    /// Creates a fresh record with a random client id and watermark 0.
    pub fn fresh() -> Self {
        Self {
            version: INFO_VERSION,
            watermark: 0,
            client_id: Uuid::new_v4(),
        }
    }
}

/// Location of a replica info record.
#[derive(Debug, Clone)]
pub struct ReplicaInfoFile {
    path: PathBuf,
}

impl ReplicaInfoFile {
    /// Info record for the database at `database`.
    pub fn for_database(database: impl AsRef<Path>) -> Self {
        let mut name = database.as_ref().as_os_str().to_os_string();
        name.push("-info");
        Self {
            path: PathBuf::from(name),
        }
    }

    /// Path of the record.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the record, `None` if it does not exist yet.
    pub fn load(&self) -> SyncResult<Option<ReplicaInfo>> {
        match fs::read(&self.path) {
            Ok(bytes) => {
                let info = serde_json::from_slice(&bytes).map_err(|e| {
                    std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
                })?;
                Ok(Some(info))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Loads the record or creates and stores a fresh one.
    pub fn load_or_create(&self) -> SyncResult<ReplicaInfo> {
        if let Some(info) = self.load()? {
            return Ok(info);
        }
        let info = ReplicaInfo::fresh();
        self.store(&info)?;
        Ok(info)
    }

    /// Atomically replaces the record (temp file, fsync, rename).
    pub fn store(&self, info: &ReplicaInfo) -> SyncResult<()> {
        let bytes = serde_json::to_vec_pretty(info)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

        let mut tmp_name = self.path.as_os_str().to_os_string();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);

        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
