//! Positioned change-log entries.

use crate::error::{ProtocolError, ProtocolResult};
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// One record of the primary's change log.
///
/// Entries are replayed on the replica by executing `statement` with
/// `params`. `position` is the entry's place in the log; positions are
/// strictly increasing and the replica's watermark is the position of the
/// last entry it applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEntry {
    /// Position in the primary's log.
    pub position: u64,
    /// SQL statement to replay.
    pub statement: String,
    /// Positional parameters for `statement`.
    pub params: Vec<Value>,
}

impl ChangeEntry {
    /// Creates an entry without parameters.
    pub fn new(position: u64, statement: impl Into<String>) -> Self {
        Self {
            position,
            statement: statement.into(),
            params: Vec::new(),
        }
    }

    /// Creates an entry with positional parameters.
    pub fn with_params(position: u64, statement: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            position,
            statement: statement.into(),
            params,
        }
    }
}

/// Validates a batch of entries pulled after `since`.
///
/// Positions must be strictly increasing and all greater than `since`;
/// `watermark` must cover the last entry.
pub fn check_order(entries: &[ChangeEntry], since: u64, watermark: u64) -> ProtocolResult<()> {
    let mut previous = since;
    for entry in entries {
        if entry.position <= previous {
            return Err(ProtocolError::OutOfOrder {
                position: entry.position,
                previous,
            });
        }
        previous = entry.position;
    }
    if watermark < previous {
        return Err(ProtocolError::WatermarkBehind {
            watermark,
            position: previous,
        });
    }
    Ok(())
}
