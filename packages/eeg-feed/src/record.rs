// EEG record model
//
// Expected JSON shape (as served by both the snapshot endpoints and the stream):
// {
//   "id": 42,
//   "timestamp": 1700000000000,      // capture time, ms since Unix epoch
//   "channels": [0.1, 0.2, ...],     // fixed arity per session
//   "sessionId": "rec-2024-01-01"    // "session_id" is accepted too
// }

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, orderable record identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RecordId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Ordering key of a record: `(timestamp, id)` ascending
///
/// Field order matters, the derived `Ord` compares `timestamp` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub timestamp: i64,
    pub id: RecordId,
}

impl RecordKey {
    pub fn new(timestamp: i64, id: impl Into<RecordId>) -> Self {
        Self {
            timestamp,
            id: id.into(),
        }
    }
}

/// A single recorded observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EegRecord {
    pub id: RecordId,

    /// Capture time in milliseconds since the Unix epoch
    pub timestamp: i64,

    /// Sample values, one per channel
    pub channels: Vec<f64>,

    #[serde(rename = "sessionId", alias = "session_id", default)]
    pub session_id: String,
}

impl EegRecord {
    pub fn new(
        id: impl Into<RecordId>,
        timestamp: i64,
        channels: Vec<f64>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp,
            channels,
            session_id: session_id.into(),
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            timestamp: self.timestamp,
            id: self.id,
        }
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }
}

/// Sort records in place by `(timestamp, id)`
pub fn sort_by_key(records: &mut [EegRecord]) {
    records.sort_by_key(EegRecord::key);
}
