//! Session state deltas.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One key/value write in a session's append-only log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub key: String,
    pub value: String,
    pub timestamp: DateTime<Utc>,

    /// Position in the log; breaks ties between equal timestamps
    pub seq: u64,
}

impl Delta {
    /// Whether this delta supersedes `other` under last-write-wins
    pub fn supersedes(&self, other: &Delta) -> bool {
        (self.timestamp, self.seq) > (other.timestamp, other.seq)
    }
}
