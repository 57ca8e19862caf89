//! Leaderboard snapshot codec
//!
//! One leaderboard per file, as a human-readable JSON document: the decay
//! factor, the capacity setting, and the entries in rank order. JSON string
//! escaping covers embedded quotes and backslashes in user ids; fields may
//! appear in any order on load.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub user_id: String,
    pub score: f64,
    pub last_update: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDocument {
    pub decay_factor: f64,
    pub max_users: u64,
    pub entries: Vec<SnapshotEntry>,
}

impl SnapshotDocument {
    /// Serialize to `path`, pretty-printed for operator readability.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json =
            sonic_rs::to_string_pretty(self).map_err(|e| Error::SnapshotEncode(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Parse the document at `path`. I/O failures surface as `Error::Io`,
    /// malformed content as `Error::SnapshotParse`.
    pub fn read_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)?;
        sonic_rs::from_slice(&raw).map_err(|e| Error::SnapshotParse(e.to_string()))
    }
}
