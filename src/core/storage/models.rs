use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const STATE_VERSION: u32 = 1;

/// When an entry was downloaded, and the timestamp the feed gave it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeenMark {
    pub seen_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,
}

impl SeenMark {
    /// Time that decides whether the entry is still inside the age window.
    pub fn age_reference(&self) -> DateTime<Utc> {
        self.published.unwrap_or(self.seen_at)
    }
}

/// On-disk shape of the seen-entry state file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeenRecord {
    pub version: u32,
    #[serde(default)]
    pub feeds: BTreeMap<String, BTreeMap<String, SeenMark>>,
}

impl Default for SeenRecord {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            feeds: BTreeMap::new(),
        }
    }
}
