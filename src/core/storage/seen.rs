use std::collections::{BTreeMap, HashSet};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;

use super::models::{SeenMark, SeenRecord, STATE_VERSION};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("state file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("state file {path} has unsupported version {version}")]
    UnsupportedVersion { path: PathBuf, version: u32 },
    #[error("state file io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode state: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Corrupt or unreadable-by-design state can be discarded; plain io
    /// failures cannot.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Corrupt { .. } | Self::UnsupportedVersion { .. })
    }
}

/// Per-feed record of entry ids that were already downloaded.
#[derive(Debug, Clone)]
pub struct SeenStore {
    path: PathBuf,
    record: SeenRecord,
}

impl SeenStore {
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            record: SeenRecord::default(),
        }
    }

    /// Reads the state file; a missing file is a first run.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no state file yet, starting empty");
                return Ok(Self::empty(path));
            }
            Err(error) => return Err(StoreError::io(&path, error)),
        };

        let record: SeenRecord = match serde_json::from_slice(&raw) {
            Ok(record) => record,
            Err(source) => return Err(StoreError::Corrupt { path, source }),
        };
        if record.version != STATE_VERSION {
            return Err(StoreError::UnsupportedVersion {
                path,
                version: record.version,
            });
        }

        Ok(Self { path, record })
    }

    /// Like [`SeenStore::load`], but replaces a corrupt file with an empty
    /// store instead of failing.
    pub fn load_or_reset(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        match Self::load(path.clone()) {
            Err(error) if error.is_recoverable() => {
                tracing::warn!(%error, "discarding unreadable state, every entry is treated as new");
                Ok(Self::empty(path))
            }
            other => other,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_seen(&self, feed_url: &str, entry_id: &str) -> bool {
        self.record
            .feeds
            .get(feed_url)
            .is_some_and(|ids| ids.contains_key(entry_id))
    }

    /// Returns `true` when the id was not recorded before.
    pub fn mark_seen(&mut self, feed_url: &str, entry_id: &str) -> bool {
        self.mark_seen_at(feed_url, entry_id, None, Utc::now())
    }

    /// Records a download together with the entry's own timestamp, which
    /// later decides when the id may be pruned. An existing mark is kept.
    pub fn mark_seen_at(
        &mut self,
        feed_url: &str,
        entry_id: &str,
        published: Option<DateTime<Utc>>,
        seen_at: DateTime<Utc>,
    ) -> bool {
        let ids = self.record.feeds.entry(feed_url.to_string()).or_default();
        if ids.contains_key(entry_id) {
            return false;
        }
        ids.insert(entry_id.to_string(), SeenMark { seen_at, published });
        true
    }

    pub fn mark(&self, feed_url: &str, entry_id: &str) -> Option<&SeenMark> {
        self.record.feeds.get(feed_url)?.get(entry_id)
    }

    /// Drops ids of `feed_url` that are missing from `current` and whose
    /// timestamp (published, else seen) is older than `cutoff`. Entries
    /// still inside the age window stay remembered even when a fetch comes
    /// back empty or truncated. Returns how many were removed.
    pub fn prune<'a>(
        &mut self,
        feed_url: &str,
        current: impl IntoIterator<Item = &'a str>,
        cutoff: Option<DateTime<Utc>>,
    ) -> usize {
        let Some(cutoff) = cutoff else {
            return 0;
        };
        let Some(ids) = self.record.feeds.get_mut(feed_url) else {
            return 0;
        };
        let current: HashSet<&str> = current.into_iter().collect();
        let before = ids.len();
        ids.retain(|id, mark| current.contains(id.as_str()) || mark.age_reference() >= cutoff);
        before - ids.len()
    }

    /// Forgets feeds that are no longer configured. Returns how many ids
    /// went with them.
    pub fn retain_feeds<'a>(&mut self, feed_urls: impl IntoIterator<Item = &'a str>) -> usize {
        let keep: HashSet<&str> = feed_urls.into_iter().collect();
        let before = self.len();
        self.record.feeds.retain(|feed, _| keep.contains(feed.as_str()));
        before - self.len()
    }

    pub fn feed_count(&self) -> usize {
        self.record.feeds.len()
    }

    pub fn len(&self) -> usize {
        self.record.feeds.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.record
            .feeds
            .iter()
            .flat_map(|(feed, ids)| ids.keys().map(move |id| (feed.as_str(), id.as_str())))
    }

    /// Writes the state through a temporary file in the same directory and
    /// renames it over the previous state, so a failed write leaves the old
    /// file intact.
    pub fn save(&self) -> Result<(), StoreError> {
        let encoded = serde_json::to_vec_pretty(&self.record)?;
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut staged =
            NamedTempFile::new_in(&parent).map_err(|error| StoreError::io(&parent, error))?;
        staged
            .write_all(&encoded)
            .and_then(|()| staged.as_file().sync_all())
            .map_err(|error| StoreError::io(staged.path(), error))?;
        staged
            .persist(&self.path)
            .map_err(|error| StoreError::io(&self.path, error.error))?;

        tracing::debug!(
            path = %self.path.display(),
            feeds = self.feed_count(),
            entries = self.len(),
            "saved state"
        );
        Ok(())
    }
}
