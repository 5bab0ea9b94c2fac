use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedFormat {
    XmlFeed,
    JsonFeed,
}

/// Which entry URL is handed to the downloader.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaTarget {
    #[default]
    Link,
    Enclosure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub id: String,
    pub title: String,
    pub link: String,
    pub published: Option<DateTime<Utc>>,
    pub enclosure: Option<String>,
}

impl FeedEntry {
    /// Resolves the download target, falling back to the link when the
    /// entry carries no enclosure.
    pub fn media_url(&self, target: MediaTarget) -> &str {
        match (target, self.enclosure.as_deref()) {
            (MediaTarget::Enclosure, Some(enclosure)) if !enclosure.trim().is_empty() => enclosure,
            _ => &self.link,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFeed {
    pub format: FeedFormat,
    pub title: String,
    pub entries: Vec<FeedEntry>,
}
