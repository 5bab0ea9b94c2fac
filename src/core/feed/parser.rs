use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use super::types::{FeedEntry, FeedFormat, ParsedFeed};

#[derive(Debug, thiserror::Error)]
pub enum FeedParseError {
    #[error("feed payload is empty")]
    EmptyPayload,
    #[error("xml feed parse error: {0}")]
    Xml(#[from] feed_rs::parser::ParseFeedError),
    #[error("json feed parse error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Deserialize)]
struct JsonFeed {
    title: Option<String>,
    #[serde(default)]
    items: Vec<JsonFeedItem>,
}

#[derive(Debug, Clone, Deserialize)]
struct JsonFeedItem {
    id: Option<String>,
    title: Option<String>,
    url: Option<String>,
    date_published: Option<String>,
    date_modified: Option<String>,
    #[serde(default)]
    attachments: Vec<JsonFeedAttachment>,
}

#[derive(Debug, Clone, Deserialize)]
struct JsonFeedAttachment {
    url: String,
}

pub fn parse_feed_bytes(raw: &[u8]) -> Result<ParsedFeed, FeedParseError> {
    let trimmed = raw.trim_ascii_start();
    if trimmed.is_empty() {
        return Err(FeedParseError::EmptyPayload);
    }
    if trimmed[0] == b'{' {
        return parse_json_feed(trimmed);
    }
    parse_xml_feed(trimmed)
}

/// Stable identifier for an entry: the feed-provided id, then the link,
/// then a digest of title and timestamp.
pub fn entry_id(id: &str, link: &str, title: &str, published: Option<&DateTime<Utc>>) -> String {
    if !id.trim().is_empty() {
        return id.trim().to_string();
    }
    if !link.trim().is_empty() {
        return link.trim().to_string();
    }
    let mut hasher = Sha256::new();
    hasher.update(title.trim().as_bytes());
    hasher.update(b"::");
    if let Some(timestamp) = published {
        hasher.update(timestamp.to_rfc3339().as_bytes());
    }
    let bytes = hasher.finalize();
    format!("sha256:{bytes:x}")
}

fn parse_xml_feed(raw: &[u8]) -> Result<ParsedFeed, FeedParseError> {
    let feed = feed_rs::parser::parse(raw)?;
    let title = feed
        .title
        .as_ref()
        .map(|text| text.content.clone())
        .unwrap_or_else(|| "Untitled Feed".to_string());
    let entries = feed.entries.iter().map(entry_from_xml).collect();

    Ok(ParsedFeed {
        format: FeedFormat::XmlFeed,
        title,
        entries,
    })
}

fn parse_json_feed(raw: &[u8]) -> Result<ParsedFeed, FeedParseError> {
    let feed: JsonFeed = serde_json::from_slice(raw)?;
    let title = feed.title.unwrap_or_else(|| "Untitled Feed".to_string());
    let entries = feed
        .items
        .into_iter()
        .map(|item| {
            let published = item
                .date_published
                .as_deref()
                .or(item.date_modified.as_deref())
                .and_then(parse_rfc3339);
            let title = item.title.unwrap_or_default();
            let link = item.url.unwrap_or_default();
            FeedEntry {
                id: entry_id(
                    item.id.as_deref().unwrap_or_default(),
                    &link,
                    &title,
                    published.as_ref(),
                ),
                enclosure: item.attachments.into_iter().next().map(|a| a.url),
                title,
                link,
                published,
            }
        })
        .collect();

    Ok(ParsedFeed {
        format: FeedFormat::JsonFeed,
        title,
        entries,
    })
}

fn entry_from_xml(entry: &Entry) -> FeedEntry {
    let title = entry
        .title
        .as_ref()
        .map(|text| text.content.clone())
        .unwrap_or_default();
    let link = entry
        .links
        .first()
        .map(|entry_link| entry_link.href.clone())
        .unwrap_or_default();
    let published = entry.published.or(entry.updated);
    let enclosure = entry
        .media
        .iter()
        .flat_map(|media| media.content.iter())
        .find_map(|content| content.url.as_ref().map(ToString::to_string));

    FeedEntry {
        id: entry_id(&entry.id, &link, &title, published.as_ref()),
        title,
        link,
        published,
        enclosure,
    }
}

fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|timestamp| timestamp.with_timezone(&Utc))
}
