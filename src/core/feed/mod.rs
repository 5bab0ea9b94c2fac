pub mod fetcher;
pub mod parser;
pub mod types;

use url::Url;

use fetcher::{fetch_feed, FetchError};
use parser::{parse_feed_bytes, FeedParseError};
use types::ParsedFeed;

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] FeedParseError),
}

/// Fetches `url` and parses the payload into entries, in feed order.
pub async fn fetch_entries(client: &reqwest::Client, url: &Url) -> Result<ParsedFeed, FeedError> {
    let fetched = fetch_feed(client, url).await?;
    tracing::debug!(
        feed = %url,
        bytes = fetched.body.len(),
        content_type = fetched.content_type.as_deref().unwrap_or("unknown"),
        "fetched feed"
    );
    Ok(parse_feed_bytes(&fetched.body)?)
}
