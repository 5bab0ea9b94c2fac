use url::Url;

#[derive(Debug, Clone)]
pub struct FetchedFeed {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected status code: {0}")]
    HttpStatus(u16),
    #[error("failed to read local feed: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a local file path: {0}")]
    InvalidPath(String),
    #[error("unsupported url scheme: {0}")]
    UnsupportedScheme(String),
}

pub fn build_client() -> Result<reqwest::Client, FetchError> {
    let client = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

/// Retrieves the raw feed document. One attempt per call; the next
/// scheduled run is the retry.
pub async fn fetch_feed(client: &reqwest::Client, url: &Url) -> Result<FetchedFeed, FetchError> {
    match url.scheme() {
        "http" | "https" => fetch_remote(client, url).await,
        "file" => fetch_local(url).await,
        other => Err(FetchError::UnsupportedScheme(other.to_string())),
    }
}

async fn fetch_remote(client: &reqwest::Client, url: &Url) -> Result<FetchedFeed, FetchError> {
    let response = client.get(url.clone()).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::HttpStatus(status.as_u16()));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string);
    let body = response.bytes().await?.to_vec();

    Ok(FetchedFeed { body, content_type })
}

async fn fetch_local(url: &Url) -> Result<FetchedFeed, FetchError> {
    let path = url
        .to_file_path()
        .map_err(|()| FetchError::InvalidPath(url.to_string()))?;
    let body = tokio::fs::read(&path).await?;
    Ok(FetchedFeed {
        body,
        content_type: None,
    })
}
