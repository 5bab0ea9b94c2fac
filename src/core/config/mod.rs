use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use url::Url;

use crate::core::downloader::{CommandDownloader, Downloader};
use crate::core::feed::types::MediaTarget;
use crate::core::selector::{AgeLimit, TitlePattern};
use crate::core::storage::DEFAULT_STATE_FILE;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings file {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("download directory {0} does not exist or is not a directory")]
    Directory(PathBuf),
    #[error("feed url {url:?} is invalid: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("feed url {0} must use http, https or file")]
    UnsupportedScheme(String),
    #[error("regex {pattern:?} of feed {url} does not compile: {source}")]
    InvalidPattern {
        url: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("downloader of feed {0} is empty")]
    EmptyDownloader(String),
}

#[derive(Debug, Clone, Deserialize)]
struct SettingsFile {
    directory: PathBuf,
    maxage: u32,
    feeds: Vec<FeedSettings>,
    #[serde(default)]
    state_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
struct FeedSettings {
    url: String,
    regex: String,
    downloader: String,
    #[serde(default)]
    target: MediaTarget,
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub url: Url,
    pub pattern: TitlePattern,
    pub target: MediaTarget,
    pub downloader: Arc<dyn Downloader>,
}

impl FeedConfig {
    pub fn new(
        url: Url,
        pattern: TitlePattern,
        target: MediaTarget,
        downloader: Arc<dyn Downloader>,
    ) -> Self {
        Self {
            url,
            pattern,
            target,
            downloader,
        }
    }

    /// Key under which the feed's seen ids are stored.
    pub fn key(&self) -> &str {
        self.url.as_str()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub directory: PathBuf,
    pub age_limit: AgeLimit,
    pub state_file: PathBuf,
    pub feeds: Vec<FeedConfig>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_slice(path, &raw)
    }

    fn from_slice(path: &Path, raw: &[u8]) -> Result<Self, ConfigError> {
        let settings: SettingsFile =
            serde_json::from_slice(raw).map_err(|source| ConfigError::Malformed {
                path: path.to_path_buf(),
                source,
            })?;
        Self::validate(settings)
    }

    fn validate(settings: SettingsFile) -> Result<Self, ConfigError> {
        if !settings.directory.is_dir() {
            return Err(ConfigError::Directory(settings.directory));
        }
        // Downloaders run inside the directory and may also receive it as
        // `{dir}`, which only agree when the path is absolute.
        let directory = std::fs::canonicalize(&settings.directory)
            .map_err(|_| ConfigError::Directory(settings.directory.clone()))?;

        let feeds = settings
            .feeds
            .into_iter()
            .map(validate_feed)
            .collect::<Result<Vec<_>, _>>()?;
        if feeds.is_empty() {
            tracing::warn!("no feeds configured, nothing will be downloaded");
        }

        let state_file = settings
            .state_file
            .unwrap_or_else(|| directory.join(DEFAULT_STATE_FILE));

        Ok(Self {
            directory,
            age_limit: AgeLimit::days(settings.maxage),
            state_file,
            feeds,
        })
    }
}

fn validate_feed(feed: FeedSettings) -> Result<FeedConfig, ConfigError> {
    let url = Url::parse(feed.url.trim()).map_err(|source| ConfigError::InvalidUrl {
        url: feed.url.clone(),
        source,
    })?;
    if !matches!(url.scheme(), "http" | "https" | "file") {
        return Err(ConfigError::UnsupportedScheme(url.to_string()));
    }

    let pattern = TitlePattern::new(&feed.regex).map_err(|source| ConfigError::InvalidPattern {
        url: url.to_string(),
        pattern: feed.regex.clone(),
        source,
    })?;
    let downloader = CommandDownloader::from_template(&feed.downloader)
        .map_err(|_| ConfigError::EmptyDownloader(url.to_string()))?;

    Ok(FeedConfig::new(url, pattern, feed.target, Arc::new(downloader)))
}
