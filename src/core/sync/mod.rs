use std::fmt;
use std::path::Path;

use chrono::Utc;

use crate::core::config::{Config, ConfigError, FeedConfig};
use crate::core::feed::fetch_entries;
use crate::core::feed::fetcher::{build_client, FetchError};
use crate::core::selector::select_entries;
use crate::core::storage::{SeenStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    ConfigLoaded,
    StoreLoaded,
    Fetching,
    Selecting,
    Dispatching,
    StoreSaved,
    Done,
    Aborted,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::ConfigLoaded => "config_loaded",
            Self::StoreLoaded => "store_loaded",
            Self::Fetching => "fetching",
            Self::Selecting => "selecting",
            Self::Dispatching => "dispatching",
            Self::StoreSaved => "store_saved",
            Self::Done => "done",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("cannot build http client: {0}")]
    Client(#[from] FetchError),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Select and report entries without downloading or touching state.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub feeds_processed: usize,
    pub feeds_failed: usize,
    pub entries_selected: usize,
    pub entries_downloaded: usize,
    pub downloads_failed: usize,
    pub ids_pruned: usize,
    pub feeds_forgotten: usize,
}

/// One pass over every configured feed: fetch, select, download, then a
/// single save of the seen state at the end.
#[derive(Debug)]
pub struct Runner {
    phase: RunPhase,
    options: RunOptions,
}

impl Runner {
    pub fn new(options: RunOptions) -> Self {
        Self {
            phase: RunPhase::Idle,
            options,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    fn advance(&mut self, next: RunPhase) {
        tracing::debug!(from = %self.phase, to = %next, "run phase");
        self.phase = next;
    }

    fn abort<E: Into<RunError>>(&mut self, error: E) -> RunError {
        self.advance(RunPhase::Aborted);
        error.into()
    }

    pub async fn run_path(&mut self, config_path: &Path) -> Result<RunSummary, RunError> {
        let config = match Config::load(config_path) {
            Ok(config) => config,
            Err(error) => return Err(self.abort(error)),
        };
        tracing::info!(
            path = %config_path.display(),
            feeds = config.feeds.len(),
            "loaded settings"
        );
        self.run(&config).await
    }

    pub async fn run(&mut self, config: &Config) -> Result<RunSummary, RunError> {
        if self.phase == RunPhase::Idle {
            self.advance(RunPhase::ConfigLoaded);
        }

        let client = match build_client() {
            Ok(client) => client,
            Err(error) => return Err(self.abort(error)),
        };
        let mut store = match SeenStore::load_or_reset(&config.state_file) {
            Ok(store) => store,
            Err(error) => return Err(self.abort(error)),
        };
        self.advance(RunPhase::StoreLoaded);

        let mut summary = RunSummary::default();
        for feed in &config.feeds {
            self.process_feed(&client, config, feed, &mut store, &mut summary)
                .await;
        }

        if self.options.dry_run {
            tracing::info!("dry run, state left untouched");
        } else {
            let before = store.feed_count();
            let dropped = store.retain_feeds(config.feeds.iter().map(FeedConfig::key));
            summary.feeds_forgotten = before - store.feed_count();
            if summary.feeds_forgotten > 0 {
                tracing::info!(
                    feeds = summary.feeds_forgotten,
                    entries = dropped,
                    "forgot state of feeds no longer configured"
                );
            }
            if let Err(error) = store.save() {
                return Err(self.abort(error));
            }
            self.advance(RunPhase::StoreSaved);
        }
        self.advance(RunPhase::Done);

        tracing::info!(
            feeds_processed = summary.feeds_processed,
            feeds_failed = summary.feeds_failed,
            entries_selected = summary.entries_selected,
            entries_downloaded = summary.entries_downloaded,
            downloads_failed = summary.downloads_failed,
            "run finished"
        );
        Ok(summary)
    }

    async fn process_feed(
        &mut self,
        client: &reqwest::Client,
        config: &Config,
        feed: &FeedConfig,
        store: &mut SeenStore,
        summary: &mut RunSummary,
    ) {
        self.advance(RunPhase::Fetching);
        let parsed = match fetch_entries(client, &feed.url).await {
            Ok(parsed) => parsed,
            Err(error) => {
                tracing::warn!(feed = %feed.url, %error, "skipping feed");
                summary.feeds_failed += 1;
                return;
            }
        };

        self.advance(RunPhase::Selecting);
        let now = Utc::now();
        if !self.options.dry_run {
            summary.ids_pruned += store.prune(
                feed.key(),
                parsed.entries.iter().map(|entry| entry.id.as_str()),
                config.age_limit.cutoff(now),
            );
        }
        let selection = select_entries(
            feed.key(),
            &parsed.entries,
            &feed.pattern,
            config.age_limit,
            store,
            now,
        );
        tracing::info!(
            feed = %feed.url,
            title = %parsed.title,
            entries = selection.stats.considered,
            selected = selection.entries.len(),
            too_old = selection.stats.too_old,
            already_seen = selection.stats.already_seen,
            unmatched = selection.stats.unmatched,
            "checked feed"
        );
        summary.entries_selected += selection.entries.len();

        self.advance(RunPhase::Dispatching);
        for entry in selection.entries {
            let media_url = entry.media_url(feed.target);
            if self.options.dry_run {
                tracing::info!(entry = %entry.id, title = %entry.title, url = media_url, "would download");
                continue;
            }

            tracing::info!(
                entry = %entry.id,
                title = %entry.title,
                url = media_url,
                downloader = feed.downloader.name(),
                "downloading"
            );
            match feed.downloader.execute(media_url, &config.directory).await {
                Ok(()) => {
                    store.mark_seen_at(feed.key(), &entry.id, entry.published, Utc::now());
                    summary.entries_downloaded += 1;
                }
                Err(error) => {
                    tracing::error!(entry = %entry.id, url = media_url, %error, "download failed, will retry next run");
                    summary.downloads_failed += 1;
                }
            }
        }
        summary.feeds_processed += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::downloader::{DownloadError, Downloader};
    use crate::core::feed::types::MediaTarget;
    use crate::core::selector::{AgeLimit, TitlePattern};
    use async_trait::async_trait;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::Router;
    use chrono::TimeDelta;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use url::Url;

    #[derive(Debug, Default)]
    struct RecordingDownloader {
        fail: bool,
        calls: Mutex<Vec<(String, PathBuf)>>,
    }

    impl RecordingDownloader {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn urls(&self) -> Vec<String> {
            self.calls
                .lock()
                .expect("calls lock")
                .iter()
                .map(|(url, _)| url.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Downloader for RecordingDownloader {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn execute(&self, url: &str, target_dir: &Path) -> Result<(), DownloadError> {
            self.calls
                .lock()
                .expect("calls lock")
                .push((url.to_string(), target_dir.to_path_buf()));
            if self.fail {
                return Err(DownloadError::Spawn {
                    program: "recorder".to_string(),
                    source: std::io::Error::other("simulated failure"),
                });
            }
            Ok(())
        }
    }

    struct Item<'a> {
        id: &'a str,
        title: &'a str,
        days_old: Option<i64>,
        enclosure: Option<&'a str>,
    }

    fn item<'a>(id: &'a str, title: &'a str, days_old: i64) -> Item<'a> {
        Item {
            id,
            title,
            days_old: Some(days_old),
            enclosure: None,
        }
    }

    fn rss(items: &[Item<'_>]) -> String {
        let body: String = items
            .iter()
            .map(|item| {
                let date = item
                    .days_old
                    .map(|days| {
                        format!(
                            "<pubDate>{}</pubDate>",
                            (Utc::now() - TimeDelta::days(days)).to_rfc2822()
                        )
                    })
                    .unwrap_or_default();
                let enclosure = item
                    .enclosure
                    .map(|url| format!(r#"<enclosure url="{url}" length="1" type="audio/mpeg"/>"#))
                    .unwrap_or_default();
                format!(
                    "<item><title>{}</title><link>https://media.example.com/{}</link><guid isPermaLink=\"false\">{}</guid>{date}{enclosure}</item>",
                    item.title, item.id, item.id
                )
            })
            .collect();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><rss version="2.0"><channel><title>Test Feed</title><link>https://media.example.com/</link><description>test</description>{body}</channel></rss>"#
        )
    }

    struct Workspace {
        dir: tempfile::TempDir,
    }

    impl Workspace {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().expect("tempdir should exist"),
            }
        }

        fn feed_url(&self, name: &str, content: &str) -> Url {
            let path = self.dir.path().join(name);
            std::fs::write(&path, content).expect("feed should write");
            Url::from_file_path(&path).expect("path should convert")
        }

        fn state_file(&self) -> PathBuf {
            self.dir.path().join("state.json")
        }

        fn config(&self, max_age_days: u32, feeds: Vec<FeedConfig>) -> Config {
            Config {
                directory: self.dir.path().to_path_buf(),
                age_limit: AgeLimit::days(max_age_days),
                state_file: self.state_file(),
                feeds,
            }
        }
    }

    fn feed(url: Url, pattern: &str, downloader: Arc<RecordingDownloader>) -> FeedConfig {
        FeedConfig::new(
            url,
            TitlePattern::new(pattern).expect("pattern should compile"),
            MediaTarget::Link,
            downloader,
        )
    }

    async fn run_once(config: &Config) -> RunSummary {
        let mut runner = Runner::new(RunOptions::default());
        let summary = runner.run(config).await.expect("run should succeed");
        assert_eq!(runner.phase(), RunPhase::Done);
        summary
    }

    #[tokio::test]
    async fn recent_matching_entry_is_downloaded_and_remembered() {
        let workspace = Workspace::new();
        let recorder = Arc::new(RecordingDownloader::default());
        let url = workspace.feed_url("feed.xml", &rss(&[item("clip", "video clip", 1)]));
        let config = workspace.config(7, vec![feed(url.clone(), "video", recorder.clone())]);

        let summary = run_once(&config).await;
        assert_eq!(summary.entries_selected, 1);
        assert_eq!(summary.entries_downloaded, 1);
        assert_eq!(recorder.urls(), vec!["https://media.example.com/clip".to_string()]);
        assert_eq!(
            recorder.calls.lock().expect("calls lock")[0].1,
            workspace.dir.path()
        );

        let store = SeenStore::load(workspace.state_file()).expect("state should load");
        assert!(store.is_seen(url.as_str(), "clip"));
    }

    #[tokio::test]
    async fn second_run_without_new_entries_downloads_nothing() {
        let workspace = Workspace::new();
        let recorder = Arc::new(RecordingDownloader::default());
        let url = workspace.feed_url(
            "feed.xml",
            &rss(&[item("a", "video a", 0), item("b", "video b", 2)]),
        );
        let config = workspace.config(7, vec![feed(url, "", recorder.clone())]);

        assert_eq!(run_once(&config).await.entries_downloaded, 2);
        let second = run_once(&config).await;
        assert_eq!(second.entries_selected, 0);
        assert_eq!(second.entries_downloaded, 0);
        assert_eq!(recorder.urls().len(), 2);
    }

    #[tokio::test]
    async fn entries_past_max_age_are_skipped() {
        let workspace = Workspace::new();
        let recorder = Arc::new(RecordingDownloader::default());
        let url = workspace.feed_url("feed.xml", &rss(&[item("old", "video old", 10)]));
        let config = workspace.config(7, vec![feed(url, ".*", recorder.clone())]);

        let summary = run_once(&config).await;
        assert_eq!(summary.entries_selected, 0);
        assert!(recorder.urls().is_empty());
    }

    #[tokio::test]
    async fn failed_download_is_retried_next_run() {
        let workspace = Workspace::new();
        let url = workspace.feed_url("feed.xml", &rss(&[item("clip", "video clip", 1)]));

        let failing = Arc::new(RecordingDownloader::failing());
        let config = workspace.config(7, vec![feed(url.clone(), "video", failing.clone())]);
        let summary = run_once(&config).await;
        assert_eq!(summary.downloads_failed, 1);
        assert_eq!(summary.entries_downloaded, 0);
        let store = SeenStore::load(workspace.state_file()).expect("state should load");
        assert!(!store.is_seen(url.as_str(), "clip"));

        let working = Arc::new(RecordingDownloader::default());
        let config = workspace.config(7, vec![feed(url.clone(), "video", working.clone())]);
        let summary = run_once(&config).await;
        assert_eq!(summary.entries_downloaded, 1);
        assert_eq!(working.urls(), vec!["https://media.example.com/clip".to_string()]);
    }

    #[tokio::test]
    async fn broken_feeds_do_not_stop_the_run() {
        let workspace = Workspace::new();
        let recorder = Arc::new(RecordingDownloader::default());
        let missing = Url::from_file_path(workspace.dir.path().join("missing.xml"))
            .expect("path should convert");
        let garbage = workspace.feed_url("garbage.xml", "this is not a feed");
        let good = workspace.feed_url("good.xml", &rss(&[item("ok", "video ok", 0)]));
        let config = workspace.config(
            7,
            vec![
                feed(missing, "", recorder.clone()),
                feed(garbage, "", recorder.clone()),
                feed(good, "", recorder.clone()),
            ],
        );

        let summary = run_once(&config).await;
        assert_eq!(summary.feeds_failed, 2);
        assert_eq!(summary.feeds_processed, 1);
        assert_eq!(summary.entries_downloaded, 1);
    }

    #[tokio::test]
    async fn corrupt_state_is_reset() {
        let workspace = Workspace::new();
        std::fs::write(workspace.state_file(), b"[[[").expect("state should write");
        let recorder = Arc::new(RecordingDownloader::default());
        let url = workspace.feed_url("feed.xml", &rss(&[item("clip", "video clip", 1)]));
        let config = workspace.config(7, vec![feed(url.clone(), "", recorder.clone())]);

        let summary = run_once(&config).await;
        assert_eq!(summary.entries_downloaded, 1);
        let store = SeenStore::load(workspace.state_file()).expect("state should be valid again");
        assert!(store.is_seen(url.as_str(), "clip"));
    }

    #[tokio::test]
    async fn dry_run_leaves_state_untouched() {
        let workspace = Workspace::new();
        let recorder = Arc::new(RecordingDownloader::default());
        let url = workspace.feed_url("feed.xml", &rss(&[item("clip", "video clip", 1)]));
        let config = workspace.config(7, vec![feed(url, "", recorder.clone())]);

        let mut runner = Runner::new(RunOptions { dry_run: true });
        let summary = runner.run(&config).await.expect("run should succeed");
        assert_eq!(runner.phase(), RunPhase::Done);
        assert_eq!(summary.entries_selected, 1);
        assert_eq!(summary.entries_downloaded, 0);
        assert!(recorder.urls().is_empty());
        assert!(!workspace.state_file().exists());
    }

    #[tokio::test]
    async fn empty_fetch_does_not_forget_downloaded_entries() {
        let workspace = Workspace::new();
        let recorder = Arc::new(RecordingDownloader::default());
        let full = rss(&[item("a", "video a", 1)]);
        let url = workspace.feed_url("feed.xml", &full);
        let config = workspace.config(7, vec![feed(url.clone(), "", recorder.clone())]);

        run_once(&config).await;
        workspace.feed_url("feed.xml", &rss(&[]));
        let summary = run_once(&config).await;
        assert_eq!(summary.ids_pruned, 0);
        workspace.feed_url("feed.xml", &full);
        run_once(&config).await;

        assert_eq!(recorder.urls().len(), 1);
    }

    #[tokio::test]
    async fn entries_past_the_age_window_are_pruned() {
        let workspace = Workspace::new();
        let recorder = Arc::new(RecordingDownloader::default());
        let url = workspace.feed_url("feed.xml", &rss(&[item("fresh", "video fresh", 0)]));
        let now = Utc::now();
        let mut store = SeenStore::empty(workspace.state_file());
        store.mark_seen_at(url.as_str(), "stale", Some(now - TimeDelta::days(30)), now);
        store.mark_seen_at(url.as_str(), "recent", Some(now - TimeDelta::days(2)), now);
        store.save().expect("state should save");
        let config = workspace.config(7, vec![feed(url.clone(), "", recorder.clone())]);

        let summary = run_once(&config).await;
        assert_eq!(summary.ids_pruned, 1);

        let store = SeenStore::load(workspace.state_file()).expect("state should load");
        assert!(!store.is_seen(url.as_str(), "stale"));
        assert!(store.is_seen(url.as_str(), "recent"));
        assert!(store.is_seen(url.as_str(), "fresh"));
    }

    #[tokio::test]
    async fn removed_feeds_are_forgotten_on_save() {
        let workspace = Workspace::new();
        let recorder = Arc::new(RecordingDownloader::default());
        let kept = workspace.feed_url("kept.xml", &rss(&[item("k", "video k", 0)]));
        let mut store = SeenStore::empty(workspace.state_file());
        store.mark_seen("https://removed.example.com/rss", "old");
        store.save().expect("state should save");
        let config = workspace.config(7, vec![feed(kept.clone(), "", recorder.clone())]);

        let mut runner = Runner::new(RunOptions { dry_run: true });
        let summary = runner.run(&config).await.expect("run should succeed");
        assert_eq!(summary.feeds_forgotten, 0);
        let store = SeenStore::load(workspace.state_file()).expect("state should load");
        assert!(store.is_seen("https://removed.example.com/rss", "old"));

        let summary = run_once(&config).await;
        assert_eq!(summary.feeds_forgotten, 1);
        let store = SeenStore::load(workspace.state_file()).expect("state should load");
        assert!(!store.is_seen("https://removed.example.com/rss", "old"));
        assert!(store.is_seen(kept.as_str(), "k"));
        assert_eq!(store.feed_count(), 1);
    }

    #[tokio::test]
    async fn enclosure_target_downloads_enclosure_url() {
        let workspace = Workspace::new();
        let recorder = Arc::new(RecordingDownloader::default());
        let items = [Item {
            id: "ep",
            title: "episode",
            days_old: None,
            enclosure: Some("https://cdn.example.com/ep.mp3"),
        }];
        let url = workspace.feed_url("feed.xml", &rss(&items));
        let config = workspace.config(
            0,
            vec![FeedConfig::new(
                url,
                TitlePattern::new("").expect("pattern should compile"),
                MediaTarget::Enclosure,
                recorder.clone(),
            )],
        );

        run_once(&config).await;
        assert_eq!(recorder.urls(), vec!["https://cdn.example.com/ep.mp3".to_string()]);
    }

    #[tokio::test]
    async fn feeds_are_fetched_over_http() {
        let body = rss(&[item("remote", "video remote", 1)]);
        let app = Router::new().route(
            "/feed.xml",
            get(move || {
                let body = body.clone();
                async move { body.into_response() }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let address = listener.local_addr().expect("local addr should exist");
        let server_task = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("server should run");
        });

        let workspace = Workspace::new();
        let recorder = Arc::new(RecordingDownloader::default());
        let url = Url::parse(&format!("http://{address}/feed.xml")).expect("url should parse");
        let config = workspace.config(7, vec![feed(url, "video", recorder.clone())]);

        let summary = run_once(&config).await;
        assert_eq!(summary.entries_downloaded, 1);
        assert_eq!(recorder.urls(), vec!["https://media.example.com/remote".to_string()]);

        server_task.abort();
    }

    #[tokio::test]
    async fn invalid_settings_abort_the_run() {
        let workspace = Workspace::new();
        let mut runner = Runner::new(RunOptions::default());
        let error = runner
            .run_path(&workspace.dir.path().join("missing.json"))
            .await
            .expect_err("run should abort");
        assert!(matches!(error, RunError::Config(ConfigError::Read { .. })));
        assert_eq!(runner.phase(), RunPhase::Aborted);
    }

    #[tokio::test]
    async fn settings_file_drives_a_full_run() {
        let workspace = Workspace::new();
        let feed_url = workspace.feed_url("feed.xml", &rss(&[item("clip", "video clip", 1)]));
        let settings = serde_json::json!({
            "directory": workspace.dir.path(),
            "maxage": 7,
            "feeds": [{ "url": feed_url.as_str(), "regex": "audio", "downloader": "true" }],
        });
        let settings_path = workspace.dir.path().join("settings.json");
        std::fs::write(&settings_path, settings.to_string()).expect("settings should write");

        let mut runner = Runner::new(RunOptions::default());
        let summary = runner.run_path(&settings_path).await.expect("run should succeed");
        assert_eq!(runner.phase(), RunPhase::Done);
        assert_eq!(summary.feeds_processed, 1);
        assert_eq!(summary.entries_selected, 0);
        assert!(workspace
            .dir
            .path()
            .join(crate::core::storage::DEFAULT_STATE_FILE)
            .exists());
    }
}
