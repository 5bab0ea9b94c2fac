use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "newsfeed-dl", version)]
#[command(about = "Check news feeds for new entries and hand them to a downloader", long_about = None)]
pub struct Cli {
    /// Path to the JSON settings file
    #[arg(default_value = "newsfeed-dl.json")]
    pub config: PathBuf,

    /// Report what would be downloaded without downloading or saving state
    #[arg(long)]
    pub dry_run: bool,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    pub verbose: bool,
}
