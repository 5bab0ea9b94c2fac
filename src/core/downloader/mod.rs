use std::path::Path;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;

const URL_PLACEHOLDER: &str = "{url}";
const DIR_PLACEHOLDER: &str = "{dir}";

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}")]
    Failed { program: String, status: ExitStatus },
}

#[derive(Debug, thiserror::Error)]
#[error("downloader command template is empty")]
pub struct EmptyTemplate;

/// Something that can transfer one media URL into a directory.
#[async_trait]
pub trait Downloader: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    async fn execute(&self, url: &str, target_dir: &Path) -> Result<(), DownloadError>;
}

/// Runs an external program built from a command template such as
/// `aria2c --dir {dir} {url}`.
///
/// The template is split on whitespace and each argument is substituted
/// on its own; nothing goes through a shell. A template that never
/// mentions `{url}` gets the URL as its last argument, so a bare `wget`
/// or `youtube-dl` works.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDownloader {
    program: String,
    args: Vec<String>,
}

impl CommandDownloader {
    pub fn from_template(template: &str) -> Result<Self, EmptyTemplate> {
        let mut parts = template.split_whitespace().map(ToString::to_string);
        let program = parts.next().ok_or(EmptyTemplate)?;
        let mut args: Vec<String> = parts.collect();
        if !program.contains(URL_PLACEHOLDER) && !args.iter().any(|arg| arg.contains(URL_PLACEHOLDER)) {
            args.push(URL_PLACEHOLDER.to_string());
        }
        Ok(Self { program, args })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn render_args(&self, url: &str, target_dir: &Path) -> Vec<String> {
        let dir = target_dir.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace(URL_PLACEHOLDER, url).replace(DIR_PLACEHOLDER, &dir))
            .collect()
    }
}

#[async_trait]
impl Downloader for CommandDownloader {
    fn name(&self) -> &str {
        &self.program
    }

    async fn execute(&self, url: &str, target_dir: &Path) -> Result<(), DownloadError> {
        let args = self.render_args(url, target_dir);
        tracing::debug!(program = %self.program, ?args, "spawning downloader");

        let status = tokio::process::Command::new(&self.program)
            .args(&args)
            .current_dir(target_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|source| DownloadError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !status.success() {
            return Err(DownloadError::Failed {
                program: self.program.clone(),
                status,
            });
        }
        Ok(())
    }
}
