use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;

use crate::cli::Cli;
use crate::retry::RetryConfig;
use crate::sync::{IgnoreSet, SyncConfig};
use crate::types::Mode;

/// Optional file in the output directory listing album names to skip during
/// repair, one per line.
pub const IGNORE_FILE_NAME: &str = "ignore_albums.txt";

/// File in the working directory a replacement token can be saved to when
/// the current one expires mid-run. Consumed on read.
pub const TOKEN_FILE_NAME: &str = "token.txt";

/// Application configuration.
pub struct Config {
    pub token: Option<String>,
    pub life_uid: Option<String>,
    pub output_dir: PathBuf,
    pub ignore_albums: Vec<String>,
    pub mode: Mode,

    pub album_delay: Duration,
    pub timeout: Duration,
    pub retry_delay_secs: u64,
    pub max_retries: u32,
    pub workers: u16,

    pub no_progress_bar: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("life_uid", &self.life_uid)
            .field("output_dir", &self.output_dir)
            .field("mode", &self.mode)
            .field("workers", &self.workers)
            .field("album_delay", &self.album_delay)
            .finish_non_exhaustive()
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Config {
    pub fn from_cli(cli: Cli) -> anyhow::Result<Self> {
        let album_delay = Duration::try_from_secs_f64(cli.rate_limit).map_err(|e| {
            anyhow::anyhow!(
                "--rate-limit must be a non-negative number of seconds: {}",
                e
            )
        })?;
        let mode = cli.mode();
        let token = cli
            .token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        Ok(Self {
            token,
            life_uid: cli.life_uid.filter(|u| !u.trim().is_empty()),
            output_dir: expand_tilde(&cli.output_dir),
            ignore_albums: cli.ignore_albums,
            mode,
            album_delay,
            timeout: Duration::from_secs(cli.timeout),
            retry_delay_secs: cli.retry_delay,
            max_retries: cli.max_retries,
            workers: cli.parallel_workers,
            no_progress_bar: cli.no_progress_bar,
        })
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            base_delay_secs: self.retry_delay_secs,
            ..RetryConfig::default()
        }
    }

    /// `--ignore-albums` merged with `ignore_albums.txt` from the output
    /// directory, if present.
    pub async fn load_ignore_set(&self) -> anyhow::Result<IgnoreSet> {
        let mut ignore = IgnoreSet::new(self.ignore_albums.iter().cloned());
        let path = self.output_dir.join(IGNORE_FILE_NAME);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let before = ignore.len();
                ignore.extend_from_lines(&content);
                tracing::debug!(
                    "Loaded {} ignored albums from {}",
                    ignore.len() - before,
                    path.display()
                );
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        }
        Ok(ignore)
    }

    pub fn sync_config(&self, ignore: IgnoreSet) -> SyncConfig {
        SyncConfig {
            output_dir: self.output_dir.clone(),
            workers: usize::from(self.workers),
            album_delay: self.album_delay,
            retry: self.retry_config(),
            ignore,
            no_progress_bar: self.no_progress_bar,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}
