//! Sync engine: fetch albums, store items with content-aware naming, and
//! repair or dedupe the local library.
//!
//! Albums are processed one at a time. Inside an album, items are fetched by
//! a bounded pool (`buffer_unordered(workers)`); each item streams to its own
//! `.part` file and is then settled under the album ledger lock, which is the
//! only point where filenames are compared, renamed or discarded.

pub mod compare;
pub mod dedupe;
pub mod error;
pub mod exif;
pub mod moments;
pub mod naming;
pub mod reconcile;
pub mod store;

use std::collections::HashMap;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::auth::CredentialStore;
use crate::retry::{self, RetryAction, RetryConfig};
use crate::thislife::{AlbumDetail, RemoteAlbum, RemoteLibrary};

pub use self::dedupe::DedupeSummary;
pub use self::error::SyncError;
use self::moments::{decode_moment_ids, duplicate_ids};
use self::naming::album_dir;
pub use self::reconcile::{IgnoreSet, LocalSnapshot, ReconcileReport};
use self::store::{AlbumLedger, DuplicateStats, Placement};

/// Subset of application config consumed by the sync engine.
/// Decoupled from CLI parsing so the engine can be tested independently.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub output_dir: PathBuf,
    /// Concurrent item fetches per album.
    pub workers: usize,
    /// Pause between albums.
    pub album_delay: Duration,
    pub retry: RetryConfig,
    pub ignore: IgnoreSet,
    pub no_progress_bar: bool,
}

/// Result of one album pass. `succeeded` counts items now present locally,
/// including ones whose content was already on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlbumOutcome {
    pub succeeded: usize,
    pub failed: usize,
    pub stats: DuplicateStats,
}

/// Totals across a multi-album run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunTotals {
    pub albums: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub albums_with_duplicates: usize,
    pub stats: DuplicateStats,
    pub interrupted: bool,
}

impl RunTotals {
    fn add(&mut self, outcome: &AlbumOutcome) {
        self.albums += 1;
        self.succeeded += outcome.succeeded;
        self.failed += outcome.failed;
        if !outcome.stats.is_empty() {
            self.albums_with_duplicates += 1;
            self.stats += outcome.stats;
        }
    }
}

/// Create a progress bar with a consistent template.
///
/// Hidden when the user passed `--no-progress-bar` or stdout is not a TTY.
fn create_progress_bar(no_progress_bar: bool, total: u64) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template(
            "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .expect("valid template")
        .progress_chars("=> "),
    );
    pb
}

fn log_duplicate_stats(label: &str, stats: &DuplicateStats) {
    if stats.is_empty() {
        return;
    }
    tracing::info!(
        "{}: {} files with duplicate names ({} different size, {} same size but different content)",
        label,
        stats.same_name_count,
        stats.different_size,
        stats.different_content
    );
}

pub struct Orchestrator {
    remote: Arc<dyn RemoteLibrary>,
    credentials: Arc<CredentialStore>,
    config: SyncConfig,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        remote: Arc<dyn RemoteLibrary>,
        credentials: Arc<CredentialStore>,
        config: SyncConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            remote,
            credentials,
            config,
            shutdown,
        }
    }

    pub async fn fetch_album_list(&self) -> Result<Vec<RemoteAlbum>, SyncError> {
        let remote = &self.remote;
        let albums = self
            .credentials
            .call(|credential| async move { remote.fetch_album_list(&credential).await })
            .await?;
        Ok(albums)
    }

    async fn fetch_album_detail(&self, album_id: &str) -> Result<AlbumDetail, SyncError> {
        let remote = &self.remote;
        let detail = self
            .credentials
            .call(|credential| async move { remote.fetch_album_detail(&credential, album_id).await })
            .await?;
        Ok(detail)
    }

    /// Fetch every item of one album into `output_dir/<album key>/`.
    ///
    /// An album-level failure (detail fetch, `success == false`) logs and
    /// returns `(0, 0)`. If the album directory can't be created every item
    /// counts as failed. Item failures never abort their siblings. Only an
    /// unrenewable credential is returned as an error.
    pub async fn download_album(&self, album: &RemoteAlbum) -> Result<AlbumOutcome, SyncError> {
        tracing::info!("Processing album: {} ({} photos)", album.name, album.declared_count);

        let detail = match self.fetch_album_detail(&album.id).await {
            Ok(detail) => detail,
            Err(e) if e.is_auth() => return Err(e),
            Err(e) => {
                tracing::error!("Failed to get album contents for {}: {}", album.name, e);
                return Ok(AlbumOutcome::default());
            }
        };
        if !detail.success {
            tracing::error!(
                "Failed to get album contents for {}: {}",
                album.name,
                detail.message.as_deref().unwrap_or("Unknown error")
            );
            return Ok(AlbumOutcome::default());
        }

        let ids = decode_moment_ids(&detail.moments);
        tracing::info!("Found {} photos in album", ids.len());
        let dups = duplicate_ids(&ids);
        for dup in &dups {
            tracing::warn!(
                "Duplicate moment ID {} found at positions {} and {}",
                dup.id,
                dup.first,
                dup.repeat
            );
        }
        if !dups.is_empty() {
            let unique = ids.len() - dups.len();
            tracing::warn!(
                "Album contains {} photos but only {} unique moment IDs",
                ids.len(),
                unique
            );
        }
        if ids.len() as u64 != album.declared_count {
            tracing::warn!(
                "Album {} declares {} photos but its record stream holds {}",
                album.name,
                album.declared_count,
                ids.len()
            );
        }

        let dir = self.config.output_dir.join(album_dir(&album.name, &album.id));
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            tracing::error!("Failed to create album directory {}: {}", dir.display(), e);
            return Ok(AlbumOutcome {
                succeeded: 0,
                failed: ids.len(),
                stats: DuplicateStats::default(),
            });
        }
        if ids.is_empty() {
            return Ok(AlbumOutcome::default());
        }

        let ledger = Arc::new(Mutex::new(AlbumLedger::default()));
        let pb = create_progress_bar(self.config.no_progress_bar, ids.len() as u64);
        let shutdown = &self.shutdown;
        let dir_ref = dir.as_path();

        let results = stream::iter(ids.into_iter().enumerate())
            .take_while(|_| std::future::ready(!shutdown.is_cancelled()))
            .map(|(i, id)| {
                let ledger = ledger.clone();
                async move {
                    let result = self.fetch_and_store(dir_ref, i + 1, &id, ledger).await;
                    (id, result)
                }
            })
            .buffer_unordered(self.config.workers.max(1));
        tokio::pin!(results);

        let mut outcome = AlbumOutcome::default();
        let mut auth_failed = false;
        while let Some((id, result)) = results.next().await {
            match result {
                Ok(placement) => {
                    outcome.succeeded += 1;
                    let name = placement
                        .path()
                        .file_name()
                        .and_then(|f| f.to_str())
                        .unwrap_or("")
                        .to_string();
                    pb.suspend(|| match &placement {
                        Placement::AlreadyPresent(_) => {
                            tracing::debug!("Already have {}/{}", album.name, name)
                        }
                        _ => tracing::info!("Successfully downloaded: {}/{}", album.name, name),
                    });
                    pb.set_message(name);
                }
                Err(e) => {
                    outcome.failed += 1;
                    auth_failed |= e.is_auth();
                    pb.suspend(|| {
                        tracing::error!(
                            "Error downloading moment_id {} for album {}: {}",
                            id,
                            album.name,
                            e
                        )
                    });
                }
            }
            pb.inc(1);
        }
        pb.finish_and_clear();

        if shutdown.is_cancelled() {
            tracing::info!("Shutdown requested, stopped scheduling items for {}", album.name);
        }

        outcome.stats = ledger.lock().await.stats;
        log_duplicate_stats(&format!("Album {}", album.name), &outcome.stats);

        if auth_failed && self.credentials.is_revoked() {
            return Err(SyncError::Auth(format!(
                "credential rejected while downloading {}",
                album.name
            )));
        }
        Ok(outcome)
    }

    /// Fetch one item to a temp file (retrying transient failures), then
    /// settle it under the ledger lock.
    async fn fetch_and_store(
        &self,
        dir: &Path,
        index: usize,
        id: &str,
        ledger: Arc<Mutex<AlbumLedger>>,
    ) -> Result<Placement, SyncError> {
        let temp = naming::temp_path(dir, index, id);
        let remote = &self.remote;
        let temp_ref = temp.as_path();

        let hint = retry::retry_with_backoff(
            &self.config.retry,
            |e: &SyncError| {
                if e.is_retryable() {
                    RetryAction::Retry
                } else {
                    RetryAction::Abort
                }
            },
            || async move {
                let download = self
                    .credentials
                    .call(|credential| async move { remote.fetch_item(&credential, id).await })
                    .await?;
                store::stream_to_temp(download.body, temp_ref).await?;
                Ok::<_, SyncError>(download.filename_hint)
            },
        )
        .await?;

        let filename = naming::item_filename(hint.as_deref(), index, id);
        let guard = ledger.lock_owned().await;
        let dir = dir.to_path_buf();
        let settle_temp = temp.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut guard = guard;
            store::settle(&dir, &filename, &settle_temp, &mut guard)
        })
        .await?;

        if result.is_err() {
            let _ = tokio::fs::remove_file(&temp).await;
        }
        result
    }

    /// Download every album in server order, optionally starting at the
    /// album named `resume_from`. An unknown name starts from the beginning.
    pub async fn download_all_albums(&self, resume_from: Option<&str>) -> Result<RunTotals, SyncError> {
        let albums = self.fetch_album_list().await?;
        tracing::info!("Found {} albums", albums.len());

        let start = match resume_from {
            Some(name) => match albums.iter().position(|a| a.name == name) {
                Some(i) => {
                    tracing::info!("Resuming from album: {}", name);
                    i
                }
                None => {
                    tracing::warn!("Album '{}' not found, starting from beginning", name);
                    0
                }
            },
            None => 0,
        };

        let totals = self.download_albums(&albums[start..]).await?;
        tracing::info!("Download complete!");
        tracing::info!("Total successfully downloaded: {}", totals.succeeded);
        tracing::info!("Total failed downloads: {}", totals.failed);
        Ok(totals)
    }

    /// Sequential album loop with the inter-album delay. Stops before the
    /// next album once shutdown is requested.
    async fn download_albums(&self, albums: &[RemoteAlbum]) -> Result<RunTotals, SyncError> {
        let mut totals = RunTotals::default();
        for (i, album) in albums.iter().enumerate() {
            if self.shutdown.is_cancelled() {
                tracing::info!("Shutdown requested, skipping remaining albums");
                totals.interrupted = true;
                break;
            }
            let outcome = self.download_album(album).await?;
            totals.add(&outcome);

            if i + 1 < albums.len() && !self.config.album_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.album_delay) => {}
                    _ = self.shutdown.cancelled() => {}
                }
            }
        }
        if self.shutdown.is_cancelled() {
            totals.interrupted = true;
        }
        Ok(totals)
    }

    async fn local_snapshot(&self) -> Result<LocalSnapshot, SyncError> {
        let output_dir = self.config.output_dir.clone();
        tokio::task::spawn_blocking(move || LocalSnapshot::scan(&output_dir)).await?
    }

    /// Classify every remote album against the local directories.
    pub async fn compare_local_vs_server(&self) -> Result<ReconcileReport, SyncError> {
        let albums = self.fetch_album_list().await?;
        let local = self.local_snapshot().await?;
        if local.is_empty() {
            tracing::info!("No album directories found in {}", self.config.output_dir.display());
        } else {
            tracing::debug!(
                "Found {} local album directories holding {} files",
                local.len(),
                local.total()
            );
        }
        Ok(ReconcileReport::build(&albums, &local))
    }

    /// Re-download incomplete and missing albums, smallest first, skipping
    /// ignored ones.
    pub async fn redownload_incomplete(&self) -> Result<RunTotals, SyncError> {
        let report = self.compare_local_vs_server().await?;
        if !self.config.ignore.is_empty() {
            tracing::debug!("{} album names on the ignore list", self.config.ignore.len());
        }
        let plan = report.repair_plan(&self.config.ignore);

        if !plan.ignored.is_empty() {
            tracing::info!("Ignoring these albums:");
            for name in &plan.ignored {
                tracing::info!("- {}", name);
            }
        }
        if plan.items.is_empty() {
            tracing::info!("All albums are complete");
            return Ok(RunTotals::default());
        }

        tracing::info!("Will download albums in this order:");
        for item in &plan.items {
            tracing::info!(
                "- {} ({} photos, {} missing)",
                item.album.name,
                item.album.declared_count,
                item.missing
            );
        }

        let albums: Vec<RemoteAlbum> = plan.items.into_iter().map(|i| i.album).collect();
        let totals = self.download_albums(&albums).await?;

        tracing::info!("Redownload complete!");
        tracing::info!("Total successfully downloaded: {}", totals.succeeded);
        tracing::info!("Total failed downloads: {}", totals.failed);
        if !totals.stats.is_empty() {
            tracing::info!(
                "{} out of {} albums had duplicates",
                totals.albums_with_duplicates,
                totals.albums
            );
            log_duplicate_stats("Across all albums", &totals.stats);
        }
        Ok(totals)
    }

    /// Dedupe every local album. Server counts are used when the album list
    /// can be fetched; otherwise every album is checked.
    pub async fn dedupe_all(&self, thorough: bool) -> Result<DedupeSummary, SyncError> {
        let counts = match self.fetch_album_list().await {
            Ok(albums) => remote_counts(&albums),
            Err(e) => {
                tracing::warn!("Could not fetch album list, deduping without server counts: {}", e);
                HashMap::new()
            }
        };
        run_dedupe(self.config.output_dir.clone(), counts, thorough).await
    }

    /// Download one album by display name, or by album key when
    /// `use_sanitized` is set. Returns `None` when no album matches.
    pub async fn download_single_album(
        &self,
        name: &str,
        use_sanitized: bool,
    ) -> Result<Option<AlbumOutcome>, SyncError> {
        let albums = self.fetch_album_list().await?;
        let label = |a: &RemoteAlbum| {
            if use_sanitized {
                album_dir(&a.name, &a.id)
            } else {
                a.name.clone()
            }
        };

        let Some(album) = albums.iter().find(|a| label(a) == name) else {
            tracing::warn!("Album not found: {}", name);
            tracing::info!("Available albums:");
            for a in &albums {
                tracing::info!("- {}", label(a));
            }
            return Ok(None);
        };

        tracing::info!("Found album: {} ({} photos)", album.name, album.declared_count);
        self.download_album(album).await.map(Some)
    }

    /// Album count and total declared items, without downloading.
    pub async fn count_items(&self) -> Result<(usize, u64), SyncError> {
        let albums = self.fetch_album_list().await?;
        let total: u64 = albums.iter().map(|a| a.declared_count).sum();
        tracing::info!("Found {} albums containing {} total photos:", albums.len(), total);
        for album in &albums {
            tracing::info!("- {}: {} photos", album.name, album.declared_count);
        }
        Ok((albums.len(), total))
    }
}

/// Declared counts per album key. Albums sharing a key share a directory,
/// so their counts add up.
pub fn remote_counts(albums: &[RemoteAlbum]) -> HashMap<String, u64> {
    let mut counts = HashMap::new();
    for album in albums {
        *counts.entry(album_dir(&album.name, &album.id)).or_insert(0) += album.declared_count;
    }
    counts
}

/// Run the blocking dedupe pass off the async runtime and log its summary.
pub async fn run_dedupe(
    output_dir: PathBuf,
    counts: HashMap<String, u64>,
    thorough: bool,
) -> Result<DedupeSummary, SyncError> {
    if thorough {
        tracing::info!("Running in thorough mode: checking all albums");
    } else {
        tracing::info!("Running in quick mode: only checking albums that might have duplicates");
    }
    let summary =
        tokio::task::spawn_blocking(move || dedupe::dedupe_all(&output_dir, &counts, thorough))
            .await??;

    tracing::info!("Deduplication complete!");
    if !thorough {
        tracing::info!(
            "Skipped {} albums with correct or fewer files than expected",
            summary.skipped
        );
    }
    if summary.removed > 0 {
        tracing::info!(
            "Found duplicates in {} out of {} checked albums",
            summary.with_duplicates,
            summary.processed - summary.skipped
        );
        tracing::info!("Removed {} duplicate files", summary.removed);
    } else {
        tracing::info!("No exact duplicates found");
    }
    Ok(summary)
}
