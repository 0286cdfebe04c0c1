//! Writing fetched items into an album directory.
//!
//! Bodies are streamed to a per-item `.part` file first. [`settle`] then
//! moves the temp file to its final name, resolving collisions by content:
//! an equivalent file already on disk absorbs the new copy, a different one
//! pushes the new copy to the next free `<base>_<n><ext>` name. Existing
//! files are never overwritten.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::compare::{compare_as, is_image, Comparison};
use super::error::SyncError;
use super::naming::numbered_variant;
use crate::thislife::ByteStream;

/// Same-name collision counters. Observational only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DuplicateStats {
    pub same_name_count: u64,
    pub different_size: u64,
    pub different_content: u64,
}

impl DuplicateStats {
    pub fn record(&mut self, comparison: Comparison) {
        match comparison {
            Comparison::SizeDiffers => self.different_size += 1,
            Comparison::PixelsDiffer | Comparison::ContentDiffers => self.different_content += 1,
            Comparison::Identical => {}
        }
    }

    pub fn is_empty(&self) -> bool {
        self.same_name_count == 0
    }
}

impl std::ops::AddAssign for DuplicateStats {
    fn add_assign(&mut self, rhs: Self) {
        self.same_name_count += rhs.same_name_count;
        self.different_size += rhs.different_size;
        self.different_content += rhs.different_content;
    }
}

/// Per-album shared state: names handed out this run plus collision stats.
/// Held behind one mutex; [`settle`] runs with it locked.
#[derive(Debug, Default)]
pub struct AlbumLedger {
    pub used_names: HashSet<String>,
    pub stats: DuplicateStats,
}

/// Where a settled item ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Written under its own name.
    Stored(PathBuf),
    /// Name was taken by different content; written under a numbered variant.
    Renamed(PathBuf),
    /// Equivalent content was already on disk; the new copy was discarded.
    AlreadyPresent(PathBuf),
}

impl Placement {
    pub fn path(&self) -> &Path {
        match self {
            Placement::Stored(p) | Placement::Renamed(p) | Placement::AlreadyPresent(p) => p,
        }
    }
}

/// Stream an item body into `temp`. Returns the number of bytes written.
/// The temp file is removed if the stream or the write fails.
pub async fn stream_to_temp(mut body: ByteStream, temp: &Path) -> Result<u64, SyncError> {
    let result = async {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(temp)
            .await
            .map_err(|e| SyncError::fs(temp, e))?;

        let mut written: u64 = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| {
                tracing::debug!("Body stream error after {} bytes: {}", written, e);
                SyncError::from(e)
            })?;
            file.write_all(&chunk)
                .await
                .map_err(|e| SyncError::fs(temp, e))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| SyncError::fs(temp, e))?;
        Ok(written)
    }
    .await;

    if result.is_err() {
        let _ = fs::remove_file(temp).await;
    }
    result
}

/// Move `temp` to its final place under `dir`, starting from `filename`.
///
/// Candidates are `filename`, then `<base>_1<ext>`, `<base>_2<ext>`, ... The
/// first candidate that doesn't exist receives the file. A candidate holding
/// equivalent content ends the search and the temp file is deleted. A
/// same-run collision on `filename` itself is counted in the ledger stats.
///
/// Blocking; call from `spawn_blocking` with the ledger locked.
pub fn settle(
    dir: &Path,
    filename: &str,
    temp: &Path,
    ledger: &mut AlbumLedger,
) -> Result<Placement, SyncError> {
    let same_run = ledger.used_names.contains(filename);
    let decode_images = is_image(Path::new(filename));
    if same_run {
        ledger.stats.same_name_count += 1;
    }

    let mut n: u32 = 0;
    loop {
        let candidate = if n == 0 {
            filename.to_string()
        } else {
            numbered_variant(filename, n)
        };
        let path = dir.join(&candidate);

        if !path.exists() {
            std::fs::rename(temp, &path).map_err(|e| SyncError::fs(&path, e))?;
            ledger.used_names.insert(filename.to_string());
            ledger.used_names.insert(candidate);
            return Ok(if n == 0 {
                Placement::Stored(path)
            } else {
                tracing::warn!(
                    "{} already holds different content, saved as: {}",
                    filename,
                    path.display()
                );
                Placement::Renamed(path)
            });
        }

        let comparison =
            compare_as(&path, temp, decode_images).map_err(|e| SyncError::fs(&path, e))?;
        if comparison.is_identical() {
            std::fs::remove_file(temp).map_err(|e| SyncError::fs(temp, e))?;
            ledger.used_names.insert(filename.to_string());
            tracing::debug!("{} is identical to existing {}", filename, path.display());
            return Ok(Placement::AlreadyPresent(path));
        }
        if n == 0 && same_run {
            ledger.stats.record(comparison);
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn body(chunks: &[&'static [u8]]) -> ByteStream {
        let items: Vec<Result<Bytes, crate::thislife::RemoteError>> =
            chunks.iter().map(|c| Ok(Bytes::from_static(c))).collect();
        futures_util::stream::iter(items).boxed()
    }

    fn temp_with(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let p = dir.join(name);
        std::fs::write(&p, bytes).unwrap();
        p
    }

    #[tokio::test]
    async fn test_stream_to_temp_writes_all_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join(".0001_1.part");
        let n = stream_to_temp(body(&[&b"hello "[..], &b"world"[..]]), &temp).await.unwrap();
        assert_eq!(n, 11);
        assert_eq!(std::fs::read(&temp).unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_stream_error_removes_temp() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join(".0001_1.part");
        let items: Vec<Result<Bytes, crate::thislife::RemoteError>> = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(crate::thislife::RemoteError::from_status(503, "download")),
        ];
        let err = stream_to_temp(futures_util::stream::iter(items).boxed(), &temp)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(!temp.exists());
    }

    #[test]
    fn test_settle_fresh_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = AlbumLedger::default();
        let temp = temp_with(dir.path(), ".0001_1.part", b"one");
        let placed = settle(dir.path(), "IMG_1.jpg", &temp, &mut ledger).unwrap();
        assert_eq!(placed, Placement::Stored(dir.path().join("IMG_1.jpg")));
        assert!(!temp.exists());
        assert!(ledger.used_names.contains("IMG_1.jpg"));
        assert!(ledger.stats.is_empty());
    }

    #[test]
    fn test_settle_three_distinct_same_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = AlbumLedger::default();
        let t1 = temp_with(dir.path(), ".0001_1.part", b"first");
        let t2 = temp_with(dir.path(), ".0002_2.part", b"second!");
        let t3 = temp_with(dir.path(), ".0003_3.part", b"third");

        settle(dir.path(), "IMG_1.jpg", &t1, &mut ledger).unwrap();
        let p2 = settle(dir.path(), "IMG_1.jpg", &t2, &mut ledger).unwrap();
        let p3 = settle(dir.path(), "IMG_1.jpg", &t3, &mut ledger).unwrap();

        assert_eq!(p2, Placement::Renamed(dir.path().join("IMG_1_1.jpg")));
        assert_eq!(p3, Placement::Renamed(dir.path().join("IMG_1_2.jpg")));
        assert_eq!(std::fs::read(dir.path().join("IMG_1_2.jpg")).unwrap(), b"third");
        assert_eq!(
            ledger.stats,
            DuplicateStats {
                same_name_count: 2,
                different_size: 1,
                different_content: 1,
            }
        );
    }

    #[test]
    fn test_settle_identical_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = AlbumLedger::default();
        let t1 = temp_with(dir.path(), ".0001_1.part", b"same");
        let t2 = temp_with(dir.path(), ".0002_2.part", b"same");
        settle(dir.path(), "IMG_1.jpg", &t1, &mut ledger).unwrap();
        let placed = settle(dir.path(), "IMG_1.jpg", &t2, &mut ledger).unwrap();
        assert_eq!(placed, Placement::AlreadyPresent(dir.path().join("IMG_1.jpg")));
        assert!(!t2.exists());
        assert!(!dir.path().join("IMG_1_1.jpg").exists());
        assert_eq!(ledger.stats.same_name_count, 1);
        assert_eq!(ledger.stats.different_size + ledger.stats.different_content, 0);
    }

    #[test]
    fn test_settle_never_overwrites_previous_run() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("IMG_1.jpg"), b"old run").unwrap();
        let mut ledger = AlbumLedger::default();
        let temp = temp_with(dir.path(), ".0001_1.part", b"new content");
        let placed = settle(dir.path(), "IMG_1.jpg", &temp, &mut ledger).unwrap();
        assert_eq!(placed, Placement::Renamed(dir.path().join("IMG_1_1.jpg")));
        assert_eq!(std::fs::read(dir.path().join("IMG_1.jpg")).unwrap(), b"old run");
        // Cross-run collisions are not same-run duplicates.
        assert!(ledger.stats.is_empty());
    }

    #[test]
    fn test_settle_finds_previous_run_variant() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("IMG_1.jpg"), b"aaa").unwrap();
        std::fs::write(dir.path().join("IMG_1_1.jpg"), b"bbbb").unwrap();
        let mut ledger = AlbumLedger::default();
        let temp = temp_with(dir.path(), ".0002_2.part", b"bbbb");
        let placed = settle(dir.path(), "IMG_1.jpg", &temp, &mut ledger).unwrap();
        assert_eq!(placed, Placement::AlreadyPresent(dir.path().join("IMG_1_1.jpg")));
        assert!(!dir.path().join("IMG_1_2.jpg").exists());
    }

    #[test]
    fn test_stats_add_assign() {
        let mut total = DuplicateStats::default();
        total += DuplicateStats {
            same_name_count: 2,
            different_size: 1,
            different_content: 1,
        };
        total += DuplicateStats {
            same_name_count: 1,
            different_size: 0,
            different_content: 1,
        };
        assert_eq!(total.same_name_count, 3);
        assert_eq!(total.different_content, 2);
    }
}
