//! Offline duplicate removal inside album directories.
//!
//! Files are grouped by naming pattern (`IMG_1.jpg`, `IMG_1_1.jpg`, ...),
//! every pair within a group is compared, and content-equivalent members
//! collapse to the one with the shortest name. No network access.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use super::compare::compare_files;
use super::error::SyncError;
use super::naming::{is_temp_file, is_variant_of, original_base, split_extension};

/// Regular files in `dir`, sorted by name, excluding in-flight `.part` files.
pub fn local_files(dir: &Path) -> Result<Vec<String>, SyncError> {
    let entries = std::fs::read_dir(dir).map_err(|e| SyncError::fs(dir, e))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| SyncError::fs(dir, e))?;
        let file_type = entry.file_type().map_err(|e| SyncError::fs(&entry.path(), e))?;
        if !file_type.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            tracing::debug!("Skipping non-UTF-8 filename {:?}", entry.file_name());
            continue;
        };
        if is_temp_file(&name) {
            continue;
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}

/// Group filenames by `(original base, lowercased extension)`.
///
/// A group's members are the files with that extension whose stem is the
/// base itself or `base_<digits>`. A file can belong to more than one group
/// (`IMG_1.jpg` is both a variant of `IMG` and the base of `IMG_1_1.jpg`).
/// Only groups with two or more members are returned.
pub fn peer_groups(files: &[String]) -> BTreeMap<(String, String), Vec<String>> {
    let keys: BTreeSet<(String, String)> = files
        .iter()
        .map(|f| {
            let (stem, ext) = split_extension(f);
            (original_base(stem).to_string(), ext.to_lowercase())
        })
        .collect();

    keys.into_iter()
        .filter_map(|(base, ext)| {
            let members: Vec<String> = files
                .iter()
                .filter(|f| {
                    let (stem, e) = split_extension(f);
                    e.to_lowercase() == ext && is_variant_of(stem, &base)
                })
                .cloned()
                .collect();
            (members.len() > 1).then_some(((base, ext), members))
        })
        .collect()
}

/// Shortest name wins; ties go to the lexicographically smaller one.
fn keeper<'a>(a: &'a str, b: &'a str) -> &'a str {
    match a.chars().count().cmp(&b.chars().count()) {
        std::cmp::Ordering::Less => a,
        std::cmp::Ordering::Greater => b,
        std::cmp::Ordering::Equal => a.min(b),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupeOutcome {
    /// Quick mode and the album has no more files than the server lists.
    Skipped { local: usize, remote: u64 },
    Checked {
        before: usize,
        removed: Vec<PathBuf>,
        remote: Option<u64>,
    },
}

impl DedupeOutcome {
    pub fn removed(&self) -> usize {
        match self {
            DedupeOutcome::Skipped { .. } => 0,
            DedupeOutcome::Checked { removed, .. } => removed.len(),
        }
    }
}

/// Remove content-equivalent duplicates from one album directory.
///
/// Without `thorough`, an album whose local file count doesn't exceed the
/// known `remote_count` is skipped. Running twice removes nothing the
/// second time.
pub fn dedupe_album(
    dir: &Path,
    remote_count: Option<u64>,
    thorough: bool,
) -> Result<DedupeOutcome, SyncError> {
    let files = local_files(dir)?;
    let local = files.len();
    let name = dir.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();

    if let Some(remote) = remote_count {
        if !thorough && local as u64 <= remote {
            tracing::debug!("Skipping {}: has {} files, should have {}", name, local, remote);
            return Ok(DedupeOutcome::Skipped { local, remote });
        }
        tracing::info!("Checking {}: has {} files, should have {}", name, local, remote);
    } else {
        tracing::info!("Checking {}: has {} files", name, local);
    }

    let mut removed_names: BTreeSet<String> = BTreeSet::new();
    let mut removed = Vec::new();

    for ((base, ext), members) in peer_groups(&files) {
        let live: Vec<&String> = members.iter().filter(|m| !removed_names.contains(*m)).collect();
        if live.len() < 2 {
            continue;
        }
        tracing::debug!("Comparing {} files named like {}{}", live.len(), base, ext);

        let mut gone: BTreeSet<&str> = BTreeSet::new();
        for (i, a) in live.iter().enumerate() {
            if gone.contains(a.as_str()) {
                continue;
            }
            for b in &live[i + 1..] {
                if gone.contains(b.as_str()) || gone.contains(a.as_str()) {
                    continue;
                }
                let comparison = compare_files(&dir.join(a.as_str()), &dir.join(b.as_str()))
                    .map_err(|e| SyncError::fs(dir, e))?;
                if comparison.is_identical() {
                    let keep = keeper(a, b);
                    let discard = if keep == a.as_str() { b.as_str() } else { a.as_str() };
                    tracing::info!("Removing duplicate: {} (identical to {})", discard, keep);
                    gone.insert(discard);
                } else {
                    tracing::debug!("Keeping both {} and {} ({:?})", a, b, comparison);
                }
            }
        }

        for name in gone {
            let path = dir.join(name);
            std::fs::remove_file(&path).map_err(|e| SyncError::fs(&path, e))?;
            removed_names.insert(name.to_string());
            removed.push(path);
        }
    }

    if !removed.is_empty() {
        let now = local - removed.len();
        tracing::info!(
            "Removed {} duplicates from {}; album now has {} files",
            removed.len(),
            name,
            now
        );
        if let Some(remote) = remote_count {
            let remote = remote as usize;
            if now < remote {
                tracing::warn!("{} is still missing {} photos", name, remote - now);
            } else if now > remote {
                tracing::warn!("{} has {} extra photos", name, now - remote);
            }
        }
    }

    Ok(DedupeOutcome::Checked {
        before: local,
        removed,
        remote: remote_count,
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupeSummary {
    pub removed: usize,
    pub processed: usize,
    pub skipped: usize,
    pub with_duplicates: usize,
}

/// Dedupe every album directory under `output_dir`, in name order.
/// `remote_counts` maps album keys to declared counts; albums missing from
/// it are always checked.
pub fn dedupe_all(
    output_dir: &Path,
    remote_counts: &HashMap<String, u64>,
    thorough: bool,
) -> Result<DedupeSummary, SyncError> {
    let mut dirs = Vec::new();
    let entries = std::fs::read_dir(output_dir).map_err(|e| SyncError::fs(output_dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| SyncError::fs(output_dir, e))?;
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            dirs.push(entry.path());
        }
    }
    dirs.sort();

    let mut summary = DedupeSummary::default();
    for dir in dirs {
        let key = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let outcome = dedupe_album(&dir, remote_counts.get(&key).copied(), thorough)?;
        summary.processed += 1;
        if let DedupeOutcome::Skipped { .. } = outcome {
            summary.skipped += 1;
        } else if outcome.removed() > 0 {
            summary.with_duplicates += 1;
            summary.removed += outcome.removed();
        }
    }
    Ok(summary)
}
