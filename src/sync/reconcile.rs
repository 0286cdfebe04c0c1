//! Remote album inventory versus local directory state.
//!
//! Pure classification: nothing here touches the network or mutates the
//! output directory.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;

use super::dedupe::local_files;
use super::error::SyncError;
use super::naming::{album_dir, album_key};
use crate::thislife::RemoteAlbum;

/// Local file counts per album directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalSnapshot {
    counts: BTreeMap<String, usize>,
}

impl LocalSnapshot {
    /// Count regular files in each subdirectory of `output_dir`.
    /// A missing output directory is an empty snapshot.
    pub fn scan(output_dir: &Path) -> Result<Self, SyncError> {
        let mut counts = BTreeMap::new();
        let entries = match std::fs::read_dir(output_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(SyncError::fs(output_dir, e)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| SyncError::fs(output_dir, e))?;
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let count = local_files(&entry.path())?.len();
            counts.insert(name, count);
        }
        Ok(Self { counts })
    }

    #[cfg(test)]
    pub fn from_counts<I, S>(counts: I) -> Self
    where
        I: IntoIterator<Item = (S, usize)>,
        S: Into<String>,
    {
        Self {
            counts: counts.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn count(&self, key: &str) -> Option<usize> {
        self.counts.get(key).copied()
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlbumStatus {
    /// At least as many local files as the server declares.
    Complete { surplus: u64 },
    Incomplete { missing: u64 },
    /// No local directory.
    Missing,
}

impl AlbumStatus {
    pub fn needs_repair(self) -> bool {
        !matches!(self, AlbumStatus::Complete { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumState {
    pub album: RemoteAlbum,
    pub key: String,
    pub local: Option<usize>,
    pub status: AlbumStatus,
}

impl AlbumState {
    /// Items the repair would fetch at most: the gap, or the whole album.
    pub fn missing(&self) -> u64 {
        match self.status {
            AlbumStatus::Complete { .. } => 0,
            AlbumStatus::Incomplete { missing } => missing,
            AlbumStatus::Missing => self.album.declared_count,
        }
    }
}

/// A local directory no remote album maps to. Reported, never deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraLocal {
    pub key: String,
    pub count: usize,
}

/// Album names excluded from repair. Matches the raw name or its album key.
#[derive(Debug, Clone, Default)]
pub struct IgnoreSet {
    names: HashSet<String>,
}

impl IgnoreSet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::default();
        set.extend(names);
        set
    }

    pub fn extend<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names.extend(
            names
                .into_iter()
                .map(|n| {
                    let n: String = n.into();
                    n.trim().to_string()
                })
                .filter(|n| !n.is_empty()),
        );
    }

    /// Merge `ignore_albums.txt`-style content: one name per line, blank
    /// lines skipped.
    pub fn extend_from_lines(&mut self, content: &str) {
        self.extend(content.lines());
    }

    pub fn contains(&self, album_name: &str) -> bool {
        self.names.contains(album_name) || self.names.contains(&album_key(album_name))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairItem {
    pub album: RemoteAlbum,
    pub missing: u64,
}

/// Albums to re-download, smallest declared count first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairPlan {
    pub items: Vec<RepairItem>,
    /// Names of albums that need repair but are ignored.
    pub ignored: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// One entry per remote album, in server order.
    pub albums: Vec<AlbumState>,
    /// Local directories with no remote album, sorted by key.
    pub extra_local: Vec<ExtraLocal>,
}

impl ReconcileReport {
    pub fn build(remote: &[RemoteAlbum], local: &LocalSnapshot) -> Self {
        let albums: Vec<AlbumState> = remote
            .iter()
            .map(|album| {
                let key = album_dir(&album.name, &album.id);
                let local_count = local.count(&key);
                let status = match local_count {
                    None => AlbumStatus::Missing,
                    Some(n) if (n as u64) < album.declared_count => AlbumStatus::Incomplete {
                        missing: album.declared_count - n as u64,
                    },
                    Some(n) => AlbumStatus::Complete {
                        surplus: n as u64 - album.declared_count,
                    },
                };
                AlbumState {
                    album: album.clone(),
                    key,
                    local: local_count,
                    status,
                }
            })
            .collect();

        let remote_keys: HashSet<&str> = albums.iter().map(|a| a.key.as_str()).collect();
        let extra_local = local
            .counts
            .iter()
            .filter(|(key, _)| !remote_keys.contains(key.as_str()))
            .map(|(key, count)| ExtraLocal {
                key: key.clone(),
                count: *count,
            })
            .collect();

        Self {
            albums,
            extra_local,
        }
    }

    pub fn repair_plan(&self, ignore: &IgnoreSet) -> RepairPlan {
        let mut plan = RepairPlan::default();
        for state in self.albums.iter().filter(|s| s.status.needs_repair()) {
            if ignore.contains(&state.album.name) {
                plan.ignored.push(state.album.name.clone());
                continue;
            }
            plan.items.push(RepairItem {
                album: state.album.clone(),
                missing: state.missing(),
            });
        }
        plan.items.sort_by_key(|item| item.album.declared_count);
        plan.ignored.sort();
        plan
    }

    pub fn server_total(&self) -> u64 {
        self.albums.iter().map(|a| a.album.declared_count).sum()
    }

    pub fn local_total(&self) -> u64 {
        let matched: usize = {
            let mut seen = HashSet::new();
            self.albums
                .iter()
                .filter(|a| seen.insert(a.key.as_str()))
                .filter_map(|a| a.local)
                .sum()
        };
        let extra: usize = self.extra_local.iter().map(|e| e.count).sum();
        (matched + extra) as u64
    }

    pub fn count_where(&self, pred: impl Fn(&AlbumStatus) -> bool) -> usize {
        self.albums.iter().filter(|a| pred(&a.status)).count()
    }
}

fn truncate(name: &str, max: usize) -> String {
    name.chars().take(max).collect()
}

impl fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "-".repeat(60);
        writeln!(f, "{}", rule)?;
        writeln!(f, "{:<40} {:<8} {:<8} Status", "Album Name", "Server", "Local")?;
        writeln!(f, "{}", rule)?;

        let mut rows: Vec<&AlbumState> = self.albums.iter().collect();
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        for state in rows {
            let local = state.local.map_or_else(|| "0".to_string(), |n| n.to_string());
            let status = match state.status {
                AlbumStatus::Complete { surplus: 0 } => "OK".to_string(),
                AlbumStatus::Complete { surplus } => format!("Extra {}", surplus),
                AlbumStatus::Incomplete { missing } => format!("Missing {}", missing),
                AlbumStatus::Missing => "Not downloaded".to_string(),
            };
            writeln!(
                f,
                "{:<40} {:<8} {:<8} {}",
                truncate(&state.key, 39),
                state.album.declared_count,
                local,
                status
            )?;
        }
        for extra in &self.extra_local {
            writeln!(
                f,
                "{:<40} {:<8} {:<8} Local only",
                truncate(&extra.key, 39),
                "?",
                extra.count
            )?;
        }

        let incomplete: Vec<&AlbumState> =
            self.albums.iter().filter(|a| a.status.needs_repair()).collect();
        let incomplete_items: u64 = incomplete.iter().map(|a| a.album.declared_count).sum();
        let server_total = self.server_total();
        let local_total = self.local_total();

        writeln!(f)?;
        writeln!(f, "Summary:")?;
        writeln!(f, "Total albums on server: {}", self.albums.len())?;
        writeln!(
            f,
            "Missing albums: {}",
            self.count_where(|s| matches!(s, AlbumStatus::Missing))
        )?;
        writeln!(f, "Extra local albums: {}", self.extra_local.len())?;
        writeln!(
            f,
            "Incomplete albums: {} ({} photos total)",
            incomplete.len(),
            incomplete_items
        )?;
        writeln!(f)?;
        writeln!(f, "Total photos on server: {}", server_total)?;
        writeln!(f, "Total photos locally: {}", local_total)?;
        writeln!(f, "Difference: {}", server_total as i64 - local_total as i64)?;

        if !incomplete.is_empty() {
            writeln!(f)?;
            writeln!(f, "Albums needing redownload:")?;
            let mut names: Vec<(&str, u64)> = incomplete
                .iter()
                .map(|a| (a.key.as_str(), a.album.declared_count))
                .collect();
            names.sort();
            for (name, count) in names {
                writeln!(f, "- {} ({} photos)", name, count)?;
            }
            writeln!(f)?;
            writeln!(
                f,
                "Use --fix-incomplete to redownload these {} albums",
                incomplete.len()
            )?;
        }
        Ok(())
    }
}
