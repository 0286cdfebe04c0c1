//! Exclusive per-output-directory lock.

use std::path::{Path, PathBuf};

use anyhow::Context;
use fs4::fs_std::FileExt;

pub const LOCK_FILE_NAME: &str = ".sflypd.lock";

/// Held for the whole run; dropping it releases the advisory lock.
#[derive(Debug)]
pub struct InstanceLock {
    _file: std::fs::File,
    path: PathBuf,
}

impl InstanceLock {
    /// Create `output_dir` if needed and take the lock inside it.
    pub async fn acquire(output_dir: &Path) -> anyhow::Result<Self> {
        let output_dir = output_dir.to_path_buf();
        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&output_dir).with_context(|| {
                format!("Failed to create output directory: {}", output_dir.display())
            })?;
            let path = output_dir.join(LOCK_FILE_NAME);
            let file = std::fs::File::create(&path)
                .with_context(|| format!("Failed to create lock file: {}", path.display()))?;
            file.try_lock_exclusive().map_err(|_| {
                anyhow::anyhow!(
                    "Another sflypd-rs instance is running for this directory (lock: {})",
                    path.display()
                )
            })?;
            Ok(Self { _file: file, path })
        })
        .await?
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
