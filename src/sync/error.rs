use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::thislife::RemoteError;

/// Failures surfaced by the sync engine.
///
/// Item-level errors are counted and logged by the orchestrator; only
/// `Auth` (once renewal is impossible) and listing failures end a run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error(transparent)]
    Remote(RemoteError),

    #[error("Filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Could not decode {0}")]
    Decode(String),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl SyncError {
    pub fn fs(path: &Path, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Transient transport failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote(e) => e.is_retryable(),
            _ => false,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, SyncError::Auth(_))
    }
}

impl From<RemoteError> for SyncError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::Auth(msg) => SyncError::Auth(msg),
            RemoteError::Decode { endpoint, reason } => {
                SyncError::Decode(format!("{}: {}", endpoint, reason))
            }
            other => SyncError::Remote(other),
        }
    }
}
