//! ThisLife (Shutterfly) remote library access.
//!
//! The sync engine only sees the [`RemoteLibrary`] trait; [`ThisLifeClient`]
//! is the HTTP implementation used by the binary.

pub mod client;
pub mod error;
#[cfg(test)]
pub mod fake;
pub mod responses;

use bytes::Bytes;
use futures_util::stream::BoxStream;

use crate::auth::Credential;

pub use client::ThisLifeClient;
pub use error::RemoteError;

/// An album as listed by the server. `declared_count` is the server's
/// `visible_moment_count` and may disagree with the decoded moments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAlbum {
    pub id: String,
    pub name: String,
    pub declared_count: u64,
}

/// Result of `album.getAlbum`. `moments` is the packed record blob, empty
/// when the album has no items.
#[derive(Debug, Clone, Default)]
pub struct AlbumDetail {
    pub success: bool,
    pub moments: String,
    pub message: Option<String>,
}

pub type ByteStream = BoxStream<'static, Result<Bytes, RemoteError>>;

/// An item body in flight plus the filename the server suggested for it.
pub struct ItemDownload {
    pub filename_hint: Option<String>,
    pub body: ByteStream,
}

impl std::fmt::Debug for ItemDownload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemDownload")
            .field("filename_hint", &self.filename_hint)
            .finish_non_exhaustive()
    }
}

/// The three remote capabilities the sync engine needs.
#[async_trait::async_trait]
pub trait RemoteLibrary: Send + Sync {
    async fn fetch_album_list(&self, credential: &Credential)
        -> Result<Vec<RemoteAlbum>, RemoteError>;

    async fn fetch_album_detail(
        &self,
        credential: &Credential,
        album_id: &str,
    ) -> Result<AlbumDetail, RemoteError>;

    async fn fetch_item(
        &self,
        credential: &Credential,
        item_id: &str,
    ) -> Result<ItemDownload, RemoteError>;
}
