//! In-memory [`RemoteLibrary`] for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use bytes::Bytes;
use futures_util::StreamExt;

use super::{AlbumDetail, ItemDownload, RemoteAlbum, RemoteError, RemoteLibrary};
use crate::auth::Credential;

/// One canned item: optional suggested filename plus its bytes.
#[derive(Clone)]
pub struct FakeItem {
    pub filename: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Default)]
pub struct FakeLibrary {
    pub albums: Vec<RemoteAlbum>,
    pub details: HashMap<String, AlbumDetail>,
    pub items: HashMap<String, FakeItem>,
    /// Item ids whose fetch always fails with a 404.
    pub missing_items: Vec<String>,
    /// Item ids that fail with a 503 this many times before succeeding.
    pub flaky_items: Mutex<HashMap<String, u32>>,
    /// When set, only this secret is accepted; anything else is a 401.
    pub accepted_secret: Option<String>,
    pub item_fetches: AtomicUsize,
    pub detail_fetches: AtomicUsize,
}

impl FakeLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_album(mut self, id: &str, name: &str, ids: &[&str]) -> Self {
        self.albums.push(RemoteAlbum {
            id: id.to_string(),
            name: name.to_string(),
            declared_count: ids.len() as u64,
        });
        self.details.insert(
            id.to_string(),
            AlbumDetail {
                success: true,
                moments: encode_moments(ids),
                message: None,
            },
        );
        self
    }

    pub fn with_item(mut self, id: &str, filename: Option<&str>, body: &[u8]) -> Self {
        self.items.insert(
            id.to_string(),
            FakeItem {
                filename: filename.map(str::to_string),
                body: body.to_vec(),
            },
        );
        self
    }

    fn check(&self, credential: &Credential) -> Result<(), RemoteError> {
        match &self.accepted_secret {
            Some(secret) if credential.secret() != secret => {
                Err(RemoteError::from_status(401, "fake"))
            }
            _ => Ok(()),
        }
    }
}

/// Pack ids into 277-char records the way the server does.
pub fn encode_moments(ids: &[&str]) -> String {
    ids.iter()
        .map(|id| {
            format!(
                "{}{:0>16}{}",
                "M".repeat(9),
                id,
                "x".repeat(277 - 9 - 16)
            )
        })
        .collect()
}

#[async_trait::async_trait]
impl RemoteLibrary for FakeLibrary {
    async fn fetch_album_list(&self, credential: &Credential) -> Result<Vec<RemoteAlbum>, RemoteError> {
        self.check(credential)?;
        Ok(self.albums.clone())
    }

    async fn fetch_album_detail(
        &self,
        credential: &Credential,
        album_id: &str,
    ) -> Result<AlbumDetail, RemoteError> {
        self.check(credential)?;
        self.detail_fetches.fetch_add(1, Ordering::SeqCst);
        self.details
            .get(album_id)
            .cloned()
            .ok_or_else(|| RemoteError::from_status(404, "album.getAlbum"))
    }

    async fn fetch_item(&self, credential: &Credential, item_id: &str) -> Result<ItemDownload, RemoteError> {
        self.check(credential)?;
        self.item_fetches.fetch_add(1, Ordering::SeqCst);
        if self.missing_items.iter().any(|m| m == item_id) {
            return Err(RemoteError::from_status(404, "download"));
        }
        {
            let mut flaky = self.flaky_items.lock().unwrap();
            if let Some(left) = flaky.get_mut(item_id) {
                if *left > 0 {
                    *left -= 1;
                    return Err(RemoteError::from_status(503, "download"));
                }
            }
        }
        let item = self
            .items
            .get(item_id)
            .cloned()
            .ok_or_else(|| RemoteError::from_status(404, "download"))?;

        // Split the body so consumers see more than one chunk.
        let mid = item.body.len() / 2;
        let chunks = vec![
            Ok(Bytes::copy_from_slice(&item.body[..mid])),
            Ok(Bytes::copy_from_slice(&item.body[mid..])),
        ];
        Ok(ItemDownload {
            filename_hint: item.filename,
            body: futures_util::stream::iter(chunks).boxed(),
        })
    }
}
