//! ThisLife credentials and in-run renewal.
//!
//! A [`Credential`] is passed explicitly into every remote call. When the
//! server rejects it, [`CredentialStore::call`] asks its
//! [`CredentialRenewal`] for a replacement and re-issues the call. Renewals
//! are bounded per run; once a renewal is refused the store is revoked and
//! every later call fails fast with an auth error.

pub mod token;

use std::future::Future;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use tokio::sync::{Mutex, RwLock};

pub use self::token::Credential;
use crate::thislife::RemoteError;

/// Renewals allowed before the store gives up for the rest of the run.
pub const MAX_RENEWALS: u32 = 3;

/// Supplies a fresh credential after the current one was rejected.
#[async_trait::async_trait]
pub trait CredentialRenewal: Send + Sync {
    /// Return a replacement, or `None` when no new credential can be had.
    async fn renew(&self, expired: &Credential) -> Option<Credential>;
}

/// Never renews.
#[cfg(test)]
pub struct NoRenewal;

#[cfg(test)]
#[async_trait::async_trait]
impl CredentialRenewal for NoRenewal {
    async fn renew(&self, _expired: &Credential) -> Option<Credential> {
        None
    }
}

/// Picks up a replacement token from `token_file`, or asks for one on the
/// terminal.
///
/// The file is read once and deleted, so a stale token is never reused on
/// the next renewal. Without a terminal only the file is consulted.
pub struct PromptRenewal {
    token_file: PathBuf,
}

impl PromptRenewal {
    pub fn new(token_file: impl Into<PathBuf>) -> Self {
        Self {
            token_file: token_file.into(),
        }
    }
}

/// Read, trim and delete a saved token. `None` when the file is absent,
/// empty or unreadable.
async fn take_token_file(path: &Path) -> Option<String> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!("Failed to read {}: {}", path.display(), e);
            return None;
        }
    };
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!("Failed to remove {}: {}", path.display(), e);
    }
    let token = content.trim();
    if token.is_empty() {
        tracing::warn!("{} is empty", path.display());
        return None;
    }
    tracing::info!("Read new access token from {}", path.display());
    Some(token.to_string())
}

#[async_trait::async_trait]
impl CredentialRenewal for PromptRenewal {
    async fn renew(&self, _expired: &Credential) -> Option<Credential> {
        if let Some(token) = take_token_file(&self.token_file).await {
            return Some(Credential::parse(&token));
        }
        if !std::io::stdin().is_terminal() {
            tracing::error!(
                "Access token rejected and stdin is not a terminal; save a new token to {} and re-run",
                self.token_file.display()
            );
            return None;
        }
        let prompt = format!(
            "Access token expired. Paste a new token, or save it to {} and press Enter: ",
            self.token_file.display()
        );
        let entered = tokio::task::spawn_blocking(move || rpassword::prompt_password(prompt).ok())
            .await
            .ok()
            .flatten()?;
        let entered = entered.trim();
        if !entered.is_empty() {
            return Some(Credential::parse(entered));
        }
        match take_token_file(&self.token_file).await {
            Some(token) => Some(Credential::parse(&token)),
            None => {
                tracing::warn!("No token provided");
                None
            }
        }
    }
}

/// Shared holder of the current credential.
pub struct CredentialStore {
    current: RwLock<Credential>,
    renewal: Box<dyn CredentialRenewal>,
    renewals: AtomicU32,
    revoked: AtomicBool,
    /// Serializes renewals so concurrent item tasks that fail together
    /// trigger a single prompt.
    renew_lock: Mutex<()>,
}

impl CredentialStore {
    pub fn new(credential: Credential, renewal: Box<dyn CredentialRenewal>) -> Self {
        Self {
            current: RwLock::new(credential),
            renewal,
            renewals: AtomicU32::new(0),
            revoked: AtomicBool::new(false),
            renew_lock: Mutex::new(()),
        }
    }

    pub async fn current(&self) -> Credential {
        self.current.read().await.clone()
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::SeqCst)
    }

    pub fn renewals(&self) -> u32 {
        self.renewals.load(Ordering::SeqCst)
    }

    /// Run `op` with the current credential, renewing and re-issuing on
    /// auth failure. Renewals don't consume the caller's retry budget.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, RemoteError>
    where
        F: Fn(Credential) -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        loop {
            if self.is_revoked() {
                return Err(RemoteError::Auth(
                    "credential was rejected and could not be renewed".to_string(),
                ));
            }
            let credential = self.current().await;
            let result = if credential.is_expired() {
                Err(RemoteError::Auth("access token has expired".to_string()))
            } else {
                op(credential.clone()).await
            };
            match result {
                Err(e) if e.is_auth() => {
                    tracing::warn!("Credential rejected: {}", e);
                    if !self.renew(&credential).await {
                        return Err(e);
                    }
                }
                other => return other,
            }
        }
    }

    /// Replace `stale` with a renewed credential. Returns whether the caller
    /// should try again.
    async fn renew(&self, stale: &Credential) -> bool {
        let _guard = self.renew_lock.lock().await;
        if self.is_revoked() {
            return false;
        }
        if *self.current.read().await != *stale {
            // Another task already renewed while we waited.
            return true;
        }
        if self.renewals() >= MAX_RENEWALS {
            tracing::error!("Giving up after {} credential renewals", MAX_RENEWALS);
            self.revoked.store(true, Ordering::SeqCst);
            return false;
        }
        match self.renewal.renew(stale).await {
            Some(fresh) => {
                self.renewals.fetch_add(1, Ordering::SeqCst);
                *self.current.write().await = fresh;
                tracing::info!("Access token updated");
                true
            }
            None => {
                self.revoked.store(true, Ordering::SeqCst);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    /// Hands out `fresh-1`, `fresh-2`, ... and counts calls.
    struct CountingRenewal {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl CredentialRenewal for CountingRenewal {
        async fn renew(&self, _expired: &Credential) -> Option<Credential> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Some(Credential::parse(&format!("fresh-{}", n)))
        }
    }

    fn counting_store(initial: &str) -> (CredentialStore, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = CredentialStore::new(
            Credential::parse(initial),
            Box::new(CountingRenewal {
                calls: calls.clone(),
            }),
        );
        (store, calls)
    }

    #[tokio::test]
    async fn test_call_passes_current_credential() {
        let (store, calls) = counting_store("tok");
        let seen = store
            .call(|c| async move { Ok::<_, RemoteError>(c.secret().to_string()) })
            .await
            .unwrap();
        assert_eq!(seen, "tok");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_auth_failure_renews_and_retries() {
        let (store, calls) = counting_store("stale");
        let seen = store
            .call(|c| async move {
                if c.secret() == "stale" {
                    Err(RemoteError::Auth("401".into()))
                } else {
                    Ok(c.secret().to_string())
                }
            })
            .await
            .unwrap();
        assert_eq!(seen, "fresh-1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.renewals(), 1);
    }

    #[tokio::test]
    async fn test_non_auth_error_is_returned_without_renewal() {
        let (store, calls) = counting_store("tok");
        let err = store
            .call(|_| async { Err::<(), _>(RemoteError::from_status(500, "x")) })
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_renewals_are_bounded_then_revoked() {
        let (store, calls) = counting_store("tok");
        let err = store
            .call(|_| async { Err::<(), _>(RemoteError::Auth("always".into())) })
            .await
            .unwrap_err();
        assert!(err.is_auth());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_RENEWALS as usize);
        assert!(store.is_revoked());

        // Revoked stores fail fast without invoking the operation.
        let invoked = Arc::new(AtomicUsize::new(0));
        let inv = invoked.clone();
        let err = store
            .call(move |_| {
                let inv = inv.clone();
                async move {
                    inv.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, RemoteError>(())
                }
            })
            .await
            .unwrap_err();
        assert!(err.is_auth());
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_renewal_revokes_immediately() {
        let store = CredentialStore::new(Credential::parse("tok"), Box::new(NoRenewal));
        let err = store
            .call(|_| async { Err::<(), _>(RemoteError::Auth("nope".into())) })
            .await
            .unwrap_err();
        assert!(err.is_auth());
        assert!(store.is_revoked());
    }

    #[tokio::test]
    async fn test_expired_credential_renewed_before_call() {
        use base64::Engine;
        let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(br#"{"exp": 1000000000}"#);
        let expired = format!("h.{}.s", payload);
        let (store, calls) = counting_store(&expired);
        let seen = store
            .call(|c| async move { Ok::<_, RemoteError>(c.secret().to_string()) })
            .await
            .unwrap();
        assert_eq!(seen, "fresh-1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_token_file_is_read_once_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.txt");
        std::fs::write(&path, "  saved-token\n").unwrap();
        assert_eq!(take_token_file(&path).await.as_deref(), Some("saved-token"));
        assert!(!path.exists());
        assert_eq!(take_token_file(&path).await, None);

        std::fs::write(&path, "\n").unwrap();
        assert_eq!(take_token_file(&path).await, None);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_prompt_renewal_prefers_token_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.txt");
        std::fs::write(&path, "from-file\n").unwrap();
        let store = CredentialStore::new(
            Credential::parse("stale"),
            Box::new(PromptRenewal::new(&path)),
        );
        let seen = store
            .call(|c| async move {
                if c.secret() == "stale" {
                    Err(RemoteError::Auth("401".into()))
                } else {
                    Ok(c.secret().to_string())
                }
            })
            .await
            .unwrap();
        assert_eq!(seen, "from-file");
        assert_eq!(store.renewals(), 1);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_concurrent_failures_renew_once() {
        let (store, calls) = counting_store("stale");
        let store = Arc::new(store);
        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .call(|c| async move {
                        if c.secret() == "stale" {
                            Err(RemoteError::Auth("401".into()))
                        } else {
                            Ok(())
                        }
                    })
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
