use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_DISPOSITION, CONTENT_TYPE, COOKIE, ORIGIN, REFERER, USER_AGENT};
use reqwest::Client;
use serde_json::{json, Value};

use super::error::RemoteError;
use super::responses::{
    filename_from_content_disposition, parse_album_detail, parse_album_list, rpc_rejection,
};
use super::{AlbumDetail, ItemDownload, RemoteAlbum, RemoteLibrary};
use crate::auth::Credential;
use crate::retry::{self, RetryAction, RetryConfig};

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36";

/// Base URLs for the ThisLife services.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub rpc: String,
    pub download: String,
    pub origin: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            rpc: "https://cmd.thislife.com/json".to_string(),
            download: "https://io.thislife.com/download".to_string(),
            origin: "https://photos.shutterfly.com".to_string(),
        }
    }
}

/// reqwest-backed [`RemoteLibrary`].
///
/// JSON-RPC calls are retried with backoff on transient failures. Item
/// downloads are a single attempt; the orchestrator retries the whole
/// fetch-and-store step so a stream that dies halfway restarts cleanly.
pub struct ThisLifeClient {
    client: Client,
    endpoints: Endpoints,
    user_id: Option<String>,
    retry_config: RetryConfig,
    rpc_timeout: Duration,
}

impl ThisLifeClient {
    pub fn new(
        endpoints: Endpoints,
        user_id: Option<String>,
        retry_config: RetryConfig,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        // Origin/Referer are checked by the RPC endpoint.
        let mut default_headers = HeaderMap::new();
        default_headers.insert(ORIGIN, HeaderValue::from_str(&endpoints.origin)?);
        default_headers.insert(
            REFERER,
            HeaderValue::from_str(&format!("{}/", endpoints.origin))?,
        );
        default_headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));

        let client = Client::builder()
            .default_headers(default_headers)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            endpoints,
            user_id,
            retry_config,
            rpc_timeout: timeout,
        })
    }

    /// Explicit `--life-uid`, else the token's `sfly_uid` claim.
    fn resolve_user_id(&self, credential: &Credential) -> Result<String, RemoteError> {
        self.user_id
            .clone()
            .or_else(|| credential.user_id().map(str::to_string))
            .ok_or(RemoteError::MissingUserId)
    }

    fn auth_headers(credential: &Credential) -> Result<HeaderMap, RemoteError> {
        let mut headers = HeaderMap::new();
        if let Some(cookie) = credential.cookie_header() {
            let value = HeaderValue::from_str(&cookie)
                .map_err(|e| RemoteError::Auth(format!("session cookie is not a valid header: {}", e)))?;
            headers.insert(COOKIE, value);
        }
        Ok(headers)
    }

    /// POST one JSON-RPC call, retrying transient failures.
    async fn rpc(
        &self,
        credential: &Credential,
        method: &str,
        params: Value,
        sub_source: &str,
    ) -> Result<Value, RemoteError> {
        let url = format!("{}?method={}", self.endpoints.rpc, method);
        let body = json!({
            "method": method,
            "params": params,
            "headers": { "X-SFLY-SubSource": sub_source },
            "id": null,
        })
        .to_string();
        let headers = Self::auth_headers(credential)?;

        retry::retry_with_backoff(
            &self.retry_config,
            |e: &RemoteError| {
                if e.is_retryable() {
                    RetryAction::Retry
                } else {
                    RetryAction::Abort
                }
            },
            || async {
                tracing::debug!("POST {}", url);
                let response = self
                    .client
                    .post(&url)
                    .headers(headers.clone())
                    .header(CONTENT_TYPE, "application/x-www-form-urlencoded; charset=UTF-8")
                    .body(body.clone())
                    .timeout(self.rpc_timeout)
                    .send()
                    .await
                    .map_err(|e| RemoteError::Http {
                        source: e,
                        endpoint: method.to_string(),
                    })?;
                let status = response.status();
                if !status.is_success() {
                    return Err(RemoteError::from_status(status.as_u16(), method));
                }
                response.json::<Value>().await.map_err(|e| {
                    if e.is_decode() {
                        RemoteError::decode(method, e.to_string())
                    } else {
                        RemoteError::Http {
                            source: e,
                            endpoint: method.to_string(),
                        }
                    }
                })
            },
        )
        .await
    }

    fn download_url(&self, credential: &Credential, item_id: &str) -> Result<url::Url, RemoteError> {
        let mut url = url::Url::parse(&self.endpoints.download)
            .map_err(|e| RemoteError::decode("download", e.to_string()))?;
        {
            let mut query = url.query_pairs_mut();
            if !credential.is_session_cookie() {
                query.append_pair("accessToken", credential.secret());
            }
            query.append_pair("momentId", item_id);
            query.append_pair("source", "library");
        }
        Ok(url)
    }
}

/// Session-cookie credentials drop the leading token parameter.
fn with_token(credential: &Credential, rest: Vec<Value>) -> Value {
    let mut params = Vec::with_capacity(rest.len() + 1);
    if !credential.is_session_cookie() {
        params.push(Value::String(credential.secret().to_string()));
    }
    params.extend(rest);
    Value::Array(params)
}

/// `album.getAlbums` parameter layouts: the usual one, then the alternate
/// the server accepts for some accounts. Tokens swap places with the user
/// id; cookie sessions add a placeholder token.
fn album_list_params(credential: &Credential, user_id: &str) -> [Value; 2] {
    if credential.is_session_cookie() {
        [
            json!([user_id, null, null, true]),
            json!(["placeholder_token", user_id, null, null, true]),
        ]
    } else {
        let token = credential.secret();
        [
            json!([token, user_id, null, null, true]),
            json!([user_id, token, null, null, true]),
        ]
    }
}

#[async_trait::async_trait]
impl RemoteLibrary for ThisLifeClient {
    async fn fetch_album_list(&self, credential: &Credential) -> Result<Vec<RemoteAlbum>, RemoteError> {
        let user_id = self.resolve_user_id(credential)?;
        let [primary, alternate] = album_list_params(credential, &user_id);
        let mut body = self.rpc(credential, "album.getAlbums", primary, "library").await?;
        if let Some(reason) = rpc_rejection(&body) {
            tracing::debug!(
                "album.getAlbums rejected ({}), retrying with the alternate parameter order",
                reason
            );
            body = self.rpc(credential, "album.getAlbums", alternate, "library").await?;
        }
        let albums =
            parse_album_list(body).map_err(|reason| RemoteError::decode("album.getAlbums", reason))?;
        tracing::debug!("Server listed {} albums", albums.len());
        Ok(albums)
    }

    async fn fetch_album_detail(
        &self,
        credential: &Credential,
        album_id: &str,
    ) -> Result<AlbumDetail, RemoteError> {
        let params = with_token(
            credential,
            vec![
                Value::String(album_id.to_string()),
                Value::String("startupItem".to_string()),
                Value::Null,
                Value::Bool(false),
                Value::Bool(true),
                Value::Bool(true),
            ],
        );
        let body = self.rpc(credential, "album.getAlbum", params, "albums").await?;
        parse_album_detail(body).map_err(|reason| RemoteError::decode("album.getAlbum", reason))
    }

    async fn fetch_item(&self, credential: &Credential, item_id: &str) -> Result<ItemDownload, RemoteError> {
        let url = self.download_url(credential, item_id)?;
        let response = self
            .client
            .get(url)
            .headers(Self::auth_headers(credential)?)
            .send()
            .await
            .map_err(|e| RemoteError::Http {
                source: e,
                endpoint: "download".to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::from_status(status.as_u16(), "download"));
        }

        let filename_hint = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_content_disposition);

        let body = response
            .bytes_stream()
            .map(|chunk| {
                chunk.map_err(|e| RemoteError::Http {
                    source: e,
                    endpoint: "download".to_string(),
                })
            })
            .boxed();

        Ok(ItemDownload { filename_hint, body })
    }
}
