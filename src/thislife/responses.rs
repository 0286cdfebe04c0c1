//! Response shapes for the ThisLife JSON-RPC endpoints.
//!
//! Only the fields the sync engine reads are modelled; everything else in the
//! payloads is ignored. Missing required fields surface as a decode error at
//! this boundary instead of deep inside the reconciler.

use serde::Deserialize;
use serde_json::Value;

use super::{AlbumDetail, RemoteAlbum};

/// Outer `{"result": {...}, "id": ..., "error": ...}` envelope.
#[derive(Debug, Deserialize)]
pub struct RpcEnvelope {
    pub result: RpcResult,
}

#[derive(Debug, Deserialize)]
pub struct RpcResult {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
}

/// One entry of `album.getAlbums`: the caller's permission on a story.
#[derive(Debug, Deserialize)]
pub struct StoryPermission {
    pub story: Story,
}

#[derive(Debug, Deserialize)]
pub struct Story {
    pub uid: String,
    pub name: String,
    #[serde(default)]
    pub visible_moment_count: u64,
}

/// `album.getAlbum` payload. `moments` is the packed record blob.
#[derive(Debug, Deserialize)]
pub struct StoryDetail {
    #[serde(default)]
    pub moments: Option<String>,
}

/// The server's message when `body` is a well-formed envelope with
/// `success == false`. Anything else, including bodies that don't parse,
/// is `None` and left to the typed parsers.
pub fn rpc_rejection(body: &Value) -> Option<String> {
    let result = body.get("result")?;
    if result.get("success")?.as_bool()? {
        return None;
    }
    Some(
        result
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error")
            .to_string(),
    )
}

/// Decode an `album.getAlbums` body into the album list.
///
/// The payload is an array of arrays; the first holds the story permissions,
/// the rest are unrelated listings.
pub fn parse_album_list(body: Value) -> Result<Vec<RemoteAlbum>, String> {
    let envelope: RpcEnvelope = serde_json::from_value(body).map_err(|e| e.to_string())?;
    let result = envelope.result;
    if !result.success {
        return Err(format!(
            "Failed to get albums: {}",
            result.message.as_deref().unwrap_or("Unknown error")
        ));
    }

    let first = match result.payload {
        Some(Value::Array(mut groups)) if !groups.is_empty() => groups.swap_remove(0),
        Some(Value::Array(_)) => return Ok(Vec::new()),
        Some(other) => return Err(format!("Unexpected album list payload: {}", other)),
        None => return Err("Album list response has no payload".to_string()),
    };

    let permissions: Vec<StoryPermission> =
        serde_json::from_value(first).map_err(|e| e.to_string())?;

    Ok(permissions
        .into_iter()
        .map(|p| RemoteAlbum {
            id: p.story.uid,
            name: p.story.name,
            declared_count: p.story.visible_moment_count,
        })
        .collect())
}

/// Decode an `album.getAlbum` body. `success == false` is not an error here;
/// the orchestrator reports it and skips the album.
pub fn parse_album_detail(body: Value) -> Result<AlbumDetail, String> {
    let envelope: RpcEnvelope = serde_json::from_value(body).map_err(|e| e.to_string())?;
    let result = envelope.result;
    if !result.success {
        return Ok(AlbumDetail {
            success: false,
            moments: String::new(),
            message: result.message,
        });
    }

    let moments = match result.payload {
        Some(payload) => {
            let detail: StoryDetail =
                serde_json::from_value(payload).map_err(|e| e.to_string())?;
            detail.moments.unwrap_or_default()
        }
        None => String::new(),
    };

    Ok(AlbumDetail {
        success: true,
        moments,
        message: result.message,
    })
}

/// Pull the suggested filename out of a `Content-Disposition` header.
///
/// Accepts `filename="x.jpg"`, `filename=x.jpg` and the RFC 5987
/// `filename*=UTF-8''x.jpg` form (the extended form wins when both exist).
pub fn filename_from_content_disposition(header: &str) -> Option<String> {
    let mut plain = None;
    let mut extended = None;

    for part in header.split(';') {
        let part = part.trim();
        if let Some(value) = part.strip_prefix("filename*=") {
            let value = value.trim_matches(|c| c == '"' || c == '\'');
            let value = match value.split_once("''") {
                Some((_charset, rest)) => rest,
                None => value,
            };
            extended = Some(percent_decode(value));
        } else if let Some(value) = part.strip_prefix("filename=") {
            plain = Some(value.trim_matches(|c| c == '"' || c == '\'').to_string());
        }
    }

    extended.or(plain).filter(|name| !name.is_empty())
}

/// Decode `%XX` escapes. `+` and other reserved characters pass through
/// unchanged; invalid UTF-8 is replaced rather than rejected.
pub fn percent_decode(value: &str) -> String {
    percent_encoding::percent_decode_str(value)
        .decode_utf8_lossy()
        .into_owned()
}
