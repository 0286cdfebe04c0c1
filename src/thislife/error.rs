use thiserror::Error;

/// Typed failures from the ThisLife collaborator calls.
///
/// `is_retryable()` separates transient transport trouble (5xx, 429, dropped
/// connections) from failures another attempt cannot fix. `Auth` is never
/// retried by the backoff loop; the credential store renews and re-issues the
/// call instead.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Authentication rejected: {0}")]
    Auth(String),

    #[error("HTTP error {status} from {endpoint}")]
    HttpStatus { status: u16, endpoint: String },

    #[error("Transport error calling {endpoint}: {source}")]
    Http {
        source: reqwest::Error,
        endpoint: String,
    },

    #[error("Malformed response from {endpoint}: {reason}")]
    Decode { endpoint: String, reason: String },

    #[error("No ThisLife user id available; pass --life-uid or set LIFE_UID")]
    MissingUserId,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RemoteError {
    pub fn decode(endpoint: &str, reason: impl Into<String>) -> Self {
        Self::Decode {
            endpoint: endpoint.to_string(),
            reason: reason.into(),
        }
    }

    /// Map a non-success HTTP status to the matching variant.
    /// 401/403 mean the credential was refused.
    pub fn from_status(status: u16, endpoint: &str) -> Self {
        match status {
            401 | 403 => Self::Auth(format!("HTTP {status} from {endpoint}")),
            _ => Self::HttpStatus {
                status,
                endpoint: endpoint.to_string(),
            },
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            Self::Http { .. } => true,
            Self::Auth(_) | Self::Decode { .. } | Self::MissingUserId | Self::Io(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_401_and_403_are_auth() {
        assert!(RemoteError::from_status(401, "x").is_auth());
        assert!(RemoteError::from_status(403, "x").is_auth());
        assert!(!RemoteError::from_status(404, "x").is_auth());
    }

    #[test]
    fn test_server_errors_retryable() {
        assert!(RemoteError::from_status(500, "x").is_retryable());
        assert!(RemoteError::from_status(503, "x").is_retryable());
        assert!(RemoteError::from_status(429, "x").is_retryable());
    }

    #[test]
    fn test_client_errors_not_retryable() {
        assert!(!RemoteError::from_status(404, "x").is_retryable());
        assert!(!RemoteError::from_status(400, "x").is_retryable());
        assert!(!RemoteError::from_status(401, "x").is_retryable());
    }

    #[test]
    fn test_decode_and_io_not_retryable() {
        assert!(!RemoteError::decode("x", "missing field").is_retryable());
        assert!(!RemoteError::Io(std::io::Error::other("disk full")).is_retryable());
        assert!(!RemoteError::MissingUserId.is_retryable());
    }

    #[test]
    fn test_connection_error_retryable() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let err = rt
            .block_on(reqwest::Client::new().get("http://127.0.0.1:1").send())
            .unwrap_err();
        let e = RemoteError::Http {
            source: err,
            endpoint: "x".into(),
        };
        assert!(e.is_retryable());
    }
}
