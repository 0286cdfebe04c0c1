use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::thislife::responses::percent_decode;

const SESSION_COOKIE_PREFIX: &str = "_thislife_session=";

/// Validity assumed for tokens whose expiry can't be read.
const DEFAULT_VALIDITY_SECS: i64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    AccessToken,
    SessionCookie,
}

/// The subset of JWT claims we read from a Shutterfly access token.
#[derive(Debug, Default, Deserialize)]
struct Claims {
    exp: Option<i64>,
    sfly_uid: Option<String>,
}

/// A ThisLife credential: either a bearer access token (usually a JWT) or
/// the value of a `_thislife_session` browser cookie.
///
/// Parsing never fails. A token that doesn't decode as a JWT is still used
/// as-is with a one-hour assumed validity.
#[derive(Clone)]
pub struct Credential {
    kind: CredentialKind,
    secret: String,
    user_id: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn parse(raw: &str) -> Self {
        Self::parse_at(raw, Utc::now())
    }

    fn parse_at(raw: &str, now: DateTime<Utc>) -> Self {
        let raw = raw.trim();
        if let Some(rest) = raw.strip_prefix(SESSION_COOKIE_PREFIX) {
            let value = rest.split(';').next().unwrap_or_default();
            return Self {
                kind: CredentialKind::SessionCookie,
                secret: percent_decode(value),
                user_id: None,
                expires_at: None,
            };
        }

        let token = raw.strip_prefix("Bearer ").unwrap_or(raw).trim();
        let claims = decode_claims(token);
        let expires_at = match &claims {
            Some(Claims { exp: Some(exp), .. }) => DateTime::from_timestamp(*exp, 0),
            _ => None,
        };
        if expires_at.is_none() {
            tracing::warn!(
                "Token doesn't carry a readable expiry; assuming it is valid for one hour"
            );
        }
        Self {
            kind: CredentialKind::AccessToken,
            secret: token.to_string(),
            user_id: claims.and_then(|c| c.sfly_uid).filter(|uid| !uid.is_empty()),
            expires_at: Some(expires_at.unwrap_or(now + Duration::seconds(DEFAULT_VALIDITY_SECS))),
        }
    }

    pub fn kind(&self) -> CredentialKind {
        self.kind
    }

    pub fn is_session_cookie(&self) -> bool {
        self.kind == CredentialKind::SessionCookie
    }

    /// The raw token, or the decoded cookie value.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// `Cookie` header value for session-cookie credentials.
    pub fn cookie_header(&self) -> Option<String> {
        self.is_session_cookie()
            .then(|| format!("{}{}", SESSION_COOKIE_PREFIX, self.secret))
    }

    /// The `sfly_uid` claim, when the token is a JWT that carries one.
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }
}

impl PartialEq for Credential {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.secret == other.secret
    }
}

impl Eq for Credential {}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("kind", &self.kind)
            .field("secret", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

fn decode_claims(token: &str) -> Option<Claims> {
    let mut parts = token.split('.');
    let (_header, payload, _sig) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let payload = payload.trim_end_matches('=');
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| base64::engine::general_purpose::STANDARD_NO_PAD.decode(payload))
        .ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(claims) => Some(claims),
        Err(e) => {
            tracing::debug!("Token payload is not JSON: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    fn jwt(claims: &serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{}.{}.signature", header, payload)
    }

    #[test]
    fn test_jwt_claims_are_read() {
        let token = jwt(&serde_json::json!({"exp": 4_000_000_000i64, "sfly_uid": "000000000000"}));
        let cred = Credential::parse(&token);
        assert_eq!(cred.kind(), CredentialKind::AccessToken);
        assert_eq!(cred.user_id(), Some("000000000000"));
        assert_eq!(cred.expires_at().unwrap().timestamp(), 4_000_000_000);
        assert!(!cred.is_expired());
        assert_eq!(cred.secret(), token);
    }

    #[test]
    fn test_expired_jwt() {
        let token = jwt(&serde_json::json!({"exp": 1_000_000_000i64}));
        let cred = Credential::parse(&token);
        assert!(cred.is_expired());
        assert_eq!(cred.user_id(), None);
    }

    #[test]
    fn test_opaque_token_gets_one_hour() {
        let now = Utc::now();
        let cred = Credential::parse_at("not-a-jwt", now);
        assert_eq!(cred.expires_at(), Some(now + Duration::hours(1)));
        assert!(!cred.is_expired_at(now + Duration::minutes(59)));
        assert!(cred.is_expired_at(now + Duration::hours(1)));
    }

    #[test]
    fn test_three_parts_with_garbage_payload_is_opaque() {
        let now = Utc::now();
        let cred = Credential::parse_at("a.!!!.c", now);
        assert_eq!(cred.expires_at(), Some(now + Duration::hours(1)));
        assert_eq!(cred.secret(), "a.!!!.c");
    }

    #[test]
    fn test_bearer_prefix_and_whitespace_stripped() {
        let cred = Credential::parse("  Bearer abc.def \n");
        assert_eq!(cred.secret(), "abc.def");
    }

    #[test]
    fn test_session_cookie() {
        let cred = Credential::parse("_thislife_session=abc%3D%3D; path=/");
        assert!(cred.is_session_cookie());
        assert_eq!(cred.secret(), "abc==");
        assert_eq!(cred.cookie_header().as_deref(), Some("_thislife_session=abc=="));
        assert!(!cred.is_expired());
        assert_eq!(cred.expires_at(), None);
    }

    #[test]
    fn test_session_cookie_value_with_ampersand() {
        let cred = Credential::parse("_thislife_session=a%2Bb&c+d");
        assert_eq!(cred.secret(), "a+b&c+d");
    }

    #[test]
    fn test_access_token_has_no_cookie_header() {
        assert!(Credential::parse("tok").cookie_header().is_none());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let cred = Credential::parse("super-secret-token");
        let debug = format!("{:?}", cred);
        assert!(!debug.contains("super-secret-token"));
        assert!(debug.contains("<redacted>"));
    }
}
