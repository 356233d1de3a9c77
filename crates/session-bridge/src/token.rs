//! Raw token handling
//!
//! Splitting, payload decoding and redaction for compact JWTs. Nothing here
//! verifies signatures; the database does that when it receives the token.

use crate::claims::TokenClaims;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::{alphabet, Engine};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Number of characters kept when a secret is redacted.
pub const REDACTED_PREFIX_LEN: usize = 10;

const LENIENT_PADDING: GeneralPurposeConfig =
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent);

// JWTs use the URL-safe alphabet; some issuers emit the standard one.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT_PADDING);
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT_PADDING);

/// Redact a secret down to its first few characters plus an ellipsis.
pub fn redact_prefix(secret: &str) -> String {
    let prefix: String = secret.chars().take(REDACTED_PREFIX_LEN).collect();
    format!("{}...", prefix)
}

/// Errors produced while decoding a token payload.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The token is not `header.payload.signature`
    #[error("token does not have three dot-separated segments (found {0})")]
    SegmentCount(usize),

    /// The payload segment is not base64
    #[error("payload segment is not valid base64: {0}")]
    Base64(String),

    /// The payload bytes are not a JSON object
    #[error("payload segment is not valid JSON: {0}")]
    Json(String),
}

/// An opaque compact token as handed out by the identity provider.
///
/// `Debug` only ever shows the redacted prefix.
#[derive(Clone, PartialEq, Eq)]
pub struct RawToken(String);

impl RawToken {
    /// Wrap a token string.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The full token. Do not log this.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the token string is empty.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// First characters of the token followed by an ellipsis.
    pub fn redacted(&self) -> String {
        redact_prefix(&self.0)
    }

    /// Dot-separated segments.
    pub fn segments(&self) -> Vec<&str> {
        self.0.split('.').collect()
    }

    /// Consume the wrapper.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Debug for RawToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RawToken").field(&self.redacted()).finish()
    }
}

impl From<String> for RawToken {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for RawToken {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

/// Decode the claims in the middle segment of a compact token.
pub fn decode_payload(token: &str) -> Result<TokenClaims, DecodeError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(DecodeError::SegmentCount(segments.len()));
    }

    let bytes = decode_segment(segments[1])?;
    let map: Map<String, Value> =
        serde_json::from_slice(&bytes).map_err(|e| DecodeError::Json(e.to_string()))?;

    Ok(TokenClaims::from_map(map))
}

fn decode_segment(segment: &str) -> Result<Vec<u8>, DecodeError> {
    URL_SAFE_LENIENT
        .decode(segment)
        .or_else(|_| STANDARD_LENIENT.decode(segment))
        .map_err(|e| DecodeError::Base64(e.to_string()))
}

/// Header fields worth showing in diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenHeaderInfo {
    /// Signing algorithm
    pub algorithm: String,

    /// Key id, if the issuer sets one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,

    /// Declared token type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

/// Best-effort read of the token header. `None` when it cannot be parsed.
pub fn inspect_header(token: &str) -> Option<TokenHeaderInfo> {
    let header = jsonwebtoken::decode_header(token).ok()?;
    Some(TokenHeaderInfo {
        algorithm: format!("{:?}", header.alg),
        key_id: header.kid,
        token_type: header.typ,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    fn hand_built(payload: &str) -> String {
        format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#),
            payload
        )
    }

    #[test]
    fn test_redact_prefix() {
        assert_eq!(redact_prefix("eyJhbGciOiJIUzI1NiJ9"), "eyJhbGciOi...");
        assert_eq!(redact_prefix("short"), "short...");
    }

    #[test]
    fn test_raw_token_debug_is_redacted() {
        let token = RawToken::new("eyJhbGciOiJIUzI1NiJ9.secret-payload.secret-signature");
        let debug = format!("{:?}", token);
        assert!(debug.contains("eyJhbGciOi..."));
        assert!(!debug.contains("secret-payload"));
    }

    #[test]
    fn test_decode_signed_token() {
        let token = encode(
            &Header::default(),
            &json!({"sub": "user_1", "exp": 2000000000_i64, "aud": "authenticated"}),
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();

        let claims = decode_payload(&token).unwrap();
        assert_eq!(claims.sub().as_deref(), Some("user_1"));
        assert_eq!(claims.exp(), Some(2000000000));
    }

    #[test]
    fn test_decode_standard_alphabet_with_padding() {
        let token = hand_built(&STANDARD.encode(r#"{"exp":123}"#));
        let claims = decode_payload(&token).unwrap();
        assert_eq!(claims.exp(), Some(123));
        assert_eq!(claims.sub(), None);
    }

    #[test]
    fn test_decode_segment_count() {
        assert_eq!(decode_payload("abc"), Err(DecodeError::SegmentCount(1)));
        assert_eq!(decode_payload("a.b"), Err(DecodeError::SegmentCount(2)));
        assert_eq!(decode_payload("a.b.c.d"), Err(DecodeError::SegmentCount(4)));
    }

    #[test]
    fn test_decode_bad_base64() {
        let result = decode_payload(&hand_built("!!not*base64!!"));
        assert!(matches!(result, Err(DecodeError::Base64(_))));
    }

    #[test]
    fn test_decode_non_json_payload() {
        let result = decode_payload(&hand_built(&URL_SAFE_NO_PAD.encode("not json")));
        assert!(matches!(result, Err(DecodeError::Json(_))));

        // A JSON array is not a claims object
        let result = decode_payload(&hand_built(&URL_SAFE_NO_PAD.encode("[1,2]")));
        assert!(matches!(result, Err(DecodeError::Json(_))));
    }

    #[test]
    fn test_inspect_header() {
        let mut header = Header::default();
        header.kid = Some("ins_123".to_string());
        let token = encode(
            &header,
            &json!({"sub": "x"}),
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();

        let info = inspect_header(&token).unwrap();
        assert_eq!(info.algorithm, "HS256");
        assert_eq!(info.key_id.as_deref(), Some("ins_123"));
        assert!(inspect_header("abc").is_none());
    }
}
