//! Token claims as the database sees them
//!
//! The database trusts a signed token carrying `sub`, `aud`, `role` and
//! `exp`. The identity provider's template decides what actually ends up in
//! the payload, so claims are kept as a loose JSON map and read leniently.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::OnceLock;
use uuid::Uuid;

/// Lowercase 8-4-4-4-12 hex groups.
const UUID_SHAPE: &str = r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$";

/// Claims the database needs to accept a token.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ClaimName {
    /// Subject (user id)
    Sub,
    /// Expiration time
    Exp,
    /// Audience
    Aud,
}

impl ClaimName {
    /// Required claims, in reporting order.
    pub const REQUIRED: [ClaimName; 3] = [ClaimName::Sub, ClaimName::Exp, ClaimName::Aud];

    /// Get the claim key.
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimName::Sub => "sub",
            ClaimName::Exp => "exp",
            ClaimName::Aud => "aud",
        }
    }
}

impl std::fmt::Display for ClaimName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Join claim names for messages, e.g. `exp, aud`.
pub fn join_claim_names(names: &[ClaimName]) -> String {
    names
        .iter()
        .map(ClaimName::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Audience claim: a single string or a list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Audience {
    /// One audience
    Single(String),
    /// Several audiences
    Many(Vec<String>),
}

impl Audience {
    /// Check if the audience includes `aud`.
    pub fn contains(&self, aud: &str) -> bool {
        match self {
            Audience::Single(a) => a == aud,
            Audience::Many(list) => list.iter().any(|a| a == aud),
        }
    }
}

impl std::fmt::Display for Audience {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Audience::Single(a) => write!(f, "{}", a),
            Audience::Many(list) => write!(f, "{}", list.join(", ")),
        }
    }
}

/// Decoded token payload.
///
/// A claim holding `null`, `false`, zero or an empty string counts as absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenClaims {
    raw: Map<String, Value>,
}

impl TokenClaims {
    /// Wrap a decoded JSON object.
    pub fn from_map(raw: Map<String, Value>) -> Self {
        Self { raw }
    }

    /// Get a claim, treating empty values as absent.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.raw.get(key).filter(|v| is_present(v))
    }

    /// Check whether a claim is present.
    pub fn has_claim(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Subject as a string. Non-string subjects are rendered as JSON.
    pub fn sub(&self) -> Option<String> {
        self.get("sub").map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// Expiration (Unix seconds).
    pub fn exp(&self) -> Option<i64> {
        self.get("exp").and_then(as_seconds)
    }

    /// Issued at (Unix seconds).
    pub fn iat(&self) -> Option<i64> {
        self.get("iat").and_then(as_seconds)
    }

    /// Audience.
    pub fn aud(&self) -> Option<Audience> {
        self.get("aud")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Database role (`authenticated` for signed-in users).
    pub fn role(&self) -> Option<&str> {
        self.get("role").and_then(Value::as_str)
    }

    /// User email.
    pub fn email(&self) -> Option<&str> {
        self.get("email").and_then(Value::as_str)
    }

    /// Expiration as DateTime.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp().and_then(|ts| DateTime::from_timestamp(ts, 0))
    }

    /// Issued at as DateTime.
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.iat().and_then(|ts| DateTime::from_timestamp(ts, 0))
    }

    /// Check if the token is expired at `now`. Tokens without `exp` never are.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.exp().map(|exp| now.timestamp() >= exp).unwrap_or(false)
    }

    /// Required claims that are absent, in `sub, exp, aud` order.
    pub fn missing_required(&self) -> Vec<ClaimName> {
        ClaimName::REQUIRED
            .into_iter()
            .filter(|name| !self.has_claim(name.as_str()))
            .collect()
    }

    /// The underlying JSON object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.raw
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn as_seconds(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f.trunc() as i64))
}

fn uuid_shape() -> &'static Regex {
    static SHAPE: OnceLock<Regex> = OnceLock::new();
    SHAPE.get_or_init(|| Regex::new(UUID_SHAPE).expect("UUID shape pattern is valid"))
}

/// Check whether `value` is a lowercase hyphenated UUID.
pub fn is_uuid_shaped(value: &str) -> bool {
    uuid_shape().is_match(value)
}

/// Parse a hyphenated UUID in either case.
///
/// Simple, braced and URN forms are rejected; the database stores subjects
/// in the hyphenated form.
pub fn parse_hyphenated_uuid(value: &str) -> Option<Uuid> {
    if value.len() != 36 {
        return None;
    }
    Uuid::parse_str(value).ok()
}

/// The UUID to use as the database subject for an identity-provider user id.
///
/// Hyphenated UUIDs are returned as is (normalised to lowercase); anything
/// else maps to a stable name-based (v5) UUID, so the same user id always
/// yields the same subject.
pub fn derive_subject_uuid(value: &str) -> Uuid {
    parse_hyphenated_uuid(value)
        .unwrap_or_else(|| Uuid::new_v5(&Uuid::NAMESPACE_DNS, value.as_bytes()))
}
