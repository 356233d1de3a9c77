//! Session installation into the database auth client
//!
//! The installer hands a validated token to the database client's
//! session-setting primitive, then reads the session back to make sure it
//! actually stuck. Failures are classified precisely enough for an operator
//! to fix the root cause; nothing is retried here.

use crate::claims::{join_claim_names, ClaimName};
use crate::error::{ErrorKind, Failure, ProviderError, ProviderResult};
use crate::token::{decode_payload, redact_prefix, RawToken};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Workaround for database auth clients that reject an empty refresh token.
///
/// The access token is passed as the refresh token too. This carries no
/// security meaning: the database never gets a real refresh token from this
/// bridge. Delete this once the client accepts a missing refresh token.
pub fn mirrored_refresh_token(access_token: &RawToken) -> RawToken {
    access_token.clone()
}

/// Tokens handed to the session-setting primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTokens {
    /// Access token
    pub access_token: RawToken,

    /// Refresh token
    pub refresh_token: RawToken,
}

impl SessionTokens {
    /// Build the pair for `access_token`, using [`mirrored_refresh_token`].
    pub fn for_access_token(access_token: &RawToken) -> Self {
        Self {
            access_token: access_token.clone(),
            refresh_token: mirrored_refresh_token(access_token),
        }
    }
}

/// User attached to a database session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    /// User id
    pub id: String,

    /// User email
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// A live database session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Access token
    pub access_token: RawToken,

    /// Refresh token
    pub refresh_token: Option<RawToken>,

    /// Expiration (Unix seconds)
    pub expires_at: Option<i64>,

    /// Session user
    pub user: Option<SessionUser>,
}

impl Session {
    /// Check if the session is expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .map(|exp| now.timestamp() >= exp)
            .unwrap_or(false)
    }

    /// A copy safe to log or display.
    pub fn redacted(&self) -> SessionSnapshot {
        SessionSnapshot {
            access_token: redact_prefix(self.access_token.as_str()),
            refresh_token: if self.refresh_token.is_some() {
                TokenPresence::Present
            } else {
                TokenPresence::Missing
            },
            expires_at: self
                .expires_at
                .and_then(|ts| DateTime::from_timestamp(ts, 0)),
            user: self.user.clone(),
        }
    }
}

/// Whether a secret is present, without revealing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenPresence {
    /// Present
    Present,
    /// Missing
    Missing,
}

/// Redacted view of a [`Session`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Redacted access token
    pub access_token: String,

    /// Whether a refresh token is stored
    pub refresh_token: TokenPresence,

    /// Expiration time
    pub expires_at: Option<DateTime<Utc>>,

    /// Session user
    pub user: Option<SessionUser>,
}

/// Database auth capability.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Install `tokens` as the current session.
    async fn set_session(&self, tokens: SessionTokens) -> ProviderResult<()>;

    /// Read the current session, if any.
    async fn current_session(&self) -> ProviderResult<Option<Session>>;
}

/// Final signal of one authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionResult {
    /// The database has a live, queryable session
    Active,

    /// The attempt failed
    Failed(Failure),

    /// The caller abandoned the attempt
    Cancelled,
}

impl SessionResult {
    /// Check if the session is active.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionResult::Active)
    }

    /// The failure, if the attempt failed.
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            SessionResult::Failed(f) => Some(f),
            _ => None,
        }
    }

    /// The failure kind, if the attempt failed.
    pub fn kind(&self) -> Option<ErrorKind> {
        self.failure().map(|f| f.kind)
    }
}

impl From<Result<Session, Failure>> for SessionResult {
    fn from(result: Result<Session, Failure>) -> Self {
        match result {
            Ok(_) => SessionResult::Active,
            Err(f) => SessionResult::Failed(f),
        }
    }
}

/// Installs validated tokens as the database session.
#[derive(Clone)]
pub struct SessionInstaller {
    backend: Arc<dyn SessionBackend>,
}

impl std::fmt::Debug for SessionInstaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionInstaller").finish_non_exhaustive()
    }
}

impl SessionInstaller {
    /// Create an installer over `backend`.
    pub fn new(backend: Arc<dyn SessionBackend>) -> Self {
        Self { backend }
    }

    /// Set the session and confirm it is readable.
    pub async fn install(&self, token: &RawToken) -> Result<Session, Failure> {
        self.set(token).await?;
        self.confirm().await
    }

    /// Hand `token` to the session-setting primitive.
    pub async fn set(&self, token: &RawToken) -> Result<(), Failure> {
        debug!(token_prefix = %token.redacted(), "Setting database session");

        self.backend
            .set_session(SessionTokens::for_access_token(token))
            .await
            .map_err(|e| {
                let failure = classify_set_session_error(token, &e);
                warn!(kind = %failure.kind, error = %e, "Database rejected the session");
                failure
            })
    }

    /// Read the session back after setting it.
    pub async fn confirm(&self) -> Result<Session, Failure> {
        match self.backend.current_session().await {
            Ok(Some(session)) => {
                debug!(session = ?session.redacted(), "Database session confirmed");
                Ok(session)
            }
            Ok(None) => {
                warn!("Database session missing immediately after being set");
                Err(Failure::new(
                    ErrorKind::SessionNotPersisted,
                    "session missing immediately after being set",
                ))
            }
            Err(e) if e.is_transport() => {
                warn!(error = %e, "Could not read the database session back");
                Err(Failure::new(
                    ErrorKind::NetworkOrFetchError,
                    format!("could not reach the database auth service: {}", e.message()),
                ))
            }
            Err(e) => {
                warn!(error = %e, "Could not read the database session back");
                Err(Failure::new(
                    ErrorKind::SessionNotPersisted,
                    format!("session could not be read back after being set: {}", e.message()),
                ))
            }
        }
    }
}

/// Classify a session-setting error, re-reading the token for missing claims.
pub fn classify_set_session_error(token: &RawToken, error: &ProviderError) -> Failure {
    let missing: Vec<ClaimName> = decode_payload(token.as_str())
        .map(|claims| claims.missing_required())
        .unwrap_or_default();

    if !missing.is_empty() {
        return Failure::new(
            ErrorKind::MissingClaims,
            format!(
                "token is missing required claims: {} (database said: {})",
                join_claim_names(&missing),
                error.message()
            ),
        );
    }

    if error.is_transport() {
        return Failure::new(
            ErrorKind::NetworkOrFetchError,
            format!("could not reach the database auth service: {}", error.message()),
        );
    }

    Failure::new(ErrorKind::GenericSessionError, error.message())
}
