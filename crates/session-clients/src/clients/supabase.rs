//! Supabase auth and PostgREST client.
//!
//! Holds the database session for the bridge. A session is accepted only
//! after GoTrue confirms the access token (`GET /auth/v1/user`); it is then
//! kept in an in-process store and attached to PostgREST requests so
//! row-level-security policies see the signed-in user.

use super::config::ServiceEndpoint;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder};
use serde::{Deserialize, Serialize};
use session_bridge::{
    decode_payload, ProviderError, ProviderResult, Session, SessionBackend, SessionTokens,
    SessionUser,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

/// Key the session is stored under.
pub const SESSION_STORAGE_KEY: &str = "supabase-auth-token";

/// Table the dashboard keeps its users in.
const USERS_TABLE: &str = "users";

/// Supabase client errors.
#[derive(Debug, Error)]
pub enum SupabaseError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// GoTrue rejected the session.
    #[error("Auth error ({status}): {message}")]
    AuthError {
        /// HTTP status code.
        status: u16,
        /// Error message from GoTrue.
        message: String,
    },

    /// PostgREST returned an error response.
    #[error("API error ({status}): {message}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Error message from PostgREST.
        message: String,
    },

    /// Invalid response from the API.
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    /// No session has been set.
    #[error("No active session")]
    NoSession,
}

impl SupabaseError {
    /// Whether the request never produced a response.
    pub fn is_transport(&self) -> bool {
        match self {
            SupabaseError::RequestFailed(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            _ => false,
        }
    }
}

impl From<SupabaseError> for ProviderError {
    fn from(err: SupabaseError) -> Self {
        if err.is_transport() {
            return ProviderError::Transport(err.to_string());
        }
        match err {
            SupabaseError::AuthError { status, message }
            | SupabaseError::ApiError { status, message } => ProviderError::Api { status, message },
            other => ProviderError::Internal(other.to_string()),
        }
    }
}

/// A row of the `users` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRow {
    /// Primary key
    pub id: serde_json::Value,

    /// Identity provider user id
    pub clerk_id: String,

    /// Email address
    #[serde(default)]
    pub email: Option<String>,

    /// Creation time
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    /// Last update time
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct NewUser<'a> {
    clerk_id: &'a str,
    email: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct EmailUpdate<'a> {
    email: Option<&'a str>,
    updated_at: DateTime<Utc>,
}

/// User as returned by `GET /auth/v1/user`.
#[derive(Debug, Deserialize)]
struct GoTrueUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

/// Supabase client implementing the bridge's session capability.
#[derive(Clone)]
pub struct SupabaseAuthClient {
    /// HTTP client instance.
    client: Client,

    /// Project endpoint; `api_key` is the anon key.
    endpoint: ServiceEndpoint,

    /// In-process session storage.
    store: Arc<RwLock<HashMap<String, Session>>>,
}

impl std::fmt::Debug for SupabaseAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseAuthClient")
            .field("base_url", &self.endpoint.base_url)
            .finish_non_exhaustive()
    }
}

impl SupabaseAuthClient {
    /// Create a new Supabase client.
    pub fn new(endpoint: ServiceEndpoint, timeout: Duration) -> Result<Self, SupabaseError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint,
            store: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Project endpoint.
    pub fn endpoint(&self) -> &ServiceEndpoint {
        &self.endpoint
    }

    /// Confirm `tokens` with GoTrue and store the resulting session.
    #[instrument(skip(self, tokens), fields(token_prefix = %tokens.access_token.redacted()))]
    pub async fn set_session(&self, tokens: SessionTokens) -> Result<Session, SupabaseError> {
        let url = self.endpoint.url("/auth/v1/user");
        debug!("Confirming access token with {}", url);

        let response = self
            .request(Method::GET, "/auth/v1/user", tokens.access_token.as_str())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = error_message(&response.text().await.unwrap_or_default());
            warn!("Supabase auth rejected the session ({}): {}", status.as_u16(), message);
            return Err(SupabaseError::AuthError {
                status: status.as_u16(),
                message,
            });
        }

        let user: GoTrueUser = response
            .json()
            .await
            .map_err(|e| SupabaseError::InvalidResponse(e.to_string()))?;

        let expires_at = decode_payload(tokens.access_token.as_str())
            .ok()
            .and_then(|claims| claims.exp());

        let session = Session {
            access_token: tokens.access_token,
            refresh_token: Some(tokens.refresh_token),
            expires_at,
            user: Some(SessionUser {
                id: user.id,
                email: user.email,
            }),
        };

        self.store
            .write()
            .await
            .insert(SESSION_STORAGE_KEY.to_string(), session.clone());

        info!(session = ?session.redacted(), "Supabase session stored");
        Ok(session)
    }

    /// The stored session. Expired sessions are reported as absent.
    pub async fn session(&self) -> Option<Session> {
        let store = self.store.read().await;
        let session = store.get(SESSION_STORAGE_KEY)?;
        if session.is_expired_at(Utc::now()) {
            debug!("Stored Supabase session has expired");
            return None;
        }
        Some(session.clone())
    }

    /// Remove the stored session.
    pub async fn sign_out(&self) {
        if self.store.write().await.remove(SESSION_STORAGE_KEY).is_some() {
            info!("Supabase session removed");
        }
    }

    /// Run a trivial query against the users table.
    #[instrument(skip(self))]
    pub async fn simple_query(&self) -> Result<(), SupabaseError> {
        let bearer = self.bearer().await;
        let response = self
            .request(Method::GET, &format!("/rest/v1/{}", USERS_TABLE), &bearer)
            .query(&[("select", "count"), ("limit", "1")])
            .send()
            .await?;

        handle_response::<serde_json::Value>(response).await.map(|_| ())
    }

    /// Check there is a session and the database answers queries with it.
    #[instrument(skip(self))]
    pub async fn verify_connection(&self) -> Result<(), SupabaseError> {
        if self.session().await.is_none() {
            return Err(SupabaseError::NoSession);
        }
        self.simple_query().await
    }

    /// Create or update the user row for an identity provider user.
    ///
    /// Inserts when no row has `clerk_id`; updates `email` and `updated_at`
    /// when a new email is given and the stored one differs. A missing email
    /// never clears the stored one.
    #[instrument(skip(self, email))]
    pub async fn sync_user(
        &self,
        idp_user_id: &str,
        email: Option<&str>,
    ) -> Result<UserRow, SupabaseError> {
        let session = self.session().await.ok_or(SupabaseError::NoSession)?;
        let bearer = session.access_token.as_str();
        let table = format!("/rest/v1/{}", USERS_TABLE);
        let filter = format!("eq.{}", idp_user_id);

        let response = self
            .request(Method::GET, &table, bearer)
            .query(&[("clerk_id", filter.as_str()), ("select", "*")])
            .send()
            .await?;
        let existing: Vec<UserRow> = handle_response(response).await?;

        let rows: Vec<UserRow> = match existing.into_iter().next() {
            None => {
                debug!("Creating user row");
                let response = self
                    .request(Method::POST, &table, bearer)
                    .header("Prefer", "return=representation")
                    .json(&NewUser {
                        clerk_id: idp_user_id,
                        email,
                    })
                    .send()
                    .await?;
                handle_response(response).await?
            }
            Some(row) if email.is_some() && row.email.as_deref() != email => {
                debug!("Updating user email");
                let response = self
                    .request(Method::PATCH, &table, bearer)
                    .query(&[("clerk_id", filter.as_str())])
                    .header("Prefer", "return=representation")
                    .json(&EmailUpdate {
                        email,
                        updated_at: Utc::now(),
                    })
                    .send()
                    .await?;
                handle_response(response).await?
            }
            Some(row) => return Ok(row),
        };

        rows.into_iter()
            .next()
            .ok_or_else(|| SupabaseError::InvalidResponse("no row returned".to_string()))
    }

    /// Build a request carrying the anon key and a bearer token.
    pub(crate) fn request(&self, method: Method, path: &str, bearer: &str) -> RequestBuilder {
        let mut request = self
            .client
            .request(method, self.endpoint.url(path))
            .header("Authorization", format!("Bearer {}", bearer));

        if let Some(ref anon_key) = self.endpoint.api_key {
            request = request.header("apikey", anon_key);
        }
        request
    }

    /// Session token if there is one, otherwise the anon key.
    async fn bearer(&self) -> String {
        match self.session().await {
            Some(session) => session.access_token.into_inner(),
            None => self.endpoint.api_key.clone().unwrap_or_default(),
        }
    }
}

#[async_trait]
impl SessionBackend for SupabaseAuthClient {
    async fn set_session(&self, tokens: SessionTokens) -> ProviderResult<()> {
        SupabaseAuthClient::set_session(self, tokens)
            .await
            .map(|_| ())
            .map_err(ProviderError::from)
    }

    async fn current_session(&self) -> ProviderResult<Option<Session>> {
        Ok(self.session().await)
    }
}

/// Parse a successful PostgREST response, or turn it into an error.
async fn handle_response<T>(response: reqwest::Response) -> Result<T, SupabaseError>
where
    T: for<'de> Deserialize<'de>,
{
    let status = response.status();

    if !status.is_success() {
        let message = error_message(&response.text().await.unwrap_or_default());
        warn!("Supabase API error ({}): {}", status.as_u16(), message);
        return Err(SupabaseError::ApiError {
            status: status.as_u16(),
            message,
        });
    }

    response
        .json()
        .await
        .map_err(|e| SupabaseError::InvalidResponse(e.to_string()))
}

/// Best human-readable message from a GoTrue or PostgREST error body.
fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for field in ["msg", "message", "error_description", "error"] {
            if let Some(message) = value.get(field).and_then(|v| v.as_str()) {
                return message.to_string();
            }
        }
    }
    if body.trim().is_empty() {
        "Unknown error".to_string()
    } else {
        body.to_string()
    }
}
