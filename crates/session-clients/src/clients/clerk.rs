//! Clerk backend API client.
//!
//! Mints session tokens from a named JWT template for the signed-in session
//! (`POST /v1/sessions/{session_id}/tokens/{template}`).

use super::config::ServiceEndpoint;
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use session_bridge::{ProviderError, ProviderResult, RawToken, TokenSource};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, instrument, warn};

/// Marker Clerk uses when a template name is unknown.
const MISSING_TEMPLATE_MESSAGE: &str = "no jwt template exists with name";

/// Clerk client errors.
#[derive(Debug, Error)]
pub enum ClerkError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error ({status}): {message}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Error message from the API.
        message: String,
    },

    /// The JWT template does not exist.
    #[error("No JWT template exists with name: {0}")]
    TemplateNotFound(String),

    /// Authentication failed.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid response from the API.
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    /// The configured base URL cannot carry a path.
    #[error("Invalid Clerk API URL: {0}")]
    InvalidUrl(String),

    /// No secret key configured.
    #[error("CLERK_SECRET_KEY is not configured")]
    MissingSecretKey,
}

impl From<ClerkError> for ProviderError {
    fn from(err: ClerkError) -> Self {
        match err {
            ClerkError::RequestFailed(e) => ProviderError::Transport(e.to_string()),
            ClerkError::ApiError { status, message } => ProviderError::Api { status, message },
            ClerkError::TemplateNotFound(name) => ProviderError::TemplateNotFound(name),
            ClerkError::AuthenticationFailed(message) => ProviderError::Unauthorized(message),
            ClerkError::InvalidResponse(message) => ProviderError::Internal(message),
            e @ ClerkError::InvalidUrl(_) => ProviderError::Internal(e.to_string()),
            e @ ClerkError::MissingSecretKey => ProviderError::Unauthorized(e.to_string()),
        }
    }
}

/// Clerk backend API client bound to one user session.
#[derive(Clone)]
pub struct ClerkClient {
    /// HTTP client instance.
    client: Client,

    /// Service endpoint configuration.
    endpoint: ServiceEndpoint,

    /// Session the tokens are minted for.
    session_id: String,
}

impl std::fmt::Debug for ClerkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClerkClient")
            .field("base_url", &self.endpoint.base_url)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl ClerkClient {
    /// Create a new Clerk client for `session_id`.
    pub fn new(
        endpoint: ServiceEndpoint,
        session_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ClerkError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint,
            session_id: session_id.into(),
        })
    }

    /// The session tokens are minted for.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Mint a session token from `template`.
    ///
    /// Returns `Ok(None)` when Clerk answers without a token.
    #[instrument(skip(self), fields(session_id = %self.session_id))]
    pub async fn create_session_token(
        &self,
        template: &str,
    ) -> Result<Option<RawToken>, ClerkError> {
        let secret_key = self
            .endpoint
            .api_key
            .as_ref()
            .ok_or(ClerkError::MissingSecretKey)?;

        let url = self.token_url(template)?;
        debug!("Requesting session token from {}", url);

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", secret_key))
            .send()
            .await?;

        let status = response.status();

        if status.is_success() {
            let body: SessionTokenResponse = response
                .json()
                .await
                .map_err(|e| ClerkError::InvalidResponse(e.to_string()))?;

            return Ok(body
                .jwt
                .filter(|jwt| !jwt.trim().is_empty())
                .map(RawToken::new));
        }

        let text = response.text().await.unwrap_or_default();
        let message = clerk_error_message(&text);

        if message.to_lowercase().contains(MISSING_TEMPLATE_MESSAGE) {
            warn!(template, "Clerk has no JWT template with this name");
            return Err(ClerkError::TemplateNotFound(template.to_string()));
        }

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            error!("Clerk authentication failed");
            return Err(ClerkError::AuthenticationFailed(message));
        }

        warn!("Clerk API error ({}): {}", status.as_u16(), message);
        Err(ClerkError::ApiError {
            status: status.as_u16(),
            message,
        })
    }

    /// `{base}/v1/sessions/{session_id}/tokens/{template}` with each segment
    /// percent-encoded.
    fn token_url(&self, template: &str) -> Result<Url, ClerkError> {
        let invalid = || ClerkError::InvalidUrl(self.endpoint.base_url.clone());
        let mut url = Url::parse(&self.endpoint.base_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(["v1", "sessions", self.session_id.as_str(), "tokens", template]);
        Ok(url)
    }
}

#[async_trait]
impl TokenSource for ClerkClient {
    async fn request_token(&self, template: &str) -> ProviderResult<Option<RawToken>> {
        self.create_session_token(template)
            .await
            .map_err(ProviderError::from)
    }
}

/// Body of a successful token request.
#[derive(Debug, Deserialize)]
struct SessionTokenResponse {
    #[serde(default)]
    jwt: Option<String>,
}

/// Clerk error envelope.
#[derive(Debug, Deserialize)]
struct ClerkErrorBody {
    #[serde(default)]
    errors: Vec<ClerkErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct ClerkErrorEntry {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    long_message: Option<String>,
}

/// Best human-readable message from a Clerk error body.
fn clerk_error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<ClerkErrorBody>(body).ok();
    parsed
        .and_then(|b| b.errors.into_iter().next())
        .and_then(|e| e.long_message.or(e.message))
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                "Unknown error".to_string()
            } else {
                body.to_string()
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clerk_error_message() {
        let body = r#"{"errors":[{"message":"not found","long_message":"No JWT template exists with name: supabase","code":"resource_not_found"}]}"#;
        assert_eq!(
            clerk_error_message(body),
            "No JWT template exists with name: supabase"
        );

        let body = r#"{"errors":[{"message":"Unauthorized"}]}"#;
        assert_eq!(clerk_error_message(body), "Unauthorized");

        assert_eq!(clerk_error_message("gateway timeout"), "gateway timeout");
        assert_eq!(clerk_error_message(""), "Unknown error");
    }

    #[test]
    fn test_provider_error_mapping() {
        let err: ProviderError = ClerkError::TemplateNotFound("supabase".to_string()).into();
        assert!(err.is_missing_template());

        let err: ProviderError = ClerkError::MissingSecretKey.into();
        assert!(matches!(err, ProviderError::Unauthorized(_)));

        let err: ProviderError = ClerkError::ApiError {
            status: 500,
            message: "boom".to_string(),
        }
        .into();
        assert_eq!(
            err,
            ProviderError::Api {
                status: 500,
                message: "boom".to_string()
            }
        );
    }

    fn client(base_url: &str) -> ClerkClient {
        ClerkClient::new(
            ServiceEndpoint {
                base_url: base_url.to_string(),
                api_key: Some("sk_test_secret".to_string()),
            },
            "sess_123",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_token_url() {
        let url = client("https://api.clerk.com").token_url("supabase").unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.clerk.com/v1/sessions/sess_123/tokens/supabase"
        );

        let url = client("http://localhost:8080/").token_url("supabase").unwrap();
        assert_eq!(url.path(), "/v1/sessions/sess_123/tokens/supabase");
    }

    #[test]
    fn test_token_url_encodes_template_name() {
        let url = client("https://api.clerk.com")
            .token_url("team/supabase?x=1#frag")
            .unwrap();

        assert_eq!(
            url.path(),
            "/v1/sessions/sess_123/tokens/team%2Fsupabase%3Fx=1%23frag"
        );
        assert!(url.query().is_none());
        assert!(url.fragment().is_none());
    }

    #[test]
    fn test_token_url_rejects_unusable_base() {
        let result = client("not a url").token_url("supabase");
        assert!(matches!(result, Err(ClerkError::InvalidUrl(_))));
    }

    #[test]
    fn test_debug_hides_secret_key() {
        let debug = format!("{:?}", client("https://api.clerk.com"));
        assert!(debug.contains("sess_123"));
        assert!(!debug.contains("sk_test_secret"));
    }
}
