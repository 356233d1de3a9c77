//! Error types for the session bridge
//!
//! Every way an authentication attempt can end badly is classified into an
//! [`ErrorKind`] and carried as a [`Failure`]. Collaborator bindings (the
//! identity provider and the database auth client) report their own problems
//! through [`ProviderError`], which the bridge then classifies.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Substrings that mark a collaborator error as a transport failure.
const TRANSPORT_ERROR_MARKERS: &[&str] = &["failed to fetch", "networkerror", "network error"];

/// Substring the identity provider uses when a token template is unknown.
const MISSING_TEMPLATE_MARKER: &str = "no jwt template exists with name";

/// Classification of a failed authentication attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The identity provider rejected the token template (or could not be asked)
    TemplateNotConfigured,

    /// The identity provider returned no token
    NoToken,

    /// The token failed the three-segment or base64/JSON checks
    MalformedToken,

    /// The decoded payload has no `sub` claim
    MissingSubClaim,

    /// The `sub` claim is not UUID-shaped and the strict subject policy is on
    InvalidSubClaim,

    /// The database rejected the session and the payload lacks required claims
    MissingClaims,

    /// The database session call failed for a transport reason
    NetworkOrFetchError,

    /// The database session call failed for any other reason
    GenericSessionError,

    /// The session was set but could not be read back
    SessionNotPersisted,
}

impl ErrorKind {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TemplateNotConfigured => "TemplateNotConfigured",
            ErrorKind::NoToken => "NoToken",
            ErrorKind::MalformedToken => "MalformedToken",
            ErrorKind::MissingSubClaim => "MissingSubClaim",
            ErrorKind::InvalidSubClaim => "InvalidSubClaim",
            ErrorKind::MissingClaims => "MissingClaims",
            ErrorKind::NetworkOrFetchError => "NetworkOrFetchError",
            ErrorKind::GenericSessionError => "GenericSessionError",
            ErrorKind::SessionNotPersisted => "SessionNotPersisted",
        }
    }

    /// Get error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            ErrorKind::TemplateNotConfigured => "TEMPLATE_NOT_CONFIGURED",
            ErrorKind::NoToken => "NO_TOKEN",
            ErrorKind::MalformedToken => "MALFORMED_TOKEN",
            ErrorKind::MissingSubClaim => "MISSING_SUB_CLAIM",
            ErrorKind::InvalidSubClaim => "INVALID_SUB_CLAIM",
            ErrorKind::MissingClaims => "MISSING_CLAIMS",
            ErrorKind::NetworkOrFetchError => "NETWORK_OR_FETCH_ERROR",
            ErrorKind::GenericSessionError => "GENERIC_SESSION_ERROR",
            ErrorKind::SessionNotPersisted => "SESSION_NOT_PERSISTED",
        }
    }

    /// Static operator hint shown next to the failure.
    pub fn remediation(&self) -> &'static str {
        match self {
            ErrorKind::TemplateNotConfigured => {
                "Create a JWT template with the configured name in the identity provider dashboard."
            }
            ErrorKind::NoToken => {
                "Check that the user is signed in and the JWT template is enabled for this instance."
            }
            ErrorKind::MalformedToken => {
                "The identity provider must return a compact JWT (header.payload.signature)."
            }
            ErrorKind::MissingSubClaim | ErrorKind::InvalidSubClaim => {
                "Add a UUID 'sub' claim to the JWT template, e.g. from the user's public metadata."
            }
            ErrorKind::MissingClaims => {
                "Add the 'sub', 'aud' (\"authenticated\") and 'exp' claims to the JWT template."
            }
            ErrorKind::NetworkOrFetchError => {
                "Check the database URL and network connectivity, then retry."
            }
            ErrorKind::GenericSessionError => {
                "Check that the JWT template is signed with the database's JWT secret."
            }
            ErrorKind::SessionNotPersisted => {
                "Check the database client's session storage, then retry."
            }
        }
    }

    /// Whether the fix belongs in the identity provider's token template.
    pub fn is_token_problem(&self) -> bool {
        matches!(
            self,
            ErrorKind::TemplateNotConfigured
                | ErrorKind::NoToken
                | ErrorKind::MalformedToken
                | ErrorKind::MissingSubClaim
                | ErrorKind::InvalidSubClaim
                | ErrorKind::MissingClaims
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A classified, terminal failure of one authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {detail}")]
pub struct Failure {
    /// Failure classification
    pub kind: ErrorKind,

    /// Human-readable detail for the operator
    pub detail: String,
}

impl Failure {
    /// Create a new failure.
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

/// Errors reported by collaborator bindings.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// The identity provider has no token template with this name
    #[error("No JWT template exists with name: {0}")]
    TemplateNotFound(String),

    /// The request never produced a response
    #[error("Failed to fetch: {0}")]
    Transport(String),

    /// The service answered with an error
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Error message from the service
        message: String,
    },

    /// The service rejected our credentials
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Anything else
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for collaborator calls.
pub type ProviderResult<T> = Result<T, ProviderError>;

impl ProviderError {
    /// The message as reported by the service, without our prefix.
    pub fn message(&self) -> String {
        match self {
            ProviderError::TemplateNotFound(_) => self.to_string(),
            ProviderError::Transport(m)
            | ProviderError::Unauthorized(m)
            | ProviderError::Internal(m) => m.clone(),
            ProviderError::Api { message, .. } => message.clone(),
        }
    }

    /// Whether the error is a transport failure rather than a service answer.
    pub fn is_transport(&self) -> bool {
        if matches!(self, ProviderError::Transport(_)) {
            return true;
        }
        let message = self.message().to_lowercase();
        TRANSPORT_ERROR_MARKERS.iter().any(|m| message.contains(m))
    }

    /// Whether the identity provider said the token template does not exist.
    pub fn is_missing_template(&self) -> bool {
        matches!(self, ProviderError::TemplateNotFound(_))
            || self.message().to_lowercase().contains(MISSING_TEMPLATE_MARKER)
    }
}
