//! Endpoint configuration for the identity provider and database clients.
//!
//! Configuration is loaded from environment variables with defaults suitable
//! for local development against a Supabase CLI stack.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Default Clerk backend API.
pub const DEFAULT_CLERK_API_URL: &str = "https://api.clerk.com";

/// Default Supabase URL (`supabase start`).
pub const DEFAULT_SUPABASE_URL: &str = "http://localhost:54321";

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Missing required environment variable.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Error message.
        message: String,
    },
}

/// Endpoints used by the bridge's HTTP bindings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Clerk backend API. `api_key` is the secret key.
    pub clerk: ServiceEndpoint,

    /// Supabase project. `api_key` is the anon key.
    pub supabase: ServiceEndpoint,

    /// Default request timeout in seconds.
    pub default_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            clerk: ServiceEndpoint {
                base_url: DEFAULT_CLERK_API_URL.to_string(),
                api_key: None,
            },
            supabase: ServiceEndpoint {
                base_url: DEFAULT_SUPABASE_URL.to_string(),
                api_key: None,
            },
            default_timeout_secs: 30,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `CLERK_API_URL`: Clerk backend API (default: https://api.clerk.com)
    /// - `CLERK_SECRET_KEY`: Clerk secret key
    /// - `SUPABASE_URL`: Supabase project URL (default: http://localhost:54321)
    /// - `SUPABASE_ANON_KEY`: Supabase anon key
    /// - `SERVICE_TIMEOUT_SECS`: Request timeout in seconds (default: 30)
    ///
    /// `SUPABASE_URL` is normalised with [`normalize_supabase_url`]; a value
    /// that cannot be parsed is an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let default = Self::default();
        let non_blank = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let supabase_url = match non_blank("SUPABASE_URL") {
            Some(raw) => normalize_supabase_url(&raw)?,
            None => default.supabase.base_url,
        };

        Ok(Self {
            clerk: ServiceEndpoint {
                base_url: non_blank("CLERK_API_URL").unwrap_or(default.clerk.base_url),
                api_key: non_blank("CLERK_SECRET_KEY"),
            },
            supabase: ServiceEndpoint {
                base_url: supabase_url,
                api_key: non_blank("SUPABASE_ANON_KEY"),
            },
            default_timeout_secs: non_blank("SERVICE_TIMEOUT_SECS")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(default.default_timeout_secs),
        })
    }

    /// Get the default request timeout as a Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    /// Names of required variables that are not configured.
    pub fn missing_variables(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.clerk.has_auth() {
            missing.push("CLERK_SECRET_KEY");
        }
        if !self.supabase.has_auth() {
            missing.push("SUPABASE_ANON_KEY");
        }
        missing
    }

    /// Validate that all required configuration is present for production.
    pub fn validate_for_production(&self) -> Result<(), ConfigError> {
        match self.missing_variables().first() {
            Some(name) => Err(ConfigError::MissingEnvVar(name.to_string())),
            None => Ok(()),
        }
    }
}

/// Configuration for a single service endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    /// Base URL for the service.
    pub base_url: String,

    /// Key sent with each request.
    pub api_key: Option<String>,
}

impl ServiceEndpoint {
    /// Build a full URL by appending a path to the base URL.
    pub fn url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{}/{}", base, path)
    }

    /// Check if a key is configured.
    pub fn has_auth(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Clean up a Supabase project URL.
///
/// Trims whitespace and trailing slashes and adds `https://` when no scheme
/// is given.
pub fn normalize_supabase_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ConfigError::MissingEnvVar("SUPABASE_URL".to_string()));
    }

    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    let parsed = Url::parse(&with_scheme).map_err(|e| ConfigError::InvalidValue {
        key: "SUPABASE_URL".to_string(),
        message: e.to_string(),
    })?;

    if parsed.host_str().is_none() {
        return Err(ConfigError::InvalidValue {
            key: "SUPABASE_URL".to_string(),
            message: "URL has no host".to_string(),
        });
    }

    Ok(with_scheme)
}
