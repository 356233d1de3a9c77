//! Token acquisition from the identity provider.

use crate::error::{ErrorKind, Failure, ProviderResult};
use crate::token::RawToken;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Identity provider capability: mint a token for the signed-in principal.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Request a token rendered from `template`.
    ///
    /// `Ok(None)` means the provider had no token to give; that is not an error.
    async fn request_token(&self, template: &str) -> ProviderResult<Option<RawToken>>;
}

/// Requests tokens from a [`TokenSource`] using a fixed template name.
#[derive(Clone)]
pub struct TokenAcquirer {
    source: Arc<dyn TokenSource>,
    template_name: String,
}

impl std::fmt::Debug for TokenAcquirer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAcquirer")
            .field("template_name", &self.template_name)
            .finish_non_exhaustive()
    }
}

impl TokenAcquirer {
    /// Create an acquirer bound to `template_name`.
    pub fn new(source: Arc<dyn TokenSource>, template_name: impl Into<String>) -> Self {
        Self {
            source,
            template_name: template_name.into(),
        }
    }

    /// The template tokens are requested from.
    pub fn template_name(&self) -> &str {
        &self.template_name
    }

    /// Ask the identity provider for a token.
    ///
    /// Any provider failure becomes a `TemplateNotConfigured` failure naming
    /// the template.
    pub async fn acquire(&self) -> Result<Option<RawToken>, Failure> {
        debug!(template = %self.template_name, "Requesting token from identity provider");

        match self.source.request_token(&self.template_name).await {
            Ok(Some(token)) => {
                debug!(
                    template = %self.template_name,
                    token_prefix = %token.redacted(),
                    "Received token from identity provider"
                );
                Ok(Some(token))
            }
            Ok(None) => {
                warn!(template = %self.template_name, "Identity provider returned no token");
                Ok(None)
            }
            Err(e) => {
                warn!(template = %self.template_name, error = %e, "Token request failed");
                let detail = if e.is_missing_template() {
                    format!(
                        "No JWT template exists with name: {}. Create this template in the identity provider dashboard.",
                        self.template_name
                    )
                } else {
                    format!(
                        "failed to obtain a token for template '{}': {}",
                        self.template_name, e
                    )
                };
                Err(Failure::new(ErrorKind::TemplateNotConfigured, detail))
            }
        }
    }
}
