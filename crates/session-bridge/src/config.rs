//! Bridge configuration.
//!
//! The token template name is resolved once, when the bridge is built, and
//! never changes afterwards.

use serde::{Deserialize, Serialize};

/// Template name used when none is configured.
pub const DEFAULT_TEMPLATE_NAME: &str = "supabase";

/// Environment variable holding the identity provider's JWT template name.
pub const TEMPLATE_ENV_VAR: &str = "CLERK_JWT_TEMPLATE";

/// Environment variable that turns on the strict subject policy.
pub const REQUIRE_UUID_SUBJECT_ENV_VAR: &str = "BRIDGE_REQUIRE_UUID_SUBJECT";

/// What to do with a `sub` claim that is not UUID-shaped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectPolicy {
    /// Log a warning and carry on
    #[default]
    Permissive,

    /// Fail the attempt with `InvalidSubClaim`
    RequireUuid,
}

/// Session bridge configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    template_name: String,

    #[serde(default)]
    subject_policy: SubjectPolicy,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            template_name: DEFAULT_TEMPLATE_NAME.to_string(),
            subject_policy: SubjectPolicy::Permissive,
        }
    }
}

impl BridgeConfig {
    /// Create a configuration for `template_name`. Blank names fall back to the default.
    pub fn new(template_name: impl Into<String>) -> Self {
        let template_name = template_name.into();
        let template_name = match template_name.trim() {
            "" => DEFAULT_TEMPLATE_NAME.to_string(),
            trimmed => trimmed.to_string(),
        };

        Self {
            template_name,
            ..Default::default()
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `CLERK_JWT_TEMPLATE`: JWT template name (default: supabase)
    /// - `BRIDGE_REQUIRE_UUID_SUBJECT`: reject non-UUID `sub` claims (default: false)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through a variable lookup function.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self::new(lookup(TEMPLATE_ENV_VAR).unwrap_or_default());

        let strict = lookup(REQUIRE_UUID_SUBJECT_ENV_VAR)
            .map(|s| matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        if strict {
            config.with_subject_policy(SubjectPolicy::RequireUuid)
        } else {
            config
        }
    }

    /// Set the subject policy.
    pub fn with_subject_policy(mut self, policy: SubjectPolicy) -> Self {
        self.subject_policy = policy;
        self
    }

    /// The identity provider template tokens are requested from.
    pub fn template_name(&self) -> &str {
        &self.template_name
    }

    /// Subject policy.
    pub fn subject_policy(&self) -> SubjectPolicy {
        self.subject_policy
    }
}
