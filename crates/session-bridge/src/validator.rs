//! Offline claim validation
//!
//! Decides whether a token is usable by the database without touching the
//! network and without checking the signature. The policy has two tiers:
//!
//! - **Hard failures**: no token, not three segments, payload not base64
//!   JSON, no `sub` claim (and, under [`SubjectPolicy::RequireUuid`], a
//!   non-UUID `sub`).
//! - **Warnings**: a non-UUID `sub`, missing `exp` or `aud`. These are
//!   attached to the success so the operator can see them, but the database
//!   gets the final say when it checks the signature.

use crate::claims::{
    derive_subject_uuid, is_uuid_shaped, join_claim_names, parse_hyphenated_uuid, ClaimName,
    TokenClaims,
};
use crate::config::{BridgeConfig, SubjectPolicy};
use crate::error::{ErrorKind, Failure};
use crate::token::{decode_payload, DecodeError, RawToken};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

/// Result of validating one token.
pub type ValidationOutcome = Result<ValidatedToken, Failure>;

/// A soft problem found in an otherwise usable token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaimWarning {
    /// `sub` is present but not UUID-shaped
    NonUuidSubject {
        /// The subject as found in the token
        subject: String,
        /// Stable UUID this subject would map to
        suggested: Uuid,
    },

    /// `exp` and/or `aud` are absent
    MissingClaims {
        /// Absent claim names
        claims: Vec<ClaimName>,
    },
}

impl std::fmt::Display for ClaimWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClaimWarning::NonUuidSubject { subject, suggested } => write!(
                f,
                "the 'sub' claim is not a valid UUID: {} (a derived UUID would be {})",
                subject, suggested
            ),
            ClaimWarning::MissingClaims { claims } => {
                write!(f, "missing claims: {}", join_claim_names(claims))
            }
        }
    }
}

/// Redacted summary of a validated token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimsSummary {
    /// First characters of the token
    pub token_prefix: String,

    /// Template the token was minted from
    pub template_name: String,

    /// Subject claim
    pub subject: String,

    /// Required claims that are absent
    pub missing_claims: Vec<ClaimName>,
}

/// A token that passed validation, with its decoded claims.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedToken {
    token: RawToken,
    claims: TokenClaims,
    summary: ClaimsSummary,
    warnings: Vec<ClaimWarning>,
}

impl ValidatedToken {
    /// The token to hand to the database.
    pub fn token(&self) -> &RawToken {
        &self.token
    }

    /// Decoded claims.
    pub fn claims(&self) -> &TokenClaims {
        &self.claims
    }

    /// Redacted summary.
    pub fn summary(&self) -> &ClaimsSummary {
        &self.summary
    }

    /// Soft problems found.
    pub fn warnings(&self) -> &[ClaimWarning] {
        &self.warnings
    }

    /// Check if any warning was raised.
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Consume into the raw token.
    pub fn into_token(self) -> RawToken {
        self.token
    }
}

/// Pure, deterministic claim validator.
#[derive(Debug, Clone)]
pub struct ClaimValidator {
    template_name: String,
    subject_policy: SubjectPolicy,
}

impl ClaimValidator {
    /// Create a validator from the bridge configuration.
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            template_name: config.template_name().to_string(),
            subject_policy: config.subject_policy(),
        }
    }

    /// Validate a token, or the absence of one.
    pub fn validate(&self, token: Option<&RawToken>) -> ValidationOutcome {
        let token = match token {
            Some(t) if !t.is_empty() => t,
            _ => {
                return Err(Failure::new(
                    ErrorKind::NoToken,
                    format!(
                        "no token returned by identity provider for template {}",
                        self.template_name
                    ),
                ))
            }
        };

        let claims = decode_payload(token.as_str()).map_err(|e| {
            debug!(token_prefix = %token.redacted(), error = %e, "Token failed structural checks");
            match e {
                DecodeError::SegmentCount(_) => Failure::new(
                    ErrorKind::MalformedToken,
                    "token does not have three dot-separated segments",
                ),
                DecodeError::Base64(_) | DecodeError::Json(_) => Failure::new(
                    ErrorKind::MalformedToken,
                    "payload segment is not valid base64/JSON",
                ),
            }
        })?;

        debug!(
            token_prefix = %token.redacted(),
            sub = ?claims.sub(),
            role = ?claims.role(),
            exp = ?claims.exp(),
            aud = ?claims.aud(),
            "Decoded token claims"
        );

        let subject = claims.sub().ok_or_else(|| {
            Failure::new(ErrorKind::MissingSubClaim, "token payload has no 'sub' claim")
        })?;

        let mut warnings = Vec::new();

        if !is_uuid_shaped(&subject) {
            if self.subject_policy == SubjectPolicy::RequireUuid
                && parse_hyphenated_uuid(&subject).is_none()
            {
                return Err(Failure::new(
                    ErrorKind::InvalidSubClaim,
                    format!("the 'sub' claim must be a valid UUID, found: {}", subject),
                ));
            }

            let suggested = derive_subject_uuid(&subject);
            warn!(
                sub = %subject,
                suggested = %suggested,
                "The 'sub' claim is not a valid UUID; the database may reject it"
            );
            warnings.push(ClaimWarning::NonUuidSubject {
                subject: subject.clone(),
                suggested,
            });
        }

        let missing_claims = claims.missing_required();
        if !missing_claims.is_empty() {
            warn!(
                missing = %join_claim_names(&missing_claims),
                "Token is missing claims the database expects"
            );
            warnings.push(ClaimWarning::MissingClaims {
                claims: missing_claims.clone(),
            });
        }

        let summary = ClaimsSummary {
            token_prefix: token.redacted(),
            template_name: self.template_name.clone(),
            subject,
            missing_claims,
        };

        Ok(ValidatedToken {
            token: token.clone(),
            claims,
            summary,
            warnings,
        })
    }
}
