//! Per-attempt diagnostics record.
//!
//! Everything an operator-facing view needs to explain an attempt: where it
//! stopped, why, and what the token looked like. Secrets only ever appear as
//! redacted prefixes.

use crate::claims::{ClaimName, TokenClaims};
use crate::error::Failure;
use crate::installer::{SessionResult, SessionSnapshot};
use crate::token::{decode_payload, inspect_header, RawToken, TokenHeaderInfo};
use crate::validator::{ClaimWarning, ValidatedToken};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stage of the attempt state machine.
///
/// Failed and cancelled attempts keep the stage they stopped in; the
/// outcome itself lives in [`AttemptReport::result`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStage {
    /// Nothing has happened yet
    Start,
    /// Waiting on the identity provider
    AcquiringToken,
    /// Inspecting claims
    Validating,
    /// Setting the database session
    Installing,
    /// Reading the session back
    Confirming,
    /// Session active
    Succeeded,
}

/// Claim values as shown to an operator. `None` means missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimsSnapshot {
    /// Subject
    pub sub: Option<String>,
    /// Role
    pub role: Option<String>,
    /// Expiration
    pub exp: Option<DateTime<Utc>>,
    /// Issued at
    pub iat: Option<DateTime<Utc>>,
    /// Audience
    pub aud: Option<String>,
}

impl ClaimsSnapshot {
    /// Build from decoded claims.
    pub fn from_claims(claims: &TokenClaims) -> Self {
        Self {
            sub: claims.sub(),
            role: claims.role().map(String::from),
            exp: claims.expires_at(),
            iat: claims.issued_at(),
            aud: claims.aud().map(|a| a.to_string()),
        }
    }
}

/// Diagnostics for one authentication attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptReport {
    /// Template the token was requested from
    pub template_name: String,

    /// Final outcome
    pub result: SessionResult,

    /// Last stage reached
    pub stage: AttemptStage,

    /// Redacted token prefix
    pub token_prefix: Option<String>,

    /// Token header fields
    pub header: Option<TokenHeaderInfo>,

    /// Claim values
    pub claims: Option<ClaimsSnapshot>,

    /// Required claims that are absent
    pub missing_claims: Vec<ClaimName>,

    /// Soft validation problems
    pub warnings: Vec<ClaimWarning>,

    /// Session read back from the database
    pub session: Option<SessionSnapshot>,

    /// When the attempt started
    pub started_at: DateTime<Utc>,

    /// When the attempt ended
    pub finished_at: Option<DateTime<Utc>>,
}

impl AttemptReport {
    /// Start a report for an attempt against `template_name`.
    pub fn begin(template_name: impl Into<String>) -> Self {
        Self {
            template_name: template_name.into(),
            result: SessionResult::Cancelled,
            stage: AttemptStage::Start,
            token_prefix: None,
            header: None,
            claims: None,
            missing_claims: Vec::new(),
            warnings: Vec::new(),
            session: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// The boolean ready signal.
    pub fn is_ready(&self) -> bool {
        self.result.is_active()
    }

    /// The failure, if the attempt failed.
    pub fn failure(&self) -> Option<&Failure> {
        self.result.failure()
    }

    /// Operator hint for the failure.
    pub fn remediation(&self) -> Option<&'static str> {
        self.failure().map(|f| f.kind.remediation())
    }

    pub(crate) fn enter(&mut self, stage: AttemptStage) {
        self.stage = stage;
    }

    /// Record what can be read from the token without trusting it.
    pub(crate) fn record_token(&mut self, token: &RawToken) {
        self.token_prefix = Some(token.redacted());
        self.header = inspect_header(token.as_str());
        if let Ok(claims) = decode_payload(token.as_str()) {
            self.claims = Some(ClaimsSnapshot::from_claims(&claims));
            self.missing_claims = claims.missing_required();
        }
    }

    pub(crate) fn record_validation(&mut self, validated: &ValidatedToken) {
        self.missing_claims = validated.summary().missing_claims.clone();
        self.warnings = validated.warnings().to_vec();
    }

    pub(crate) fn succeed(mut self, session: SessionSnapshot) -> Self {
        self.session = Some(session);
        self.result = SessionResult::Active;
        self.stage = AttemptStage::Succeeded;
        self.finished_at = Some(Utc::now());
        self
    }

    /// Fail the attempt, keeping the stage it failed in.
    pub(crate) fn fail(mut self, failure: Failure) -> Self {
        self.result = SessionResult::Failed(failure);
        self.finished_at = Some(Utc::now());
        self
    }

    pub(crate) fn cancel(mut self) -> Self {
        self.result = SessionResult::Cancelled;
        self.finished_at = Some(Utc::now());
        self
    }
}
