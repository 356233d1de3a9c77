//! # Session Bridge
//!
//! This crate turns an identity-provider session into a row-level-security
//! database session for the invoicing dashboard.
//!
//! ## Overview
//!
//! The dashboard signs users in with Clerk and stores its data in Supabase.
//! Supabase trusts signed tokens carrying `sub`, `aud`, `role` and `exp`, so
//! the bridge:
//!
//! - **Acquires** a token from the identity provider using a named JWT template
//! - **Validates** the token's structure and claims offline (no signature check)
//! - **Installs** the token as the database session and reads it back
//!
//! The outcome is a [`SessionResult`] (`Active`, `Failed{kind, detail}` or
//! `Cancelled`) wrapped in an [`AttemptReport`] with redacted diagnostics.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use session_bridge::{BridgeConfig, SessionBridge, SessionBackend, TokenSource};
//! use std::sync::Arc;
//!
//! async fn sign_in(source: Arc<dyn TokenSource>, backend: Arc<dyn SessionBackend>) {
//!     let bridge = SessionBridge::new(BridgeConfig::from_env(), source, backend);
//!
//!     let report = bridge.attempt_authentication().await;
//!     if let Some(failure) = report.failure() {
//!         eprintln!("{}: {}", failure.kind, failure.detail);
//!         eprintln!("hint: {}", failure.kind.remediation());
//!     }
//! }
//! ```
//!
//! ## Failure policy
//!
//! Structural problems (no token, not a compact JWT, no `sub`) fail the
//! attempt before the database is contacted. Semantic problems (non-UUID
//! `sub`, missing `exp`/`aud`) are reported as warnings and left for the
//! database to judge. Every failure is terminal for its attempt; retrying is
//! the caller's decision.

pub mod acquirer;
pub mod bridge;
pub mod claims;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod installer;
pub mod token;
pub mod validator;

// Re-export main types
pub use acquirer::{TokenAcquirer, TokenSource};
pub use bridge::SessionBridge;
pub use claims::{
    derive_subject_uuid, is_uuid_shaped, parse_hyphenated_uuid, Audience, ClaimName, TokenClaims,
};
pub use config::{BridgeConfig, SubjectPolicy, DEFAULT_TEMPLATE_NAME};
pub use diagnostics::{AttemptReport, AttemptStage, ClaimsSnapshot};
pub use error::{ErrorKind, Failure, ProviderError, ProviderResult};
pub use installer::{
    mirrored_refresh_token, Session, SessionBackend, SessionInstaller, SessionResult,
    SessionSnapshot, SessionTokens, SessionUser, TokenPresence,
};
pub use token::{decode_payload, redact_prefix, DecodeError, RawToken, TokenHeaderInfo};
pub use validator::{ClaimValidator, ClaimWarning, ClaimsSummary, ValidatedToken, ValidationOutcome};

// Re-exported for callers that cancel attempts.
pub use tokio_util::sync::CancellationToken;
