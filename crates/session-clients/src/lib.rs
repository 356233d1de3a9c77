//! # Session Clients
//!
//! HTTP implementations of the session bridge's collaborator traits.
//!
//! ## Overview
//!
//! - [`ClerkClient`]: `POST /v1/sessions/{id}/tokens/{template}` on the Clerk
//!   backend API, implementing `TokenSource`
//! - [`SupabaseAuthClient`]: GoTrue session confirmation plus PostgREST
//!   queries, implementing `SessionBackend`
//! - [`ConnectionDiagnostics`]: step-by-step connection checks for operators
//!
//! ## Usage
//!
//! ```rust,no_run
//! use session_bridge::{BridgeConfig, SessionBridge};
//! use session_clients::{ClerkClient, ServiceConfig, SupabaseAuthClient};
//! use std::sync::Arc;
//!
//! async fn sign_in(session_id: &str) -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServiceConfig::from_env()?;
//!     let clerk = ClerkClient::new(config.clerk.clone(), session_id, config.timeout())?;
//!     let supabase = SupabaseAuthClient::new(config.supabase.clone(), config.timeout())?;
//!
//!     let bridge = SessionBridge::new(
//!         BridgeConfig::from_env(),
//!         Arc::new(clerk),
//!         Arc::new(supabase.clone()),
//!     );
//!
//!     let report = bridge.attempt_authentication().await;
//!     if report.is_ready() {
//!         supabase.verify_connection().await?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod clients;
pub mod diagnostics;

// Re-export main types
pub use clients::{
    ClerkClient, ClerkError, ConfigError, ServiceConfig, ServiceEndpoint, SupabaseAuthClient,
    SupabaseError, UserRow,
};
pub use diagnostics::{CheckResult, CheckStatus, ConnectionDiagnostics, DiagnosticReport};
