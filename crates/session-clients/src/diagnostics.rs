//! Connection diagnostics for the database side of the bridge.
//!
//! Runs a fixed sequence of checks an operator can read top to bottom to find
//! out why the dashboard cannot talk to its database:
//!
//! 1. **environment**: required variables are configured
//! 2. **supabase_url**: the project URL is well formed
//! 3. **reachability**: the auth service answers HTTP at all
//! 4. **session**: a database session is stored
//! 5. **simple_query**: the users table can be queried with that session
//!
//! ## Usage
//!
//! ```rust,no_run
//! use session_clients::{ConnectionDiagnostics, ServiceConfig, SupabaseAuthClient};
//!
//! async fn diagnose(supabase: SupabaseAuthClient, config: ServiceConfig) {
//!     let report = ConnectionDiagnostics::new(config, supabase).run().await;
//!     for check in &report.checks {
//!         println!("{}: {:?} {}", check.name, check.status, check.message);
//!     }
//! }
//! ```

use crate::clients::config::{normalize_supabase_url, ServiceConfig};
use crate::clients::supabase::SupabaseAuthClient;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Outcome of one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    /// Check passed.
    Passed,
    /// Check failed.
    Failed,
    /// Check not run because an earlier one failed.
    Skipped,
}

/// Result of a single named check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    /// Check name.
    pub name: String,

    /// Outcome.
    pub status: CheckStatus,

    /// What was found.
    pub message: String,

    /// Request latency for checks that hit the network.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl CheckResult {
    fn passed(name: &str, message: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Passed, message)
    }

    fn failed(name: &str, message: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Failed, message)
    }

    fn skipped(name: &str, message: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Skipped, message)
    }

    fn new(name: &str, status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            message: message.into(),
            latency_ms: None,
        }
    }

    fn with_latency(mut self, start: Instant) -> Self {
        self.latency_ms = Some(start.elapsed().as_millis() as u64);
        self
    }
}

/// All checks from one diagnostics run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticReport {
    /// Checks in the order they ran.
    pub checks: Vec<CheckResult>,

    /// Timestamp of the run (RFC 3339).
    pub timestamp: String,

    /// Total duration in milliseconds.
    pub check_duration_ms: u64,
}

impl DiagnosticReport {
    /// Whether every check passed.
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|c| c.status == CheckStatus::Passed)
    }

    /// Look up a check by name.
    pub fn check(&self, name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }

    /// Checks that failed.
    pub fn failures(&self) -> Vec<&CheckResult> {
        self.checks
            .iter()
            .filter(|c| c.status == CheckStatus::Failed)
            .collect()
    }
}

/// Runs the connection checks against one Supabase project.
#[derive(Debug, Clone)]
pub struct ConnectionDiagnostics {
    config: ServiceConfig,
    supabase: SupabaseAuthClient,
}

impl ConnectionDiagnostics {
    /// Create diagnostics for `supabase`, described by `config`.
    pub fn new(config: ServiceConfig, supabase: SupabaseAuthClient) -> Self {
        Self { config, supabase }
    }

    /// Run every check.
    #[instrument(skip(self))]
    pub async fn run(&self) -> DiagnosticReport {
        info!("Running connection diagnostics");
        let start = Instant::now();

        let environment = self.check_environment();
        let url = self.check_url();
        let reachability = if url.status == CheckStatus::Passed {
            self.check_reachability().await
        } else {
            CheckResult::skipped("reachability", "Supabase URL is not valid")
        };

        let (session, has_session) = match self.supabase.session().await {
            Some(session) => {
                let user = session
                    .user
                    .as_ref()
                    .map(|u| u.id.clone())
                    .unwrap_or_else(|| "unknown user".to_string());
                (CheckResult::passed("session", format!("Session active for {}", user)), true)
            }
            None => (CheckResult::failed("session", "No active session"), false),
        };

        let query = if has_session && reachability.status == CheckStatus::Passed {
            let query_start = Instant::now();
            match self.supabase.simple_query().await {
                Ok(()) => CheckResult::passed("simple_query", "Query succeeded"),
                Err(e) => CheckResult::failed("simple_query", e.to_string()),
            }
            .with_latency(query_start)
        } else {
            CheckResult::skipped("simple_query", "Requires a reachable service and a session")
        };

        let checks = vec![environment, url, reachability, session, query];
        for check in checks.iter().filter(|c| c.status == CheckStatus::Failed) {
            warn!(check = %check.name, message = %check.message, "Diagnostic check failed");
        }

        let duration = start.elapsed();
        info!(duration_ms = duration.as_millis(), "Connection diagnostics complete");

        DiagnosticReport {
            checks,
            timestamp: chrono::Utc::now().to_rfc3339(),
            check_duration_ms: duration.as_millis() as u64,
        }
    }

    fn check_environment(&self) -> CheckResult {
        let missing = self.config.missing_variables();
        if missing.is_empty() {
            CheckResult::passed("environment", "All required variables are set")
        } else {
            CheckResult::failed("environment", format!("Missing: {}", missing.join(", ")))
        }
    }

    fn check_url(&self) -> CheckResult {
        match normalize_supabase_url(&self.config.supabase.base_url) {
            Ok(url) => CheckResult::passed("supabase_url", url),
            Err(e) => CheckResult::failed("supabase_url", e.to_string()),
        }
    }

    /// Any HTTP answer from the auth service counts as reachable.
    async fn check_reachability(&self) -> CheckResult {
        let start = Instant::now();
        let anon_key = self.config.supabase.api_key.clone().unwrap_or_default();

        debug!("Checking reachability of the Supabase auth service");
        match self
            .supabase
            .request(Method::GET, "/auth/v1/", &anon_key)
            .send()
            .await
        {
            Ok(response) => CheckResult::passed(
                "reachability",
                format!("Auth service answered with HTTP {}", response.status().as_u16()),
            )
            .with_latency(start),
            Err(e) => CheckResult::failed("reachability", format!("Failed to fetch: {}", e))
                .with_latency(start),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::config::ServiceEndpoint;
    use std::time::Duration;

    fn diagnostics(base_url: &str, with_keys: bool) -> ConnectionDiagnostics {
        let key = |k: &str| with_keys.then(|| k.to_string());
        let config = ServiceConfig {
            clerk: ServiceEndpoint {
                base_url: "http://127.0.0.1:1".to_string(),
                api_key: key("sk_test"),
            },
            supabase: ServiceEndpoint {
                base_url: base_url.to_string(),
                api_key: key("anon"),
            },
            default_timeout_secs: 2,
        };
        let supabase =
            SupabaseAuthClient::new(config.supabase.clone(), Duration::from_secs(2)).unwrap();
        ConnectionDiagnostics::new(config, supabase)
    }

    #[test]
    fn test_environment_check() {
        let check = diagnostics("http://localhost:54321", false).check_environment();
        assert_eq!(check.status, CheckStatus::Failed);
        assert!(check.message.contains("CLERK_SECRET_KEY"));
        assert!(check.message.contains("SUPABASE_ANON_KEY"));

        let check = diagnostics("http://localhost:54321", true).check_environment();
        assert_eq!(check.status, CheckStatus::Passed);
    }

    #[tokio::test]
    async fn test_invalid_url_skips_network_checks() {
        let report = diagnostics("https://exa mple.com", true).run().await;

        assert_eq!(report.check("supabase_url").unwrap().status, CheckStatus::Failed);
        assert_eq!(report.check("reachability").unwrap().status, CheckStatus::Skipped);
        assert_eq!(report.check("session").unwrap().status, CheckStatus::Failed);
        assert_eq!(report.check("simple_query").unwrap().status, CheckStatus::Skipped);
        assert!(!report.all_passed());
        assert_eq!(report.failures().len(), 2);
    }
}
