//! The session bridge
//!
//! Runs one authentication attempt end to end:
//!
//! ```text
//! START -> ACQUIRING_TOKEN -> {NO_TOKEN: FAILED, TOKEN_OK: VALIDATING}
//! VALIDATING -> {MALFORMED: FAILED, MISSING_SUB: FAILED, OK/WARN: INSTALLING}
//! INSTALLING -> {SET_ERROR: FAILED, SET_OK: CONFIRMING}
//! CONFIRMING -> {NO_SESSION: FAILED, SESSION_ACTIVE: SUCCEEDED}
//! ```
//!
//! Attempts are serialised: overlapping attempts would race on the database
//! client's session storage. Nothing is retried automatically; calling
//! [`SessionBridge::attempt_authentication`] again starts a fresh attempt.

use crate::acquirer::{TokenAcquirer, TokenSource};
use crate::config::BridgeConfig;
use crate::diagnostics::{AttemptReport, AttemptStage};
use crate::error::Failure;
use crate::installer::{SessionBackend, SessionInstaller};
use crate::validator::{ClaimValidator, ValidationOutcome};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Exchanges identity provider tokens for database sessions.
pub struct SessionBridge {
    config: BridgeConfig,
    acquirer: TokenAcquirer,
    validator: ClaimValidator,
    installer: SessionInstaller,
    attempt_lock: Mutex<()>,
}

impl std::fmt::Debug for SessionBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBridge")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SessionBridge {
    /// Create a bridge between `source` and `backend`.
    pub fn new(
        config: BridgeConfig,
        source: Arc<dyn TokenSource>,
        backend: Arc<dyn SessionBackend>,
    ) -> Self {
        Self {
            acquirer: TokenAcquirer::new(source, config.template_name()),
            validator: ClaimValidator::new(&config),
            installer: SessionInstaller::new(backend),
            config,
            attempt_lock: Mutex::new(()),
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Check if an attempt is running right now.
    pub fn is_attempt_in_flight(&self) -> bool {
        self.attempt_lock.try_lock().is_err()
    }

    /// Run one authentication attempt.
    pub async fn attempt_authentication(&self) -> AttemptReport {
        self.attempt_authentication_with_cancel(&CancellationToken::new())
            .await
    }

    /// Run one authentication attempt, abandoning it once `cancel` fires.
    ///
    /// Cancellation is observed at every suspension point. A cancelled
    /// attempt performs no further session writes.
    pub async fn attempt_authentication_with_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> AttemptReport {
        let mut report = AttemptReport::begin(self.config.template_name());

        let Some(_guard) = until_cancelled(cancel, self.attempt_lock.lock()).await else {
            debug!("Attempt cancelled while waiting for a previous attempt");
            return report.cancel();
        };

        report.enter(AttemptStage::AcquiringToken);
        let token = match until_cancelled(cancel, self.acquirer.acquire()).await {
            None => return cancelled(report),
            Some(Err(failure)) => return failed(report, failure),
            Some(Ok(token)) => token,
        };

        if let Some(token) = token.as_ref().filter(|t| !t.is_empty()) {
            report.enter(AttemptStage::Validating);
            report.record_token(token);
        }

        let validated = match self.validator.validate(token.as_ref()) {
            Ok(validated) => validated,
            Err(failure) => return failed(report, failure),
        };
        report.record_validation(&validated);

        report.enter(AttemptStage::Installing);
        match until_cancelled(cancel, self.installer.set(validated.token())).await {
            None => return cancelled(report),
            Some(Err(failure)) => return failed(report, failure),
            Some(Ok(())) => {}
        }

        report.enter(AttemptStage::Confirming);
        let session = match until_cancelled(cancel, self.installer.confirm()).await {
            None => return cancelled(report),
            Some(Err(failure)) => return failed(report, failure),
            Some(Ok(session)) => session,
        };

        info!(
            template = %self.config.template_name(),
            token_prefix = %validated.summary().token_prefix,
            warnings = validated.warnings().len(),
            "Database session active"
        );
        report.succeed(session.redacted())
    }

    /// Acquire and validate a token without installing it.
    pub async fn check_template(&self) -> ValidationOutcome {
        let token = self.acquirer.acquire().await?;
        self.validator.validate(token.as_ref())
    }
}

async fn until_cancelled<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        output = fut => Some(output),
    }
}

fn failed(report: AttemptReport, failure: Failure) -> AttemptReport {
    warn!(
        template = %report.template_name,
        stage = ?report.stage,
        kind = %failure.kind,
        detail = %failure.detail,
        "Authentication attempt failed"
    );
    report.fail(failure)
}

fn cancelled(report: AttemptReport) -> AttemptReport {
    debug!(stage = ?report.stage, "Authentication attempt cancelled");
    report.cancel()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::ClaimName;
    use crate::error::{ErrorKind, ProviderError, ProviderResult};
    use crate::installer::{Session, SessionResult, SessionTokens};
    use crate::token::RawToken;
    use async_trait::async_trait;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn token_with(payload: &Value) -> RawToken {
        RawToken::new(format!(
            "{}.{}.signature",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#),
            URL_SAFE_NO_PAD.encode(payload.to_string())
        ))
    }

    fn scenario_c_token() -> RawToken {
        token_with(&json!({
            "sub": "11111111-1111-1111-1111-111111111111",
            "exp": 999,
            "aud": "authenticated"
        }))
    }

    struct StubSource {
        result: ProviderResult<Option<RawToken>>,
        delay: Option<Duration>,
        calls: AtomicUsize,
    }

    impl StubSource {
        fn new(result: ProviderResult<Option<RawToken>>) -> Self {
            Self {
                result,
                delay: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn token(token: RawToken) -> Self {
            Self::new(Ok(Some(token)))
        }
    }

    #[async_trait]
    impl TokenSource for StubSource {
        async fn request_token(&self, _template: &str) -> ProviderResult<Option<RawToken>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.result.clone()
        }
    }

    struct StubBackend {
        set_error: Option<ProviderError>,
        persist: bool,
        set_calls: AtomicUsize,
        stored: std::sync::Mutex<Option<Session>>,
    }

    impl StubBackend {
        fn accepting() -> Self {
            Self {
                set_error: None,
                persist: true,
                set_calls: AtomicUsize::new(0),
                stored: std::sync::Mutex::new(None),
            }
        }

        fn rejecting(error: ProviderError) -> Self {
            Self {
                set_error: Some(error),
                ..Self::accepting()
            }
        }

        fn forgetful() -> Self {
            Self {
                persist: false,
                ..Self::accepting()
            }
        }

        fn set_calls(&self) -> usize {
            self.set_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SessionBackend for StubBackend {
        async fn set_session(&self, tokens: SessionTokens) -> ProviderResult<()> {
            self.set_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(e) = &self.set_error {
                return Err(e.clone());
            }
            if self.persist {
                *self.stored.lock().unwrap() = Some(Session {
                    access_token: tokens.access_token,
                    refresh_token: Some(tokens.refresh_token),
                    expires_at: None,
                    user: None,
                });
            }
            Ok(())
        }

        async fn current_session(&self) -> ProviderResult<Option<Session>> {
            Ok(self.stored.lock().unwrap().clone())
        }
    }

    fn bridge(source: Arc<StubSource>, backend: Arc<StubBackend>) -> SessionBridge {
        SessionBridge::new(BridgeConfig::default(), source, backend)
    }

    #[tokio::test]
    async fn test_scenario_a_token_without_dots() {
        let backend = Arc::new(StubBackend::accepting());
        let bridge = bridge(Arc::new(StubSource::token(RawToken::new("abc"))), backend.clone());

        let report = bridge.attempt_authentication().await;
        assert_eq!(report.result.kind(), Some(ErrorKind::MalformedToken));
        assert_eq!(report.stage, AttemptStage::Validating);
        assert_eq!(backend.set_calls(), 0);
    }

    #[tokio::test]
    async fn test_scenario_b_missing_sub() {
        let token = RawToken::new(format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256"}"#),
            base64::engine::general_purpose::STANDARD.encode(r#"{"exp":123}"#)
        ));
        let backend = Arc::new(StubBackend::accepting());
        let bridge = bridge(Arc::new(StubSource::token(token)), backend.clone());

        let report = bridge.attempt_authentication().await;
        assert_eq!(report.result.kind(), Some(ErrorKind::MissingSubClaim));
        assert_eq!(
            report.missing_claims,
            vec![ClaimName::Sub, ClaimName::Aud]
        );
        assert_eq!(backend.set_calls(), 0);
    }

    #[tokio::test]
    async fn test_scenario_c_active_session() {
        let backend = Arc::new(StubBackend::accepting());
        let bridge = bridge(Arc::new(StubSource::token(scenario_c_token())), backend.clone());

        let report = bridge.attempt_authentication().await;
        assert_eq!(report.result, SessionResult::Active);
        assert!(report.is_ready());
        assert_eq!(report.stage, AttemptStage::Succeeded);
        assert!(report.warnings.is_empty());
        assert!(report.session.is_some());
        assert_eq!(backend.set_calls(), 1);
    }

    #[tokio::test]
    async fn test_scenario_d_template_not_configured() {
        let source = StubSource::new(Err(ProviderError::Internal(
            "No JWT template exists with name foo".to_string(),
        )));
        let backend = Arc::new(StubBackend::accepting());
        let bridge = SessionBridge::new(BridgeConfig::new("foo"), Arc::new(source), backend.clone());

        let report = bridge.attempt_authentication().await;
        let failure = report.failure().unwrap();
        assert_eq!(failure.kind, ErrorKind::TemplateNotConfigured);
        assert!(failure.detail.contains("foo"));
        assert_eq!(report.stage, AttemptStage::AcquiringToken);
        assert_eq!(backend.set_calls(), 0);
    }

    #[tokio::test]
    async fn test_null_token_never_sets_session() {
        let backend = Arc::new(StubBackend::accepting());
        let bridge = bridge(Arc::new(StubSource::new(Ok(None))), backend.clone());

        let report = bridge.attempt_authentication().await;
        assert_eq!(report.result.kind(), Some(ErrorKind::NoToken));
        assert_eq!(report.stage, AttemptStage::AcquiringToken);
        assert!(report.token_prefix.is_none());
        assert_eq!(backend.set_calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_token_fails_before_validation() {
        let backend = Arc::new(StubBackend::accepting());
        let bridge = bridge(Arc::new(StubSource::token(RawToken::new(""))), backend.clone());

        let report = bridge.attempt_authentication().await;
        assert_eq!(report.result.kind(), Some(ErrorKind::NoToken));
        assert_eq!(report.stage, AttemptStage::AcquiringToken);
        assert!(report.token_prefix.is_none());
        assert_eq!(backend.set_calls(), 0);
    }

    #[tokio::test]
    async fn test_session_not_persisted() {
        let backend = Arc::new(StubBackend::forgetful());
        let bridge = bridge(Arc::new(StubSource::token(scenario_c_token())), backend.clone());

        let report = bridge.attempt_authentication().await;
        assert_eq!(report.result.kind(), Some(ErrorKind::SessionNotPersisted));
        assert_eq!(report.stage, AttemptStage::Confirming);
        assert_eq!(backend.set_calls(), 1);
    }

    #[tokio::test]
    async fn test_rejected_session_with_missing_claims() {
        let token = token_with(&json!({"sub": "11111111-1111-1111-1111-111111111111"}));
        let backend = Arc::new(StubBackend::rejecting(ProviderError::Api {
            status: 401,
            message: "invalid JWT".to_string(),
        }));
        let bridge = bridge(Arc::new(StubSource::token(token)), backend);

        let report = bridge.attempt_authentication().await;
        let failure = report.failure().unwrap();
        assert_eq!(failure.kind, ErrorKind::MissingClaims);
        assert!(failure.detail.contains("exp, aud"));
        assert_eq!(report.missing_claims, vec![ClaimName::Exp, ClaimName::Aud]);
        assert_eq!(report.stage, AttemptStage::Installing);
    }

    #[tokio::test]
    async fn test_rejected_session_network() {
        let backend = Arc::new(StubBackend::rejecting(ProviderError::Transport(
            "connection refused".to_string(),
        )));
        let bridge = bridge(Arc::new(StubSource::token(scenario_c_token())), backend);

        let report = bridge.attempt_authentication().await;
        assert_eq!(report.result.kind(), Some(ErrorKind::NetworkOrFetchError));
    }

    #[tokio::test]
    async fn test_retry_is_a_fresh_attempt() {
        let source = Arc::new(StubSource::token(scenario_c_token()));
        let backend = Arc::new(StubBackend::accepting());
        let bridge = bridge(source.clone(), backend.clone());

        assert!(bridge.attempt_authentication().await.is_ready());
        assert!(bridge.attempt_authentication().await.is_ready());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(backend.set_calls(), 2);
    }

    #[tokio::test]
    async fn test_check_template_does_not_install() {
        let backend = Arc::new(StubBackend::accepting());
        let bridge = bridge(
            Arc::new(StubSource::token(token_with(&json!({"sub": "user_2abc"})))),
            backend.clone(),
        );

        let validated = bridge.check_template().await.unwrap();
        assert_eq!(validated.warnings().len(), 2);
        assert_eq!(backend.set_calls(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let backend = Arc::new(StubBackend::accepting());
        let bridge = bridge(Arc::new(StubSource::token(scenario_c_token())), backend.clone());

        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = bridge.attempt_authentication_with_cancel(&cancel).await;
        assert_eq!(report.result, SessionResult::Cancelled);
        assert!(!report.is_ready());
        assert_eq!(backend.set_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_token_request() {
        let source = Arc::new(StubSource {
            delay: Some(Duration::from_secs(30)),
            ..StubSource::token(scenario_c_token())
        });
        let backend = Arc::new(StubBackend::accepting());
        let bridge = bridge(source, backend.clone());

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let report = bridge.attempt_authentication_with_cancel(&cancel).await;
        assert_eq!(report.result, SessionResult::Cancelled);
        assert_eq!(report.stage, AttemptStage::AcquiringToken);
        assert_eq!(backend.set_calls(), 0);
        assert!(!bridge.is_attempt_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_are_serialised() {
        let source = Arc::new(StubSource {
            delay: Some(Duration::from_secs(5)),
            ..StubSource::token(scenario_c_token())
        });
        let backend = Arc::new(StubBackend::accepting());
        let bridge = Arc::new(bridge(source, backend));

        let first = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.attempt_authentication().await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(bridge.is_attempt_in_flight());

        let second = bridge.attempt_authentication().await;
        let first = first.await.unwrap();

        assert!(first.is_ready());
        assert!(second.is_ready());
        assert!(second.started_at >= first.started_at);
        assert!(!bridge.is_attempt_in_flight());
    }
}
