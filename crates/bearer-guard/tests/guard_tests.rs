//! Guard integration tests.
//!
//! Drives `Guard::required` and `Guard::optional` end to end: real signed
//! tokens, a real key cache, and handlers that record whether they ran.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderValue;
use bearer_guard::extract::extract_default;
use bearer_guard::guard::{DefaultFailureHooks, Denied, FailureHooks, FailureReason};
use bearer_guard::verify::TokenChecker;
use bearer_guard::{
    AuthError, AuthOutcome, BearerRequest, Guard, GuardError, KeySourceError, RequestParts,
    TokenVerifier, VerificationKeyCache, Verify,
};
use bearer_guard::clock::Clock;
use bearer_guard_test_utils::{
    init_test_tracing, CountingKeySource, FailingKeySource, ManualClock, TestKeyPair,
    TestTokenBuilder,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn verifier_for(pair: &TestKeyPair) -> Arc<TokenVerifier> {
    let cache = VerificationKeyCache::unconfigured().with_permanent_key(pair.verification_key.clone());
    Arc::new(TokenVerifier::new(Arc::new(cache)))
}

fn with_bearer(token: &str) -> BearerRequest {
    BearerRequest::new().with_header(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer: {token}")).unwrap(),
    )
}

/// What a guarded handler returns in these tests.
#[derive(Debug, PartialEq)]
enum Reply {
    Ok(Option<String>),
    Denied(FailureReason),
}

impl From<Denied> for Reply {
    fn from(denied: Denied) -> Self {
        Reply::Denied(denied.reason)
    }
}

/// Records every failure callback.
#[derive(Default)]
struct RecordingHooks {
    required: Mutex<Vec<FailureReason>>,
    optional: Mutex<Vec<FailureReason>>,
}

impl FailureHooks<Reply> for RecordingHooks {
    fn on_required_failure(&self, reason: FailureReason) -> Reply {
        self.required.lock().unwrap().push(reason);
        Reply::Denied(reason)
    }

    fn on_optional_failure(&self, reason: FailureReason) {
        self.optional.lock().unwrap().push(reason);
    }
}

#[tokio::test]
async fn test_required_runs_handler_with_claims() {
    init_test_tracing();
    let pair = TestKeyPair::rsa_a();
    let guard = Guard::new(verifier_for(&pair));
    let token = TestTokenBuilder::new().for_user("alice").sign_with(&pair);

    let reply = guard
        .required(&with_bearer(&token), &DefaultFailureHooks, |outcome: AuthOutcome| async move {
            assert!(outcome.is_authenticated());
            assert!(outcome.raw_token.is_some());
            Reply::Ok(outcome.subject().map(str::to_string))
        })
        .await
        .unwrap();

    assert_eq!(reply, Reply::Ok(Some("alice".to_string())));
}

#[tokio::test]
async fn test_required_failure_skips_handler() {
    let pair = TestKeyPair::rsa_a();
    let guard = Guard::new(verifier_for(&pair));
    let forged = TestTokenBuilder::new().sign_with(&TestKeyPair::rsa_b());
    let hooks = RecordingHooks::default();
    let ran = AtomicUsize::new(0);
    let ran_ref = &ran;

    let cases = [
        (BearerRequest::new(), FailureReason::MissingToken),
        (with_bearer(&forged), FailureReason::InvalidToken),
        (
            BearerRequest::new().with_header(AUTHORIZATION, HeaderValue::from_static("Basic abc")),
            FailureReason::MalformedRequest,
        ),
    ];

    for (request, expected) in cases {
        let reply = guard
            .required(&request, &hooks, |_| async move {
                ran_ref.fetch_add(1, Ordering::SeqCst);
                Reply::Ok(None)
            })
            .await
            .unwrap();
        assert_eq!(reply, Reply::Denied(expected));
    }

    assert_eq!(ran.load(Ordering::SeqCst), 0, "handler must not run");
    assert_eq!(
        *hooks.required.lock().unwrap(),
        vec![
            FailureReason::MissingToken,
            FailureReason::InvalidToken,
            FailureReason::MalformedRequest
        ]
    );
    assert!(hooks.optional.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_optional_failure_runs_handler_unauthenticated() {
    let pair = TestKeyPair::rsa_a();
    let guard = Guard::new(verifier_for(&pair));
    let expired = TestTokenBuilder::new().expires_in(-60).sign_with(&pair);
    let hooks = RecordingHooks::default();

    let reply = guard
        .optional(&with_bearer(&expired), &hooks, |outcome: AuthOutcome| async move {
            assert_eq!(outcome, AuthOutcome::unauthenticated());
            Reply::Ok(None)
        })
        .await
        .unwrap();

    assert_eq!(reply, Reply::Ok(None));
    assert_eq!(*hooks.optional.lock().unwrap(), vec![FailureReason::InvalidToken]);
    assert!(hooks.required.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_optional_success_skips_failure_hook() {
    let pair = TestKeyPair::rsa_a();
    let guard = Guard::new(verifier_for(&pair));
    let token = TestTokenBuilder::new().for_user("bob").sign_with(&pair);
    let hooks = RecordingHooks::default();

    let reply = guard
        .optional(&with_bearer(&token), &hooks, |outcome: AuthOutcome| async move {
            Reply::Ok(outcome.subject().map(str::to_string))
        })
        .await
        .unwrap();

    assert_eq!(reply, Reply::Ok(Some("bob".to_string())));
    assert!(hooks.optional.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_token_from_query_and_form_sources() {
    let pair = TestKeyPair::rsa_a();
    let guard = Guard::new(verifier_for(&pair));
    let token = TestTokenBuilder::new().sign_with(&pair);

    for request in [
        BearerRequest::new().with_query_param("access_token", token.clone()),
        BearerRequest::new().with_form_field("access_token", token.clone()),
        with_bearer(&token).with_query_param("access_token", token.clone()),
    ] {
        let reply = guard
            .required(&request, &DefaultFailureHooks, |_| async { Reply::Ok(None) })
            .await
            .unwrap();
        assert_eq!(reply, Reply::Ok(None));
    }
}

#[tokio::test]
async fn test_conflicting_tokens_are_malformed() {
    let pair = TestKeyPair::rsa_a();
    let guard = Guard::new(verifier_for(&pair));
    let first = TestTokenBuilder::new().for_user("a").sign_with(&pair);
    let second = TestTokenBuilder::new().for_user("b").sign_with(&pair);

    let request = with_bearer(&first).with_query_param("access_token", second);
    let reply = guard
        .required(&request, &DefaultFailureHooks, |_| async { Reply::Ok(None) })
        .await
        .unwrap();

    assert_eq!(reply, Reply::Denied(FailureReason::MalformedRequest));
}

#[tokio::test]
async fn test_key_retrieval_error_reaches_host_from_both_wrappers() {
    let source = Arc::new(FailingKeySource::new(KeySourceError::Unavailable(
        "503 from key server".to_string(),
    )));
    let verifier = Arc::new(TokenVerifier::new(Arc::new(VerificationKeyCache::new(
        source.clone(),
    ))));
    let guard = Guard::new(verifier);
    let token = TestTokenBuilder::new().sign_with(&TestKeyPair::rsa_a());
    let hooks = RecordingHooks::default();

    let required = guard
        .required(&with_bearer(&token), &hooks, |_| async { Reply::Ok(None) })
        .await;
    let optional = guard
        .optional(&with_bearer(&token), &hooks, |_| async { Reply::Ok(None) })
        .await;

    let expected = GuardError::KeyRetrieval(KeySourceError::Unavailable(
        "503 from key server".to_string(),
    ));
    assert_eq!(required.unwrap_err(), expected);
    assert_eq!(optional.unwrap_err(), expected);
    assert!(hooks.required.lock().unwrap().is_empty());
    assert!(hooks.optional.lock().unwrap().is_empty());
    assert_eq!(source.calls(), 2, "failures are not cached");
}

#[tokio::test]
async fn test_missing_token_never_fetches_key() {
    let pair = TestKeyPair::rsa_a();
    let source = Arc::new(CountingKeySource::new(pair.verification_key.clone()));
    let verifier = Arc::new(TokenVerifier::new(Arc::new(VerificationKeyCache::new(
        source.clone(),
    ))));
    let guard = Guard::new(verifier);

    let reply = guard
        .required(&BearerRequest::new(), &DefaultFailureHooks, |_| async {
            Reply::Ok(None)
        })
        .await
        .unwrap();

    assert_eq!(reply, Reply::Denied(FailureReason::MissingToken));
    assert_eq!(source.calls(), 0);
}

/// Accepts only tokens carrying a scope, on top of the default check.
struct ScopeChecker {
    inner: Arc<TokenVerifier>,
    scope: &'static str,
}

#[async_trait]
impl TokenChecker for ScopeChecker {
    async fn check_token(&self, token: &str) -> Result<bool, AuthError> {
        if !self.inner.check_token(token).await? {
            return Ok(false);
        }
        Ok(self
            .inner
            .decoded_claims(token, Verify::Full)
            .await?
            .has_scope(self.scope))
    }
}

#[tokio::test]
async fn test_custom_checker_narrows_acceptance() {
    let pair = TestKeyPair::rsa_a();
    let verifier = verifier_for(&pair);
    let guard = Guard::builder(Arc::clone(&verifier))
        .checker(ScopeChecker {
            inner: verifier,
            scope: "admin",
        })
        .build();

    let admin = TestTokenBuilder::new().with_scope("admin").sign_with(&pair);
    let user = TestTokenBuilder::new().with_scope("user").sign_with(&pair);

    let handler = |outcome: AuthOutcome| async move { Reply::Ok(outcome.subject().map(str::to_string)) };

    assert!(matches!(
        guard
            .required(&with_bearer(&admin), &DefaultFailureHooks, handler)
            .await
            .unwrap(),
        Reply::Ok(Some(_))
    ));
    assert_eq!(
        guard
            .required(&with_bearer(&user), &DefaultFailureHooks, handler)
            .await
            .unwrap(),
        Reply::Denied(FailureReason::InvalidToken)
    );
}

#[tokio::test]
async fn test_custom_extractor_adds_header_source() {
    let pair = TestKeyPair::rsa_a();
    let extractor = |request: &dyn RequestParts| -> Result<Option<String>, AuthError> {
        if let Some(raw) = request.header("x-api-token") {
            return Ok(Some(String::from_utf8_lossy(raw).into_owned()));
        }
        extract_default(request)
    };
    let guard = Guard::builder(verifier_for(&pair)).extractor(extractor).build();

    let token = TestTokenBuilder::new().for_user("robot").sign_with(&pair);
    let request = BearerRequest::new().with_header(
        axum::http::HeaderName::from_static("x-api-token"),
        HeaderValue::from_str(&token).unwrap(),
    );

    let reply = guard
        .required(&request, &DefaultFailureHooks, |outcome: AuthOutcome| async move {
            Reply::Ok(outcome.subject().map(str::to_string))
        })
        .await
        .unwrap();
    assert_eq!(reply, Reply::Ok(Some("robot".to_string())));

    // The default sources still work
    let reply = guard
        .required(&with_bearer(&token), &DefaultFailureHooks, |_| async {
            Reply::Ok(None)
        })
        .await
        .unwrap();
    assert_eq!(reply, Reply::Ok(None));
}

#[tokio::test]
async fn test_closure_hook_customizes_required_result() {
    let pair = TestKeyPair::rsa_a();
    let guard = Guard::new(verifier_for(&pair));
    let hook = |reason: FailureReason| format!("denied: {reason}");

    let reply = guard
        .required(&BearerRequest::new(), &hook, |_| async { "ok".to_string() })
        .await
        .unwrap();

    assert_eq!(reply, "denied: missing_token");
}

/// Moves a `ManualClock` forward every time the cache reads it.
struct SteppingClock {
    inner: ManualClock,
    step: Duration,
}

impl Clock for SteppingClock {
    fn now(&self) -> Instant {
        let now = self.inner.now();
        self.inner.advance(self.step);
        now
    }
}

#[tokio::test]
async fn test_key_expiring_mid_request_does_not_reject_token() {
    let signer = TestKeyPair::rsa_a();
    // The second retrieval would hand back a key that cannot verify the token
    let source = Arc::new(CountingKeySource::sequence(vec![
        signer.verification_key.clone(),
        TestKeyPair::rsa_b().verification_key,
    ]));
    let clock = Arc::new(SteppingClock {
        inner: ManualClock::new(),
        step: Duration::from_secs(301),
    });
    let cache = VerificationKeyCache::new(source.clone()).with_clock(clock);
    let guard = Guard::new(Arc::new(TokenVerifier::new(Arc::new(cache))));

    let token = TestTokenBuilder::new().for_user("alice").sign_with(&signer);
    let reply = guard
        .required(&with_bearer(&token), &DefaultFailureHooks, |outcome: AuthOutcome| async move {
            Reply::Ok(outcome.subject().map(str::to_string))
        })
        .await
        .unwrap();

    assert_eq!(reply, Reply::Ok(Some("alice".to_string())));
    assert_eq!(source.calls(), 1, "one key lookup per request");
}
