//! axum integration.
//!
//! [`require_auth`] and [`optional_auth`] are middleware functions for
//! `axum::middleware::from_fn_with_state`. They snapshot the parts of the
//! request that can carry a token, run the [`Guard`], and store the
//! resulting [`AuthOutcome`] in request extensions. Handlers read it back
//! with the [`AuthOutcome`] extractor.
//!
//! Form bodies (urlencoded or multipart) are buffered up to
//! [`AuthState::max_form_body_bytes`] so the `access_token` field can be
//! read, then handed on to the handler unchanged. A form body that is
//! larger than the cap, fails to read or does not parse contributes no
//! token; the header and query string are still checked and the body still
//! reaches the handler.
//!
//! # Responses
//!
//! - Authentication failure on a required route: whatever the configured
//!   hooks produce. The default is 401 with a `WWW-Authenticate` header.
//! - Verification key unavailable: 503.
//! - Verification key unusable: 500.

use crate::error::GuardError;
use crate::extract::ACCESS_TOKEN_PARAM;
use crate::guard::{DefaultFailureHooks, Denied, FailureHooks, FailureReason, Guard};
use crate::outcome::AuthOutcome;
use crate::request::BearerRequest;
use axum::{
    async_trait,
    body::{Body, Bytes},
    extract::{FromRequest, FromRequestParts, Multipart, Request, State},
    http::{
        header::{CONTENT_TYPE, WWW_AUTHENTICATE},
        request::Parts,
        HeaderMap, HeaderValue, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

/// Default cap on the form body buffered while looking for `access_token`.
pub const DEFAULT_MAX_FORM_BODY_BYTES: usize = 1024 * 1024;

/// Realm advertised in `WWW-Authenticate`.
pub const REALM: &str = "bearer-guard";

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    /// Guard run on every request.
    pub guard: Guard,

    /// Failure callbacks; the required hook builds the rejection response.
    pub hooks: Arc<dyn FailureHooks<Response>>,

    /// Form bodies larger than this are not searched for a token.
    pub max_form_body_bytes: usize,
}

impl AuthState {
    /// State with the default 401 failure response.
    #[must_use]
    pub fn new(guard: Guard) -> Self {
        Self {
            guard,
            hooks: Arc::new(DefaultFailureHooks),
            max_form_body_bytes: DEFAULT_MAX_FORM_BODY_BYTES,
        }
    }

    /// Change the form body cap.
    #[must_use]
    pub fn with_max_form_body_bytes(mut self, limit: usize) -> Self {
        self.max_form_body_bytes = limit;
        self
    }

    /// Replace the failure callbacks.
    #[must_use]
    pub fn with_hooks(mut self, hooks: impl FailureHooks<Response> + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }
}

impl fmt::Debug for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthState")
            .field("guard", &self.guard)
            .field("max_form_body_bytes", &self.max_form_body_bytes)
            .finish_non_exhaustive()
    }
}

/// Errors the middleware answers with directly.
#[derive(Debug, Error)]
pub enum HttpAuthError {
    /// The request is not authenticated.
    #[error("Unauthorized: {0}")]
    Unauthorized(FailureReason),

    /// Operational failure from the guard.
    #[error(transparent)]
    Guard(#[from] GuardError),
}

impl HttpAuthError {
    /// The HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            HttpAuthError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            HttpAuthError::Guard(GuardError::KeyRetrieval(_)) => StatusCode::SERVICE_UNAVAILABLE,
            HttpAuthError::Guard(GuardError::InvalidKey(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<Denied> for HttpAuthError {
    fn from(denied: Denied) -> Self {
        HttpAuthError::Unauthorized(denied.reason)
    }
}

impl From<Denied> for Response {
    fn from(denied: Denied) -> Self {
        HttpAuthError::from(denied).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for HttpAuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let (code, message) = match &self {
            HttpAuthError::Unauthorized(FailureReason::MalformedRequest) => (
                "INVALID_REQUEST",
                "The authorization request is malformed".to_string(),
            ),
            HttpAuthError::Unauthorized(FailureReason::MissingToken) => {
                ("UNAUTHORIZED", "Authentication required".to_string())
            }
            HttpAuthError::Unauthorized(FailureReason::InvalidToken) => (
                "INVALID_TOKEN",
                "The access token is invalid or expired".to_string(),
            ),
            HttpAuthError::Guard(GuardError::KeyRetrieval(err)) => {
                // Log actual error server-side, return generic message to client
                tracing::warn!(target: "bearer_guard.http", error = %err, "Verification key unavailable");
                (
                    "SERVICE_UNAVAILABLE",
                    "Service temporarily unavailable".to_string(),
                )
            }
            HttpAuthError::Guard(GuardError::InvalidKey(err)) => {
                tracing::error!(target: "bearer_guard.http", error = %err, "Verification key unusable");
                ("INTERNAL_ERROR", "An internal error occurred".to_string())
            }
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        let mut response = (status, Json(error_response)).into_response();

        if let HttpAuthError::Unauthorized(reason) = self {
            if let Ok(header_value) = HeaderValue::from_str(&www_authenticate(reason)) {
                response.headers_mut().insert(WWW_AUTHENTICATE, header_value);
            }
        }

        response
    }
}

impl IntoResponse for GuardError {
    fn into_response(self) -> Response {
        HttpAuthError::Guard(self).into_response()
    }
}

fn www_authenticate(reason: FailureReason) -> String {
    match reason {
        FailureReason::MissingToken => format!("Bearer realm=\"{REALM}\""),
        FailureReason::MalformedRequest => {
            format!("Bearer realm=\"{REALM}\", error=\"invalid_request\"")
        }
        FailureReason::InvalidToken => {
            format!("Bearer realm=\"{REALM}\", error=\"invalid_token\"")
        }
    }
}

/// Middleware that rejects unauthenticated requests.
///
/// On success the handler runs with an authenticated [`AuthOutcome`] in
/// request extensions. On failure the required-failure hook's response is
/// returned and the handler never runs.
#[instrument(skip_all, name = "bearer_guard.http.require_auth")]
pub async fn require_auth(
    State(state): State<Arc<AuthState>>,
    req: Request,
    next: Next,
) -> Result<Response, HttpAuthError> {
    let (snapshot, mut req) = snapshot_request(req, state.max_form_body_bytes).await;

    let response = state
        .guard
        .required(&snapshot, state.hooks.as_ref(), move |outcome| async move {
            req.extensions_mut().insert(outcome);
            next.run(req).await
        })
        .await?;

    Ok(response)
}

/// Middleware that authenticates when it can and always runs the handler.
///
/// Handlers inspect [`AuthOutcome::authenticated`] to branch.
#[instrument(skip_all, name = "bearer_guard.http.optional_auth")]
pub async fn optional_auth(
    State(state): State<Arc<AuthState>>,
    req: Request,
    next: Next,
) -> Result<Response, HttpAuthError> {
    let (snapshot, mut req) = snapshot_request(req, state.max_form_body_bytes).await;

    let response = state
        .guard
        .optional(&snapshot, state.hooks.as_ref(), move |outcome| async move {
            req.extensions_mut().insert(outcome);
            next.run(req).await
        })
        .await?;

    Ok(response)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FormKind {
    UrlEncoded,
    Multipart,
}

fn form_kind(headers: &HeaderMap) -> Option<FormKind> {
    let content_type = headers.get(CONTENT_TYPE)?.to_str().ok()?;
    let essence = content_type.split(';').next()?.trim();

    if essence.eq_ignore_ascii_case("application/x-www-form-urlencoded") {
        Some(FormKind::UrlEncoded)
    } else if essence.eq_ignore_ascii_case("multipart/form-data") {
        Some(FormKind::Multipart)
    } else {
        None
    }
}

/// Snapshot the token-bearing parts of `req` and rebuild it for the handler.
async fn snapshot_request(req: Request, limit: usize) -> (BearerRequest, Request) {
    let snapshot = BearerRequest::from_parts(req.headers().clone(), req.uri().query());

    let Some(kind) = form_kind(req.headers()) else {
        return (snapshot, req);
    };

    let (parts, body) = req.into_parts();
    let bytes = match buffer_body(body, limit).await {
        Buffered::Complete(bytes) => bytes,
        Buffered::Passthrough(body) => return (snapshot, Request::from_parts(parts, body)),
    };

    let snapshot = match kind {
        FormKind::UrlEncoded => snapshot.with_urlencoded_body(&bytes),
        FormKind::Multipart => match multipart_token(&parts.headers, bytes.clone()).await {
            Some(token) => snapshot.with_form_field(ACCESS_TOKEN_PARAM, token),
            None => snapshot,
        },
    };

    (snapshot, Request::from_parts(parts, Body::from(bytes)))
}

/// A form body after trying to buffer it.
enum Buffered {
    /// The whole body, within the cap.
    Complete(Bytes),

    /// Over the cap or failed mid-read. Replays what was read, then the rest.
    Passthrough(Body),
}

async fn buffer_body(body: Body, limit: usize) -> Buffered {
    let mut stream = body.into_data_stream();
    let mut buffered: Vec<u8> = Vec::new();

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => {
                buffered.extend_from_slice(&chunk);
                if buffered.len() > limit {
                    tracing::debug!(
                        target: "bearer_guard.http",
                        limit,
                        "Form body exceeds cap, not searching it for a token"
                    );
                    let head = stream::once(async move { Ok(Bytes::from(buffered)) });
                    return Buffered::Passthrough(Body::from_stream(head.chain(stream)));
                }
            }
            Err(e) => {
                tracing::debug!(target: "bearer_guard.http", error = %e, "Failed to read form body");
                let replay = stream::iter([Ok(Bytes::from(buffered)), Err(e)]);
                return Buffered::Passthrough(Body::from_stream(replay));
            }
        }
    }

    Buffered::Complete(Bytes::from(buffered))
}

/// First `access_token` field of a multipart body, `None` if it has none
/// or does not parse.
async fn multipart_token(headers: &HeaderMap, bytes: Bytes) -> Option<String> {
    let mut form_req = Request::new(Body::from(bytes));
    if let Some(content_type) = headers.get(CONTENT_TYPE) {
        form_req.headers_mut().insert(CONTENT_TYPE, content_type.clone());
    }

    let mut multipart = Multipart::from_request(form_req, &())
        .await
        .map_err(bad_multipart)
        .ok()?;

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart).ok()? {
        if field.name() == Some(ACCESS_TOKEN_PARAM) {
            return field.text().await.map_err(bad_multipart).ok();
        }
    }

    None
}

fn bad_multipart(e: impl fmt::Display) {
    tracing::debug!(target: "bearer_guard.http", error = %e, "Failed to parse multipart body");
}

/// Reads the outcome stored by the middleware.
///
/// Unauthenticated if no auth middleware ran for this request.
#[async_trait]
impl<S> FromRequestParts<S> for AuthOutcome
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<AuthOutcome>()
            .cloned()
            .unwrap_or_default())
    }
}

/// Extension trait for reading the outcome from a request.
pub trait AuthOutcomeExt {
    /// The outcome stored by the auth middleware.
    ///
    /// Returns `None` if auth middleware was not applied to this request.
    fn auth_outcome(&self) -> Option<&AuthOutcome>;
}

impl<B> AuthOutcomeExt for axum::http::Request<B> {
    fn auth_outcome(&self) -> Option<&AuthOutcome> {
        self.extensions().get::<AuthOutcome>()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::KeySourceError;
    use crate::request::RequestParts;
    use http_body_util::BodyExt;

    // Helper function to read the response body as JSON
    async fn read_body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_auth_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AuthState>();
    }

    #[tokio::test]
    async fn test_denied_response_is_401_with_challenge() {
        let response = Response::from(Denied {
            reason: FailureReason::InvalidToken,
        });

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let challenge = response.headers().get("WWW-Authenticate").unwrap();
        assert_eq!(
            challenge.to_str().unwrap(),
            "Bearer realm=\"bearer-guard\", error=\"invalid_token\""
        );

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "INVALID_TOKEN");
        assert_eq!(
            body["error"]["message"],
            "The access token is invalid or expired"
        );
    }

    #[tokio::test]
    async fn test_missing_token_challenge_has_no_error_code() {
        let response = HttpAuthError::Unauthorized(FailureReason::MissingToken).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get("WWW-Authenticate").unwrap(),
            "Bearer realm=\"bearer-guard\""
        );
    }

    #[tokio::test]
    async fn test_malformed_request_challenge() {
        let response = HttpAuthError::Unauthorized(FailureReason::MalformedRequest).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get("WWW-Authenticate").unwrap(),
            "Bearer realm=\"bearer-guard\", error=\"invalid_request\""
        );
        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn test_key_retrieval_is_503_with_generic_message() {
        let response = GuardError::KeyRetrieval(KeySourceError::Unavailable(
            "connect to 10.0.0.7 refused".to_string(),
        ))
        .into_response();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.headers().get("WWW-Authenticate").is_none());

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "SERVICE_UNAVAILABLE");
        assert!(!body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("10.0.0.7"));
    }

    #[tokio::test]
    async fn test_invalid_key_is_500() {
        let response = GuardError::InvalidKey("bad pem".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
    }

    #[test]
    fn test_form_kind_detection() {
        let mut headers = HeaderMap::new();
        assert_eq!(form_kind(&headers), None);

        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded; charset=UTF-8"),
        );
        assert_eq!(form_kind(&headers), Some(FormKind::UrlEncoded));

        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("multipart/form-data; boundary=xyz"),
        );
        assert_eq!(form_kind(&headers), Some(FormKind::Multipart));

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        assert_eq!(form_kind(&headers), None);
    }

    #[tokio::test]
    async fn test_snapshot_restores_urlencoded_body() {
        let req = axum::http::Request::builder()
            .uri("/submit?access_token=q")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("access_token=f&x=1"))
            .unwrap();

        let (snapshot, req) = snapshot_request(req, DEFAULT_MAX_FORM_BODY_BYTES).await;
        assert_eq!(snapshot.form_field("access_token"), Some("f"));
        assert_eq!(snapshot.query_param("access_token"), Some("q"));

        let body = req.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"access_token=f&x=1");
    }

    #[tokio::test]
    async fn test_snapshot_reads_multipart_token() {
        let body = "--XYZ\r\n\
Content-Disposition: form-data; name=\"note\"\r\n\r\n\
hello\r\n\
--XYZ\r\n\
Content-Disposition: form-data; name=\"access_token\"\r\n\r\n\
mp-token\r\n\
--XYZ--\r\n";
        let req = axum::http::Request::builder()
            .uri("/upload")
            .header(CONTENT_TYPE, "multipart/form-data; boundary=XYZ")
            .body(Body::from(body))
            .unwrap();

        let (snapshot, req) = snapshot_request(req, DEFAULT_MAX_FORM_BODY_BYTES).await;
        assert_eq!(snapshot.form_field("access_token"), Some("mp-token"));

        let restored = req.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(restored.len(), body.len());
    }

    #[tokio::test]
    async fn test_oversized_form_body_passes_through_untouched() {
        let mut form = b"access_token=f&pad=".to_vec();
        form.resize(64, b'a');
        let req = axum::http::Request::builder()
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form.clone()))
            .unwrap();

        let (snapshot, req) = snapshot_request(req, 16).await;
        assert_eq!(snapshot.form_field("access_token"), None);

        let body = req.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], &form[..]);
    }

    #[tokio::test]
    async fn test_unparseable_multipart_contributes_no_token() {
        let req = axum::http::Request::builder()
            .header(CONTENT_TYPE, "multipart/form-data; boundary=B")
            .body(Body::from("garbage-not-multipart"))
            .unwrap();

        let (snapshot, req) = snapshot_request(req, DEFAULT_MAX_FORM_BODY_BYTES).await;
        assert_eq!(snapshot.form_field("access_token"), None);

        let body = req.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"garbage-not-multipart");
    }

    #[test]
    fn test_form_cap_is_configurable() {
        let guard = Guard::new(Arc::new(crate::verify::TokenVerifier::new(Arc::new(
            crate::key_cache::VerificationKeyCache::unconfigured(),
        ))));
        let state = AuthState::new(guard);
        assert_eq!(state.max_form_body_bytes, DEFAULT_MAX_FORM_BODY_BYTES);
        assert_eq!(state.with_max_form_body_bytes(10).max_form_body_bytes, 10);
    }

    #[tokio::test]
    async fn test_outcome_extractor_defaults_to_unauthenticated() {
        let req = axum::http::Request::builder().body(Body::empty()).unwrap();
        let (mut parts, _) = req.into_parts();
        let outcome = AuthOutcome::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(outcome, AuthOutcome::unauthenticated());
    }

    #[test]
    fn test_auth_outcome_ext() {
        let mut req = axum::http::Request::builder().body(Body::empty()).unwrap();
        assert!(req.auth_outcome().is_none());

        req.extensions_mut().insert(AuthOutcome::unauthenticated());
        assert_eq!(req.auth_outcome(), Some(&AuthOutcome::unauthenticated()));
    }
}
