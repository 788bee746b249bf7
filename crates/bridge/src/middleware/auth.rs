//! Authentication middleware for the proxy endpoint.
//!
//! Extracts the bearer token from `X-Bridge-Authorization`, validates it
//! against the current public-key set at the frozen request time, binds
//! the tenant, and strips the header before the request is forwarded.

use crate::auth::{KeySetProvider, X_BRIDGE_AUTHORIZATION};
use crate::ctxtime;
use crate::errors::BridgeError;
use crate::middleware::{BoxedHandler, Middleware};
use axum::body::Body;
use axum::extract::Request;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use std::sync::Arc;
use tower::util::BoxCloneSyncService;
use tower::{service_fn, ServiceExt};

/// Configuration for the authentication middleware.
pub struct AuthConfig {
    /// When non-empty, tokens whose tenant claim differs are rejected.
    pub expected_tenant_id: String,

    /// Source of the current public-key set.
    pub keys: Arc<dyn KeySetProvider>,
}

/// Extracts the bearer token from `header_key`.
///
/// The `Bearer` prefix is matched case-insensitively; anything non-empty
/// after it passes the lexical check.
fn parse_bearer(headers: &HeaderMap, header_key: &str) -> Option<String> {
    let value = headers.get(header_key)?.to_str().ok()?;
    if value.len() > 7 && value[..7].eq_ignore_ascii_case("bearer ") {
        return Some(value[7..].to_string());
    }
    None
}

/// Middleware handling authentication and tenant authorization.
///
/// Responds 400 when the bearer header is missing or malformed, 401 when
/// the token or tenant is rejected, and 500 when an otherwise valid token
/// carries no usable `user` claim (an upstream minting bug).
pub fn middleware(config: Arc<AuthConfig>) -> Middleware {
    Box::new(move |next: BoxedHandler| {
        let config = Arc::clone(&config);
        BoxCloneSyncService::new(service_fn(move |mut req: Request<Body>| {
            let config = Arc::clone(&config);
            let next = next.clone();
            async move {
                let Some(bearer) = parse_bearer(req.headers(), X_BRIDGE_AUTHORIZATION) else {
                    return Ok(BridgeError::BadRequest.into_response());
                };

                let now = ctxtime::now(req.extensions());

                let key_set = config.keys.key_set();
                let claims = match crate::auth::verify_token(&bearer, &key_set, now) {
                    Ok(claims) => claims,
                    Err(err) => {
                        tracing::warn!(
                            target: "bridge.auth",
                            error = %err,
                            "jwt unauthorized error"
                        );
                        return Ok(BridgeError::Unauthorized.into_response());
                    }
                };

                let Some(user) = claims.user() else {
                    tracing::error!(target: "bridge.auth", "user not found in claims");
                    return Ok(BridgeError::Internal.into_response());
                };

                if !config.expected_tenant_id.is_empty()
                    && user.tenant.id != config.expected_tenant_id
                {
                    tracing::warn!(
                        target: "bridge.auth",
                        token_tenant_id = %user.tenant.id,
                        expected_tenant_id = %config.expected_tenant_id,
                        "mismatched tenant ID"
                    );
                    return Ok(BridgeError::Unauthorized.into_response());
                }

                // must not forward to the upstream
                req.headers_mut().remove(X_BRIDGE_AUTHORIZATION);

                next.oneshot(req).await
            }
        }))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::ctxtime::with_time;
    use axum::http::StatusCode;
    use axum::response::Response;
    use bridge_test_utils::token::{TestKeyPair, TokenBuilder};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use jsonwebtoken::jwk::JwkSet;
    use std::convert::Infallible;

    struct StaticKeys(Arc<JwkSet>);

    impl KeySetProvider for StaticKeys {
        fn key_set(&self) -> Arc<JwkSet> {
            Arc::clone(&self.0)
        }
    }

    /// Terminal handler returning 200 and asserting the bearer header was
    /// stripped before hand-off.
    fn ok_handler() -> BoxedHandler {
        BoxCloneSyncService::new(service_fn(|req: Request<Body>| async move {
            assert!(
                req.headers().get(X_BRIDGE_AUTHORIZATION).is_none(),
                "authorization header must not reach the upstream handler"
            );
            Ok::<Response, Infallible>(StatusCode::OK.into_response())
        }))
    }

    fn chain(key: &TestKeyPair, expected_tenant_id: &str) -> BoxedHandler {
        let config = Arc::new(AuthConfig {
            expected_tenant_id: expected_tenant_id.to_string(),
            keys: Arc::new(StaticKeys(Arc::new(key.jwk_set()))),
        });
        middleware(config)(ok_handler())
    }

    fn request(header: Option<&str>, now: DateTime<Utc>) -> Request<Body> {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = header {
            builder = builder.header(X_BRIDGE_AUTHORIZATION, value);
        }
        let mut req = builder.body(Body::empty()).unwrap();
        with_time(req.extensions_mut(), now);
        req
    }

    fn frozen_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_valid_token_passes() {
        let key = TestKeyPair::from_seed(1, "test-kid");
        let now = frozen_now();
        let token = TokenBuilder::new("tenant-a")
            .issued_at(now - Duration::minutes(1))
            .not_before(now - Duration::hours(1))
            .expires_at(now + Duration::hours(1))
            .sign(&key);

        let response = chain(&key, "tenant-a")
            .oneshot(request(Some(&format!("Bearer {}", token)), now))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_lowercase_bearer_prefix_passes() {
        let key = TestKeyPair::from_seed(1, "test-kid");
        let now = frozen_now();
        let token = TokenBuilder::new("tenant-a")
            .not_before(now - Duration::hours(1))
            .expires_at(now + Duration::hours(1))
            .sign(&key);

        let response = chain(&key, "tenant-a")
            .oneshot(request(Some(&format!("bearer {}", token)), now))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_header_is_bad_request() {
        let key = TestKeyPair::from_seed(1, "test-kid");
        let response = chain(&key, "tenant-a")
            .oneshot(request(None, frozen_now()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_non_bearer_scheme_is_bad_request() {
        let key = TestKeyPair::from_seed(1, "test-kid");
        let response = chain(&key, "tenant-a")
            .oneshot(request(Some("Token abc"), frozen_now()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_empty_bearer_is_bad_request() {
        let key = TestKeyPair::from_seed(1, "test-kid");
        let response = chain(&key, "tenant-a")
            .oneshot(request(Some("Bearer "), frozen_now()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_mismatched_tenant_is_unauthorized() {
        let key = TestKeyPair::from_seed(1, "test-kid");
        let now = frozen_now();
        let token = TokenBuilder::new("tenant-u")
            .not_before(now - Duration::hours(1))
            .expires_at(now + Duration::hours(1))
            .sign(&key);

        let response = chain(&key, "tenant-t")
            .oneshot(request(Some(&format!("Bearer {}", token)), now))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_empty_expected_tenant_accepts_any() {
        let key = TestKeyPair::from_seed(1, "test-kid");
        let now = frozen_now();
        let token = TokenBuilder::new("whatever-tenant")
            .not_before(now - Duration::hours(1))
            .expires_at(now + Duration::hours(1))
            .sign(&key);

        let response = chain(&key, "")
            .oneshot(request(Some(&format!("Bearer {}", token)), now))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_not_yet_valid_token_is_unauthorized() {
        let key = TestKeyPair::from_seed(1, "test-kid");
        let now = frozen_now();
        let token = TokenBuilder::new("tenant-a")
            .not_before(now + Duration::seconds(1))
            .expires_at(now + Duration::hours(1))
            .sign(&key);

        let response = chain(&key, "tenant-a")
            .oneshot(request(Some(&format!("Bearer {}", token)), now))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_expired_token_is_unauthorized() {
        let key = TestKeyPair::from_seed(1, "test-kid");
        let now = frozen_now();
        let token = TokenBuilder::new("tenant-a")
            .not_before(now - Duration::hours(2))
            .expires_at(now - Duration::seconds(1))
            .sign(&key);

        let response = chain(&key, "tenant-a")
            .oneshot(request(Some(&format!("Bearer {}", token)), now))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_token_without_user_claim_is_internal_error() {
        let key = TestKeyPair::from_seed(1, "test-kid");
        let now = frozen_now();
        let token = TokenBuilder::new("tenant-a")
            .not_before(now - Duration::hours(1))
            .expires_at(now + Duration::hours(1))
            .without_user()
            .sign(&key);

        let response = chain(&key, "tenant-a")
            .oneshot(request(Some(&format!("Bearer {}", token)), now))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_parse_bearer_requires_token_after_prefix() {
        let mut headers = HeaderMap::new();
        headers.insert(X_BRIDGE_AUTHORIZATION, "BEARER x".parse().unwrap());
        assert_eq!(
            parse_bearer(&headers, X_BRIDGE_AUTHORIZATION),
            Some("x".to_string())
        );

        headers.insert(X_BRIDGE_AUTHORIZATION, "Bearer".parse().unwrap());
        assert_eq!(parse_bearer(&headers, X_BRIDGE_AUTHORIZATION), None);
    }
}
