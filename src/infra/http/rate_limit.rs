use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::warn;

use crate::cache::{Decision, RateLimitPolicy, RateLimiter, Scope};

/// Authenticated user id, inserted by the auth middleware upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser(pub i64);

/// Per-route rate limiting state: one gate per guarded action.
#[derive(Clone)]
pub struct RateLimitGate {
    pub limiter: Arc<RateLimiter>,
    pub action: &'static str,
    pub policy: RateLimitPolicy,
}

#[derive(Debug, Serialize)]
struct RateLimitBody {
    error: RateLimitMessage,
}

#[derive(Debug, Serialize)]
struct RateLimitMessage {
    code: &'static str,
    message: String,
}

/// Admission middleware. Counts the request against the authenticated user
/// when one is known, falling back to the client address; a request with
/// neither identity is allowed through with a warning.
pub async fn rate_limit(
    State(gate): State<RateLimitGate>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let scope = match request.extensions().get::<AuthUser>() {
        Some(user) => Scope::User(user.0),
        None => match request.extensions().get::<ConnectInfo<SocketAddr>>() {
            Some(info) => Scope::Ip(info.0.ip().to_string()),
            None => {
                warn!(
                    action = gate.action,
                    "no identity available for rate limiting, allowing request"
                );
                return next.run(request).await;
            }
        },
    };

    match gate.limiter.check(gate.action, &scope, gate.policy).await {
        Decision::Allow => next.run(request).await,
        Decision::Deny => rate_limited(gate.policy.window().as_secs().max(1)),
    }
}

fn rate_limited(retry_after: u64) -> Response {
    let body = RateLimitBody {
        error: RateLimitMessage {
            code: "rate_limited",
            message: format!("Rate limit exceeded, retry after {retry_after} seconds"),
        },
    };
    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    if let Ok(value) = header::HeaderValue::from_str(&retry_after.to_string()) {
        response.headers_mut().insert(header::RETRY_AFTER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use axum::{Router, middleware, routing::get};
    use tower::ServiceExt;

    use super::*;
    use crate::cache::{CacheConfig, MemoryCache};

    fn app(limit: i64) -> Router {
        let gate = RateLimitGate {
            limiter: Arc::new(RateLimiter::new(
                Arc::new(MemoryCache::new()),
                &CacheConfig::default(),
            )),
            action: "like",
            policy: RateLimitPolicy {
                limit,
                window_secs: 60,
            },
        };

        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(gate, rate_limit))
    }

    fn request_as_user(uid: i64) -> Request<Body> {
        Request::builder()
            .uri("/")
            .extension(AuthUser(uid))
            .body(Body::empty())
            .unwrap()
    }

    fn request_from_ip(addr: &str) -> Request<Body> {
        let addr: SocketAddr = addr.parse().unwrap();
        Request::builder()
            .uri("/")
            .extension(ConnectInfo(addr))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn denies_with_retry_after_once_over_limit() {
        let app = app(2);

        for _ in 0..2 {
            let response = app.clone().oneshot(request_as_user(7)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app.clone().oneshot(request_as_user(7)).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
            Some("60")
        );
    }

    #[tokio::test]
    async fn user_identity_wins_over_client_address() {
        let app = app(1);

        // Same user from two addresses shares one window.
        let addr: SocketAddr = "1.2.3.4:5000".parse().unwrap();
        let first = Request::builder()
            .uri("/")
            .extension(AuthUser(7))
            .extension(ConnectInfo(addr))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(first).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let other_addr: SocketAddr = "5.6.7.8:5000".parse().unwrap();
        let second = Request::builder()
            .uri("/")
            .extension(AuthUser(7))
            .extension(ConnectInfo(other_addr))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(second).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn anonymous_requests_count_per_address() {
        let app = app(1);

        let response = app
            .clone()
            .oneshot(request_from_ip("1.2.3.4:5000"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(request_from_ip("1.2.3.4:6000"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        // A different address gets its own window.
        let response = app
            .clone()
            .oneshot(request_from_ip("5.6.7.8:5000"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn identityless_request_is_allowed() {
        let app = app(1);

        for _ in 0..3 {
            let request = Request::builder().uri("/").body(Body::empty()).unwrap();
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }
}
