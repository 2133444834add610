//! Per-client rate limiting keyed by the resolved client IP

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    DefaultKeyedRateLimiter, Quota, RateLimiter,
    clock::{Clock, DefaultClock},
};
use observability::counter;
use serde_json::json;
use tracing::debug;

use crate::config::RateLimitConfig;

/// Client IP for rate limiting.
///
/// First hop of `X-Forwarded-For`, then `X-Real-IP`, then the peer address.
/// Unparseable header values are skipped.
pub fn client_ip(headers: &HeaderMap, socket: Option<SocketAddr>) -> Option<IpAddr> {
    let forwarded: Option<IpAddr> = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|first| first.trim().parse().ok());

    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok())
    };

    forwarded
        .or_else(real_ip)
        .or_else(|| socket.map(|addr| addr.ip()))
}

/// Keyed token bucket shared by every request
#[derive(Clone)]
pub struct ClientRateLimiter {
    limiter: Arc<DefaultKeyedRateLimiter<IpAddr>>,
}

impl ClientRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let quota = Quota::per_minute(config.per_minute).allow_burst(config.burst);
        Self {
            limiter: Arc::new(RateLimiter::keyed(quota)),
        }
    }

    /// `Err` carries the wait in whole seconds before the next request may pass
    pub fn check(&self, ip: IpAddr) -> Result<(), u64> {
        self.limiter.check_key(&ip).map_err(|not_until| {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            wait.as_secs().max(1)
        })
    }

    /// Drop idle client buckets
    pub fn retain_recent(&self) {
        self.limiter.retain_recent();
    }
}

/// Rejects requests with 429 once the client's bucket is empty.
///
/// Requests with no resolvable client address share one bucket.
pub async fn rate_limit(
    State(limiter): State<ClientRateLimiter>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let socket = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(request.headers(), socket).unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    match limiter.check(ip) {
        Ok(()) => next.run(request).await,
        Err(retry_after) => {
            debug!(client_ip = %ip, retry_after, "Rate limit exceeded");
            counter!("http_requests_rate_limited_total").increment(1);

            let body = Json(json!({
                "error": "rate_limited",
                "message": "Too many requests",
                "code": StatusCode::TOO_MANY_REQUESTS.as_u16()
            }));
            let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, middleware, routing::get};
    use std::num::NonZeroU32;
    use tower::ServiceExt;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, value.parse().unwrap());
        }
        map
    }

    fn socket() -> Option<SocketAddr> {
        Some("10.0.0.9:5000".parse().unwrap())
    }

    #[test]
    fn test_client_ip_prefers_first_forwarded_hop() {
        let map = headers(&[
            ("x-forwarded-for", "203.0.113.7, 10.0.0.1"),
            ("x-real-ip", "198.51.100.2"),
        ]);
        assert_eq!(client_ip(&map, socket()), Some("203.0.113.7".parse().unwrap()));
    }

    #[test]
    fn test_client_ip_falls_back_in_order() {
        let map = headers(&[("x-forwarded-for", "garbage"), ("x-real-ip", " 198.51.100.2 ")]);
        assert_eq!(client_ip(&map, socket()), Some("198.51.100.2".parse().unwrap()));

        assert_eq!(client_ip(&HeaderMap::new(), socket()), Some("10.0.0.9".parse().unwrap()));
        assert_eq!(client_ip(&HeaderMap::new(), None), None);
    }

    #[test]
    fn test_client_ip_accepts_ipv6() {
        let map = headers(&[("x-forwarded-for", "2001:db8::1")]);
        assert_eq!(client_ip(&map, None), Some("2001:db8::1".parse().unwrap()));
    }

    fn app(burst: u32) -> Router {
        let limiter = ClientRateLimiter::new(RateLimitConfig {
            per_minute: NonZeroU32::new(1).unwrap(),
            burst: NonZeroU32::new(burst).unwrap(),
        });
        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(limiter, rate_limit))
    }

    fn request_from(ip: &str) -> Request<Body> {
        Request::builder()
            .uri("/")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_rate_limit_returns_429_after_burst() {
        let app = app(2);

        for _ in 0..2 {
            let response = app.clone().oneshot(request_from("203.0.113.7")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app.clone().oneshot(request_from("203.0.113.7")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key(header::RETRY_AFTER));

        // Other clients keep their own budget
        let response = app.oneshot(request_from("198.51.100.2")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
