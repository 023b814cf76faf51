//! Rate limiting for authentication endpoints.
//!
//! Uses a token bucket algorithm with per-IP tracking to prevent brute force
//! attacks.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::{net::SocketAddr, num::NonZeroU32, sync::Arc};

/// Per-IP rate limiter for endpoint-specific limiting.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Rate limiting configuration for authentication endpoints.
#[derive(Clone)]
pub struct RateLimitConfig {
    /// Per-IP limiter for sign-in (strict: 5 attempts burst, 1/s sustained)
    pub sign_in: Arc<IpLimiter>,
    /// Per-IP limiter for account creation (strict: 3 per minute)
    pub sign_up: Arc<IpLimiter>,
    /// Per-IP limiter for token refresh (generous: 10 per second)
    pub refresh: Arc<IpLimiter>,
}

impl RateLimitConfig {
    /// Create rate limiters with default configuration.
    pub fn new() -> Self {
        Self {
            sign_in: Arc::new(RateLimiter::keyed(
                Quota::per_second(NonZeroU32::new(1).unwrap())
                    .allow_burst(NonZeroU32::new(5).unwrap()),
            )),
            sign_up: Arc::new(RateLimiter::keyed(Quota::per_minute(
                NonZeroU32::new(3).unwrap(),
            ))),
            refresh: Arc::new(RateLimiter::keyed(Quota::per_second(
                NonZeroU32::new(10).unwrap(),
            ))),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the client IP for rate-limit keying: X-Forwarded-For first
/// (reverse proxy), then the connection address. Without either, all
/// clients share one bucket.
fn client_key(request: &Request) -> String {
    if let Some(forwarded_for) = request.headers().get("x-forwarded-for") {
        if let Ok(value) = forwarded_for.to_str() {
            if let Some(first_ip) = value.split(',').next() {
                let ip = first_ip.trim();
                if !ip.is_empty() {
                    return ip.to_string();
                }
            }
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn too_many(message: &'static str) -> Response {
    (StatusCode::TOO_MANY_REQUESTS, message).into_response()
}

/// Middleware for rate limiting sign-in attempts.
pub async fn rate_limit_sign_in(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    match config.sign_in.check_key(&client_key(&request)) {
        Ok(_) => next.run(request).await,
        Err(_) => too_many("Too many sign-in attempts. Please wait before trying again."),
    }
}

/// Middleware for rate limiting account creation.
pub async fn rate_limit_sign_up(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    match config.sign_up.check_key(&client_key(&request)) {
        Ok(_) => next.run(request).await,
        Err(_) => too_many("Too many signup attempts. Please wait before trying again."),
    }
}

/// Middleware for rate limiting token refresh.
pub async fn rate_limit_refresh(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    match config.refresh.check_key(&client_key(&request)) {
        Ok(_) => next.run(request).await,
        Err(_) => too_many("Too many requests. Please try again later."),
    }
}
