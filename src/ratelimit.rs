//! Rate Limit Middleware
//!
//! IP-keyed request limits backed by the cache store's windowed counter.
//! The global limit covers the whole API surface; login and registration get
//! tighter windows. All checks fail open when the cache backend is down.

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use std::net::SocketAddr;

use crate::api::AppState;
use crate::error::ApiError;

/// Global API limit: 1000 requests per 15 minutes per IP.
const GLOBAL_LIMIT: i64 = 1000;
const GLOBAL_WINDOW_SECONDS: i64 = 15 * 60;

/// Login limit: 5 attempts per minute per IP.
const LOGIN_LIMIT: i64 = 5;
const LOGIN_WINDOW_SECONDS: i64 = 60;

/// Registration (and guest-session) limit: 3 per minute per IP.
const REGISTER_LIMIT: i64 = 3;
const REGISTER_WINDOW_SECONDS: i64 = 60;

/// Extract the client IP, honoring `X-Forwarded-For` (trust-proxy; the
/// server sits behind a reverse proxy in production).
fn client_ip(request: &Request, addr: SocketAddr) -> String {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|ip| ip.trim().to_string())
        .unwrap_or_else(|| addr.ip().to_string())
}

async fn check(
    state: &AppState,
    request: &Request,
    addr: SocketAddr,
    category: &str,
    limit: i64,
    window_seconds: i64,
) -> Result<(), ApiError> {
    let ip = client_ip(request, addr);
    let key = format!("ratelimit:{category}:{ip}");

    let decision = state
        .cache
        .check_rate_limit(&key, limit, window_seconds)
        .await;

    if !decision.allowed {
        tracing::warn!(ip = %ip, category = %category, "Rate limit exceeded");
        return Err(ApiError::ResourceExhausted(format!(
            "Too many requests, retry in {} seconds",
            decision.reset_in_seconds
        )));
    }
    Ok(())
}

/// Global IP rate limit applied to the whole API router.
pub async fn rate_limit_global(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    check(
        &state,
        &request,
        addr,
        "global",
        GLOBAL_LIMIT,
        GLOBAL_WINDOW_SECONDS,
    )
    .await?;
    Ok(next.run(request).await)
}

/// Tight limit for login attempts.
pub async fn rate_limit_login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    check(
        &state,
        &request,
        addr,
        "login",
        LOGIN_LIMIT,
        LOGIN_WINDOW_SECONDS,
    )
    .await?;
    Ok(next.run(request).await)
}

/// Tight limit for account/guest creation.
pub async fn rate_limit_register(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    check(
        &state,
        &request,
        addr,
        "register",
        REGISTER_LIMIT,
        REGISTER_WINDOW_SECONDS,
    )
    .await?;
    Ok(next.run(request).await)
}

#[cfg(test)]
mod probe {
    use super::*;
    use axum::middleware::from_fn_with_state;
    use axum::Router;

    fn _probe(state: AppState) -> Router<AppState> {
        Router::new().layer(from_fn_with_state(state, rate_limit_global))
    }
}
