//! API middleware
//!
//! Contains middleware for:
//! - Admission control (rate limit gate, first in the chain)
//! - Authentication (session token validation)
//! - Authorization (admin role checking)
//! - CSRF validation for mutating requests

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::RateLimitConfig;
use crate::limiter::{RateLimitDecision, RateLimiter};
use crate::models::SessionClaims;
use crate::services::csrf::{CsrfGuard, CSRF_COOKIE};
use crate::services::session::{SessionError, SessionManager};

/// Application state containing the security core
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub csrf: Arc<CsrfGuard>,
    pub limiter: Arc<RateLimiter>,
    pub rate_limit: RateLimitConfig,
}

/// Authenticated session claims extracted from the request
#[derive(Debug, Clone)]
pub struct AuthenticatedClaims(pub SessionClaims);

/// Error response for API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("FORBIDDEN", message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new("RATE_LIMITED", message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.error.code.as_str() {
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "FORBIDDEN" => StatusCode::FORBIDDEN,
            "RATE_LIMITED" => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(self)).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Unauthenticated => ApiError::unauthorized(err.to_string()),
            SessionError::Forbidden => ApiError::forbidden(err.to_string()),
        }
    }
}

/// Derive the rate-limit identifier for a request.
///
/// Uses the first `x-forwarded-for` hop, then `x-real-ip`; requests with
/// neither share the `unknown` bucket.
pub fn client_identifier(headers: &HeaderMap) -> String {
    let ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .unwrap_or("unknown");

    format!("ip:{ip}")
}

/// Extract a cookie value from request headers.
fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
    for cookie in cookie_header.split(';') {
        let cookie = cookie.trim();
        if let Some(value) = cookie.strip_prefix(name) {
            if let Some(value) = value.strip_prefix('=') {
                return Some(value.to_string());
            }
        }
    }
    None
}

fn apply_rate_limit_headers(headers: &mut HeaderMap, limit: u32, decision: &RateLimitDecision) {
    let reset_secs = decision.reset_time / 1000;
    headers.insert("x-ratelimit-limit", int_header(limit as i64));
    headers.insert("x-ratelimit-remaining", int_header(decision.remaining as i64));
    headers.insert("x-ratelimit-reset", int_header(reset_secs));
}

fn int_header(value: i64) -> HeaderValue {
    HeaderValue::from_str(&value.to_string()).expect("integer is a valid header value")
}

/// Admission control middleware
///
/// Gates every request through the rate limiter. Denied callers receive a
/// 429 with `Retry-After` guidance; nothing in either response reveals which
/// backend made the decision.
pub async fn admission(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let identifier = client_identifier(request.headers());
    let decision = state
        .limiter
        .check(
            &identifier,
            state.rate_limit.max_requests,
            state.rate_limit.window_ms,
        )
        .await;

    if !decision.allowed {
        let retry_after_secs =
            ((decision.reset_time - Utc::now().timestamp_millis()).max(0) + 999) / 1000;

        let mut response =
            ApiError::rate_limited("Rate limit exceeded. Please try again later.").into_response();
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, int_header(retry_after_secs));
        apply_rate_limit_headers(
            response.headers_mut(),
            state.rate_limit.max_requests,
            &decision,
        );
        return response;
    }

    let mut response = next.run(request).await;
    apply_rate_limit_headers(
        response.headers_mut(),
        state.rate_limit.max_requests,
        &decision,
    );
    response
}

/// Authentication middleware
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims = state.sessions.require_auth(request.headers())?;
    request.extensions_mut().insert(AuthenticatedClaims(claims));
    Ok(next.run(request).await)
}

/// Admin authorization middleware (expects `require_auth` upstream)
pub async fn require_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    let claims = request
        .extensions()
        .get::<AuthenticatedClaims>()
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    if !claims.0.is_admin {
        return Err(ApiError::forbidden("Admin privileges required"));
    }

    Ok(next.run(request).await)
}

/// CSRF validation middleware for mutating requests
///
/// The raw token arrives in the `x-csrf-token` header (or form field,
/// handled by the caller); the hash arrives in the cookie set at issuance.
/// Non-mutating methods pass through untouched.
pub async fn require_csrf(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let mutating = matches!(
        request.method().as_str(),
        "POST" | "PUT" | "PATCH" | "DELETE"
    );
    if !mutating {
        return Ok(next.run(request).await);
    }

    let token = request
        .headers()
        .get("x-csrf-token")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::forbidden("Missing CSRF token"))?;

    let hash = extract_cookie(request.headers(), CSRF_COOKIE)
        .ok_or_else(|| ApiError::forbidden("Missing CSRF cookie"))?;

    if !state.csrf.validate_token(token, &hash) {
        return Err(ApiError::forbidden("Invalid CSRF token"));
    }

    Ok(next.run(request).await)
}
