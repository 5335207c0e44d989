//! Authentication API endpoints
//!
//! Handles the HTTP surface of the security core:
//! - GET  /api/v1/auth/csrf    - Issue a CSRF token pair
//! - GET  /api/v1/auth/session - Inspect the current session
//! - POST /api/v1/auth/refresh - Refresh the session token
//! - POST /api/v1/auth/logout  - Clear session and CSRF cookies
//! - GET  /api/v1/auth/limit   - Read-only rate limit status
//!
//! Login and registration live with the external identity store; minting a
//! session from a verified [`crate::models::User`] is a library call
//! (`SessionManager::create_session`), not an endpoint here.

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::api::middleware::{client_identifier, ApiError, AppState, AuthenticatedClaims};
use crate::limiter::RateLimitDecision;
use crate::models::SessionClaims;

/// Response carrying a freshly issued CSRF token
#[derive(Debug, Serialize)]
pub struct CsrfResponse {
    /// Raw token for the client to echo in `x-csrf-token`
    #[serde(rename = "csrfToken")]
    pub csrf_token: String,
}

/// Response describing the current session
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session: SessionClaims,
}

/// Response carrying a (possibly re-minted) session token
#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub token: String,
}

/// Issue a CSRF token pair.
///
/// The raw token goes to the caller in the body; the HMAC hash goes into the
/// `csrf-token` cookie. The two halves never travel together in
/// client-readable storage.
pub async fn issue_csrf(State(state): State<AppState>) -> Result<Response, ApiError> {
    let token = state
        .csrf
        .generate_token()
        .map_err(|e| ApiError::internal_error(format!("CSRF issuance failed: {e}")))?;
    let hash = state.csrf.create_hash(&token);

    let mut response = Json(CsrfResponse { csrf_token: token }).into_response();
    append_cookie(&mut response, &state.csrf.hash_cookie(&hash))?;
    Ok(response)
}

/// Inspect the current session (behind `require_auth`).
pub async fn session_info(request: Request) -> Result<Json<SessionResponse>, ApiError> {
    let claims = request
        .extensions()
        .get::<AuthenticatedClaims>()
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    Ok(Json(SessionResponse {
        session: claims.0.clone(),
    }))
}

/// Refresh the session token.
///
/// Near-expiry tokens are re-minted and the new token re-attached as the
/// session cookie; fresh tokens come back unchanged.
pub async fn refresh_session(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, ApiError> {
    let token = crate::services::session::extract_session_token(request.headers())
        .ok_or_else(|| ApiError::unauthorized("Missing authentication token"))?;

    let refreshed = state
        .sessions
        .tokens()
        .refresh_token(&token)
        .map_err(|e| ApiError::internal_error(format!("Token refresh failed: {e}")))?
        .ok_or_else(|| ApiError::unauthorized("Invalid or expired session"))?;

    let reminted = refreshed != token;
    let mut response = Json(RefreshResponse {
        token: refreshed.clone(),
    })
    .into_response();

    if reminted {
        append_cookie(&mut response, &state.sessions.session_cookie(&refreshed))?;
    }
    Ok(response)
}

/// Log out: clear the session and CSRF cookies.
///
/// There is no server-side revocation; a token that has already leaked stays
/// valid until its natural expiry.
pub async fn logout(State(state): State<AppState>) -> Result<Response, ApiError> {
    let mut response = axum::http::StatusCode::NO_CONTENT.into_response();
    append_cookie(&mut response, &state.sessions.clear_session_cookie())?;
    append_cookie(&mut response, &state.csrf.clear_cookie())?;
    Ok(response)
}

/// Read-only rate limit status for the caller's identifier.
///
/// Does not consume a window slot, so clients can poll their standing
/// without penalizing themselves.
pub async fn limit_status(
    State(state): State<AppState>,
    request: Request,
) -> Json<RateLimitDecision> {
    let identifier = client_identifier(request.headers());
    let decision = state
        .limiter
        .status(
            &identifier,
            state.rate_limit.max_requests,
            state.rate_limit.window_ms,
        )
        .await;

    Json(decision)
}

fn append_cookie(response: &mut Response, cookie: &str) -> Result<(), ApiError> {
    let value = HeaderValue::from_str(cookie)
        .map_err(|e| ApiError::internal_error(format!("Invalid cookie value: {e}")))?;
    response.headers_mut().append(header::SET_COOKIE, value);
    Ok(())
}
