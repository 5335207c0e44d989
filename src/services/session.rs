//! Session management
//!
//! Thin orchestration over [`TokenManager`]: extracts session state from
//! inbound requests, attaches it to outbound responses, and enforces the
//! admin/user role split. The token may arrive in an `Authorization: Bearer`
//! header or the `session` cookie; the header takes precedence.

use crate::models::{SessionClaims, User};
use crate::services::token::TokenManager;
use anyhow::Result;
use axum::http::{header, HeaderMap};

/// Cookie carrying the session token
pub const SESSION_COOKIE: &str = "session";

/// Session cookie lifetime: 7 days, matching the token lifetime
const SESSION_COOKIE_MAX_AGE_SECS: i64 = 7 * 24 * 60 * 60;

/// Error raised when a request lacks a valid session or sufficient role
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No valid session present
    #[error("authentication required")]
    Unauthenticated,

    /// Valid session, insufficient privileges
    #[error("admin privileges required")]
    Forbidden,
}

/// A freshly minted session: the signed token plus its claims
#[derive(Debug, Clone)]
pub struct SessionHandle {
    /// Signed session token
    pub token: String,
    /// Claims embedded in the token
    pub claims: SessionClaims,
}

/// Session manager orchestrating token lifecycle per request
#[derive(Debug)]
pub struct SessionManager {
    tokens: TokenManager,
    production: bool,
}

impl SessionManager {
    /// Create a session manager.
    ///
    /// `production` controls the `Secure` attribute on session cookies.
    pub fn new(tokens: TokenManager, production: bool) -> Self {
        Self { tokens, production }
    }

    /// Access the underlying token manager.
    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    /// Mint a session for a user.
    pub fn create_session(&self, user: &User) -> Result<SessionHandle> {
        let token = self.tokens.create_token(user)?;
        let claims = self
            .tokens
            .verify_token(&token)
            .ok_or_else(|| anyhow::anyhow!("freshly minted token failed verification"))?;
        Ok(SessionHandle { token, claims })
    }

    /// Extract and verify the session from request headers.
    ///
    /// Returns `None` when no token is present or the token is invalid -
    /// both are expected conditions, not errors.
    pub fn get_session(&self, headers: &HeaderMap) -> Option<SessionClaims> {
        let token = extract_session_token(headers)?;
        self.tokens.verify_token(&token)
    }

    /// Require a valid session.
    pub fn require_auth(&self, headers: &HeaderMap) -> Result<SessionClaims, SessionError> {
        self.get_session(headers).ok_or(SessionError::Unauthenticated)
    }

    /// Require a valid session with the admin role.
    pub fn require_admin(&self, headers: &HeaderMap) -> Result<SessionClaims, SessionError> {
        let claims = self.require_auth(headers)?;
        if !claims.is_admin {
            return Err(SessionError::Forbidden);
        }
        Ok(claims)
    }

    /// Build the `Set-Cookie` value attaching a session token.
    pub fn session_cookie(&self, token: &str) -> String {
        format!(
            "{}={}; Max-Age={}; Path=/; HttpOnly; SameSite=Strict{}",
            SESSION_COOKIE,
            token,
            SESSION_COOKIE_MAX_AGE_SECS,
            if self.production { "; Secure" } else { "" }
        )
    }

    /// Build the `Set-Cookie` value that clears the session cookie.
    pub fn clear_session_cookie(&self) -> String {
        format!(
            "{}=; Max-Age=0; Path=/; HttpOnly; SameSite=Strict{}",
            SESSION_COOKIE,
            if self.production { "; Secure" } else { "" }
        )
    }
}

/// Extract the session token from request headers.
///
/// `Authorization: Bearer` takes precedence over the `session` cookie.
pub fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth_header) = headers.get(header::AUTHORIZATION) {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }

    if let Some(cookie_header) = headers.get(header::COOKIE) {
        if let Ok(cookie_str) = cookie_header.to_str() {
            for cookie in cookie_str.split(';') {
                let cookie = cookie.trim();
                if let Some(token) = cookie.strip_prefix("session=") {
                    return Some(token.to_string());
                }
            }
        }
    }

    None
}
