//! Session token management
//!
//! Signs, verifies, and refreshes the self-contained session tokens carrying
//! user identity and role claims. Tokens are HS256-signed with a symmetric
//! secret; the wire format is URL-safe and fits in headers and cookies.
//!
//! Invalid or expired tokens are an expected, frequent condition, so
//! verification returns `None` rather than an error - callers branch on the
//! sentinel instead of unwinding.

use crate::models::{SessionClaims, User};
use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};

/// Token lifetime: 7 days
const TOKEN_LIFETIME_SECS: i64 = 7 * 24 * 60 * 60;

/// Refresh threshold: tokens with more than a day of validity left are
/// returned unchanged instead of being re-signed
const REFRESH_THRESHOLD_SECS: i64 = 24 * 60 * 60;

/// Session token manager
pub struct TokenManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager").finish_non_exhaustive()
    }
}

impl TokenManager {
    /// Create a token manager from the signing secret.
    ///
    /// The secret's length floor is enforced at startup by
    /// [`crate::config::Secrets`].
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::default();
        // Expiry is enforced by hand below so the boundary is strict; the
        // library check stays on with zero leeway as a second fence.
        validation.leeway = 0;

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Mint a signed token for the user with a fresh 7-day expiry.
    pub fn create_token(&self, user: &User) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = SessionClaims::for_user(user, now, now + TOKEN_LIFETIME_SECS);
        self.sign(&claims)
    }

    /// Verify a token's signature and expiry.
    ///
    /// Returns `None` for any failure: malformed token, bad signature, or
    /// expired claims. A token expiring exactly now is already expired.
    pub fn verify_token(&self, token: &str) -> Option<SessionClaims> {
        let data = decode::<SessionClaims>(token, &self.decoding_key, &self.validation).ok()?;

        let now = Utc::now().timestamp();
        if data.claims.is_expired_at(now) {
            return None;
        }

        Some(data.claims)
    }

    /// Refresh a token.
    ///
    /// Returns `Ok(None)` if the token is invalid. A valid token with more
    /// than a day of validity left is returned unchanged; otherwise a new
    /// token with the same identity claims and a fresh 7-day expiry is
    /// minted.
    pub fn refresh_token(&self, token: &str) -> Result<Option<String>> {
        let Some(claims) = self.verify_token(token) else {
            return Ok(None);
        };

        let now = Utc::now().timestamp();
        if claims.remaining_at(now) > REFRESH_THRESHOLD_SECS {
            return Ok(Some(token.to_string()));
        }

        let renewed = SessionClaims {
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
            ..claims
        };
        self.sign(&renewed).map(Some)
    }

    fn sign(&self, claims: &SessionClaims) -> Result<String> {
        encode(&Header::default(), claims, &self.encoding_key)
            .context("failed to sign session token")
    }
}
