//! CSRF protection
//!
//! Issues anti-forgery token pairs and validates them. The client-visible
//! half is a random token embedded in forms or headers; the server-set half
//! is an HMAC of that token, stored in a cookie the browser echoes back but
//! scripts cannot usefully read. A request is genuine when the HMAC of the
//! presented token matches the cookie hash.
//!
//! Hashes are compared in constant time: this guards against timing
//! side-channels, not just mismatches.

use crate::services::secure::{random_bytes, timing_safe_eq};
use anyhow::Result;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Raw token entropy in bytes
const CSRF_TOKEN_LEN: usize = 32;

/// Cookie carrying the server-side hash
pub const CSRF_COOKIE: &str = "csrf-token";

/// Hash cookie lifetime: 24 hours
const CSRF_COOKIE_MAX_AGE_SECS: i64 = 24 * 60 * 60;

/// CSRF guard keyed by the server secret
pub struct CsrfGuard {
    secret: Vec<u8>,
    production: bool,
}

impl std::fmt::Debug for CsrfGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsrfGuard")
            .field("production", &self.production)
            .finish_non_exhaustive()
    }
}

impl CsrfGuard {
    /// Create a guard from the CSRF secret.
    ///
    /// The secret's length floor is enforced at startup by
    /// [`crate::config::Secrets`]. `production` controls the `Secure` cookie
    /// attribute.
    pub fn new(secret: &str, production: bool) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            production,
        }
    }

    /// Generate a fresh client-visible token (32 random bytes, hex-encoded).
    pub fn generate_token(&self) -> Result<String> {
        let mut bytes = [0u8; CSRF_TOKEN_LEN];
        random_bytes(&mut bytes)?;
        Ok(hex::encode(bytes))
    }

    /// Compute the server-side hash for a token (HMAC-SHA256, hex-encoded).
    pub fn create_hash(&self, token: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC can take a key of any size");
        mac.update(token.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Validate a presented token against the stored hash.
    ///
    /// Recomputes the HMAC and compares in constant time.
    pub fn validate_token(&self, token: &str, hash: &str) -> bool {
        timing_safe_eq(self.create_hash(token).as_bytes(), hash.as_bytes())
    }

    /// Build the `Set-Cookie` value carrying the hash half of a pair.
    ///
    /// HttpOnly + SameSite=Strict always; Secure in production. The raw token
    /// is never placed in a cookie - the two halves must not travel together
    /// in client-readable storage.
    pub fn hash_cookie(&self, hash: &str) -> String {
        format!(
            "{}={}; Max-Age={}; Path=/; HttpOnly; SameSite=Strict{}",
            CSRF_COOKIE,
            hash,
            CSRF_COOKIE_MAX_AGE_SECS,
            if self.production { "; Secure" } else { "" }
        )
    }

    /// Build the `Set-Cookie` value that clears the hash cookie.
    pub fn clear_cookie(&self) -> String {
        format!(
            "{}=; Max-Age=0; Path=/; HttpOnly; SameSite=Strict{}",
            CSRF_COOKIE,
            if self.production { "; Secure" } else { "" }
        )
    }
}
