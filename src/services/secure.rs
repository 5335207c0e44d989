//! Security primitives
//!
//! Provides the low-level building blocks the rest of the core depends on:
//! secure random identifiers, password hashing and verification, and
//! timing-safe comparison.
//!
//! # Security
//!
//! - Passwords are hashed with PBKDF2-HMAC-SHA512 (100,000 iterations,
//!   64-byte derived key) and a random 16-byte salt per password
//! - All secret comparisons go through [`timing_safe_eq`], which does not
//!   short-circuit on the first mismatching byte

use anyhow::Result;
use pbkdf2::pbkdf2_hmac;
use sha2::Sha512;
use subtle::ConstantTimeEq;

/// PBKDF2 iteration count
const PBKDF2_ITERATIONS: u32 = 100_000;

/// Derived key length in bytes
const DERIVED_KEY_LEN: usize = 64;

/// Salt length in bytes
const SALT_LEN: usize = 16;

/// Entropy for generated ids in bytes
const SECURE_ID_LEN: usize = 16;

/// Entropy for API keys in bytes
const API_KEY_LEN: usize = 32;

/// Prefix for machine-to-machine API keys
const API_KEY_PREFIX: &str = "sk_";

/// Fill a buffer with OS-provided entropy.
pub(crate) fn random_bytes(buf: &mut [u8]) -> Result<()> {
    getrandom::fill(buf).map_err(|e| anyhow::anyhow!("failed to gather entropy: {}", e))
}

/// Generate a cryptographically random identifier (16 bytes, hex-encoded).
pub fn generate_secure_id() -> Result<String> {
    let mut bytes = [0u8; SECURE_ID_LEN];
    random_bytes(&mut bytes)?;
    Ok(hex::encode(bytes))
}

/// Generate a prefixed random token for machine-to-machine authentication.
pub fn create_api_key() -> Result<String> {
    let mut bytes = [0u8; API_KEY_LEN];
    random_bytes(&mut bytes)?;
    Ok(format!("{}{}", API_KEY_PREFIX, hex::encode(bytes)))
}

/// Compare two byte slices in constant time.
///
/// Slices of different lengths compare unequal immediately; equal-length
/// slices are compared without short-circuiting, so response time does not
/// reveal where the first difference sits.
pub fn timing_safe_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Hash a password with PBKDF2-HMAC-SHA512 and a fresh random salt.
///
/// # Returns
///
/// `salt:key` with both halves hex-encoded. The salt is generated per
/// password, so hashing the same password twice yields different results.
pub fn hash_password(password: &str) -> Result<String> {
    let mut salt = [0u8; SALT_LEN];
    random_bytes(&mut salt)?;

    let mut key = [0u8; DERIVED_KEY_LEN];
    pbkdf2_hmac::<Sha512>(password.as_bytes(), &salt, PBKDF2_ITERATIONS, &mut key);

    Ok(format!("{}:{}", hex::encode(salt), hex::encode(key)))
}

/// Verify a password against a stored `salt:key` hash.
///
/// The freshly derived key is compared to the stored one in constant time.
/// A malformed stored hash verifies as `false` rather than erroring: from the
/// caller's point of view it is simply not the right password.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let Some((salt_hex, key_hex)) = stored.split_once(':') else {
        return false;
    };
    let Ok(salt) = hex::decode(salt_hex) else {
        return false;
    };
    let Ok(expected) = hex::decode(key_hex) else {
        return false;
    };
    if expected.len() != DERIVED_KEY_LEN {
        return false;
    }

    let mut key = [0u8; DERIVED_KEY_LEN];
    pbkdf2_hmac::<Sha512>(password.as_bytes(), &salt, PBKDF2_ITERATIONS, &mut key);

    timing_safe_eq(&key, &expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_secure_id_format() {
        let id = generate_secure_id().unwrap();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generate_secure_id_unique() {
        let a = generate_secure_id().unwrap();
        let b = generate_secure_id().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_create_api_key_prefixed() {
        let key = create_api_key().unwrap();
        assert!(key.starts_with("sk_"));
        assert_eq!(key.len(), 3 + 64);
    }

    #[test]
    fn test_hash_password_salted() {
        let h1 = hash_password("same_password").unwrap();
        let h2 = hash_password("same_password").unwrap();
        assert_ne!(h1, h2, "per-password salt must differ");
    }

    #[test]
    fn test_verify_password_correct() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(verify_password("correct horse battery staple", &hash));
    }

    #[test]
    fn test_verify_password_incorrect() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(!verify_password("incorrect horse", &hash));
    }

    #[test]
    fn test_verify_password_malformed_hash() {
        assert!(!verify_password("password", "not-a-hash"));
        assert!(!verify_password("password", "deadbeef:nothex"));
        assert!(!verify_password("password", "deadbeef:ab"));
    }

    #[test]
    fn test_verify_password_empty() {
        let hash = hash_password("").unwrap();
        assert!(verify_password("", &hash));
        assert!(!verify_password("x", &hash));
    }

    #[test]
    fn test_timing_safe_eq_basic() {
        assert!(timing_safe_eq(b"abc", b"abc"));
        assert!(!timing_safe_eq(b"abc", b"abd"));
        assert!(!timing_safe_eq(b"abc", b"abcd"));
        assert!(timing_safe_eq(b"", b""));
    }

    #[test]
    fn test_hash_does_not_contain_password() {
        let hash = hash_password("my_secret_password").unwrap();
        assert!(!hash.contains("my_secret_password"));
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(20))]

        #[test]
        fn property_timing_safe_eq_matches_equality(
            a in prop::collection::vec(any::<u8>(), 0..64),
            b in prop::collection::vec(any::<u8>(), 0..64),
        ) {
            prop_assert_eq!(timing_safe_eq(&a, &b), a == b);
        }

        #[test]
        fn property_timing_safe_eq_reflexive(a in prop::collection::vec(any::<u8>(), 0..64)) {
            prop_assert!(timing_safe_eq(&a, &a));
        }

        #[test]
        fn property_password_round_trip(password in "[ -~]{0,40}") {
            let hash = hash_password(&password).unwrap();
            prop_assert!(verify_password(&password, &hash));
        }
    }
}
