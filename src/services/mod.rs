//! Services layer - Security logic
//!
//! This module contains the security services of the storegate core:
//! - Cryptographic primitives (random ids, password hashing, API keys)
//! - Session token signing, verification, and refresh
//! - CSRF token issuance and validation
//! - Session extraction and role enforcement

pub mod csrf;
pub mod secure;
pub mod session;
pub mod token;

pub use csrf::CsrfGuard;
pub use secure::{
    create_api_key, generate_secure_id, hash_password, timing_safe_eq, verify_password,
};
pub use session::{SessionError, SessionHandle, SessionManager};
pub use token::TokenManager;
