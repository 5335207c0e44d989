//! Session claims
//!
//! Claims embedded in a signed session token. They are immutable once signed;
//! changing any field requires minting a new token.

use crate::models::{User, UserRole};
use serde::{Deserialize, Serialize};

/// Claims carried by a session token.
///
/// Serialized camelCase so the wire format matches what storefront clients
/// already consume (`userId`, `isAdmin`, ...). `iat` and `exp` keep their
/// conventional short names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClaims {
    /// Subject user id
    pub user_id: String,
    /// Email at issuance time
    pub email: String,
    /// Role at issuance time
    pub role: UserRole,
    /// Derived from role; carried explicitly so clients need no role table
    pub is_admin: bool,
    /// Issued-at, Unix seconds
    pub iat: i64,
    /// Expiry, Unix seconds
    pub exp: i64,
}

impl SessionClaims {
    /// Build claims for a user with the given issue/expiry times.
    pub fn for_user(user: &User, iat: i64, exp: i64) -> Self {
        Self {
            user_id: user.id.clone(),
            email: user.email.clone(),
            role: user.role,
            is_admin: user.role == UserRole::Admin,
            iat,
            exp,
        }
    }

    /// Check if the claims are expired at the given instant.
    ///
    /// Expiry is strict: claims expiring exactly `now` are already expired.
    pub fn is_expired_at(&self, now: i64) -> bool {
        !(self.exp > now)
    }

    /// Seconds of validity remaining at the given instant (zero when expired).
    pub fn remaining_at(&self, now: i64) -> i64 {
        (self.exp - now).max(0)
    }
}
