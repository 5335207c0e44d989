//! Data models
//!
//! This module contains the data structures shared across the storegate core:
//! - User identity as read from the external identity store
//! - Session claims embedded in signed tokens
//! - Rate limit decisions returned by admission control

mod claims;
mod user;

pub use claims::SessionClaims;
pub use user::{User, UserRole};
