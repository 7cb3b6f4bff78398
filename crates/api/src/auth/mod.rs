//! Authentication boundary
//!
//! Verifies platform-issued access tokens; the support core only sees the
//! resulting user id and role.

pub mod jwt;
pub mod middleware;

pub use jwt::{Claims, JwtError, JwtManager};
pub use middleware::{require_auth, AuthUser};
