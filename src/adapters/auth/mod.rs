//! Authentication adapters.
//!
//! Implementations of the `TokenVerifier` port:
//!
//! - `jwt` - Shared-secret JWT verification for tokens from the auth service
//! - `mock` - Test implementation that doesn't require external services

mod jwt;
mod mock;

pub use jwt::{IdentityClaims, JwtConfig, JwtTokenVerifier};
pub use mock::MockTokenVerifier;
