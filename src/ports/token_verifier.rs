//! Token verification port.
//!
//! This port defines the contract for turning a bearer token issued by the
//! external auth service into an [`Identity`]. It is consumed exactly once per
//! connection, while the connection is `Authenticating`.

use async_trait::async_trait;

use crate::domain::foundation::{AuthError, Identity};

/// Verifies identity tokens and extracts the connection identity.
///
/// # Contract
///
/// Implementations must:
/// - Validate the token signature
/// - Return `AuthError::InvalidToken` for malformed/bad signature tokens
/// - Return `AuthError::TokenExpired` for expired tokens
/// - Return `AuthError::Revoked` when the signing key or session was revoked
/// - Return `AuthError::ServiceUnavailable` for transient errors
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Verify a raw token (without the "Bearer " prefix).
    async fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}
