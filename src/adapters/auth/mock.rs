//! Mock token verifier for testing.
//!
//! Implements the `TokenVerifier` port without a real auth service.
//!
//! # Example
//!
//! ```ignore
//! use pos_realtime::adapters::auth::MockTokenVerifier;
//!
//! let verifier = MockTokenVerifier::new()
//!     .with_staff("staff-token", "u1", "t1", "o1")
//!     .with_delay(Duration::from_millis(50));
//!
//! let identity = verifier.verify("staff-token").await?;
//! ```

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::foundation::{AuthError, Identity, OutletId, Role, TenantId, UserId};
use crate::ports::TokenVerifier;

/// Mock token verifier.
///
/// Stores a map of tokens to identities. Tokens not in the map return
/// `InvalidToken`.
#[derive(Debug, Default)]
pub struct MockTokenVerifier {
    tokens: RwLock<HashMap<String, Identity>>,
    force_error: RwLock<Option<AuthError>>,
    /// Artificial latency, used to exercise the authentication timeout.
    delay: Option<Duration>,
}

impl MockTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a valid token that maps to an identity.
    pub fn with_identity(self, token: impl Into<String>, identity: Identity) -> Self {
        self.add_token(token, identity);
        self
    }

    /// Adds a token for a plain staff member.
    ///
    /// Blank ids are ignored and no token is registered.
    pub fn with_staff(self, token: impl Into<String>, user: &str, tenant: &str, outlet: &str) -> Self {
        match test_identity(user, tenant, outlet, Role::Staff) {
            Some(identity) => self.with_identity(token, identity),
            None => self,
        }
    }

    /// Adds a token for an administrator.
    pub fn with_admin(self, token: impl Into<String>, user: &str, tenant: &str, outlet: &str) -> Self {
        match test_identity(user, tenant, outlet, Role::Admin) {
            Some(identity) => self.with_identity(token, identity),
            None => self,
        }
    }

    /// Forces all verifications to return the specified error.
    pub fn with_error(self, error: AuthError) -> Self {
        *self.force_error.write().unwrap_or_else(PoisonError::into_inner) = Some(error);
        self
    }

    /// Delays every verification by `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Clears the forced error and returns to normal operation.
    pub fn clear_error(&self) {
        *self.force_error.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Registers a new valid token at runtime.
    pub fn add_token(&self, token: impl Into<String>, identity: Identity) {
        self.tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token.into(), identity);
    }

    /// Removes a token, making it invalid.
    pub fn remove_token(&self, token: &str) {
        self.tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(token);
    }
}

fn test_identity(user: &str, tenant: &str, outlet: &str, role: Role) -> Option<Identity> {
    Some(Identity::new(
        UserId::new(user).ok()?,
        TenantId::new(tenant).ok()?,
        OutletId::new(outlet).ok()?,
        role,
    ))
}

#[async_trait]
impl TokenVerifier for MockTokenVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self
            .force_error
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Err(error);
        }

        if token.trim().is_empty() {
            return Err(AuthError::MissingToken);
        }

        self.tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(token)
            .cloned()
            .ok_or(AuthError::InvalidToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_identity_for_known_token() {
        let verifier = MockTokenVerifier::new().with_staff("tok", "u1", "t1", "o1");
        let identity = verifier.verify("tok").await.unwrap();
        assert_eq!(identity.user_id.as_str(), "u1");
        assert_eq!(identity.role, Role::Staff);
    }

    #[tokio::test]
    async fn unknown_token_is_invalid() {
        let verifier = MockTokenVerifier::new();
        assert_eq!(verifier.verify("nope").await, Err(AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn empty_token_is_missing() {
        let verifier = MockTokenVerifier::new();
        assert_eq!(verifier.verify("").await, Err(AuthError::MissingToken));
    }

    #[tokio::test]
    async fn forced_error_wins_until_cleared() {
        let verifier = MockTokenVerifier::new()
            .with_admin("tok", "u1", "t1", "o1")
            .with_error(AuthError::Revoked);
        assert_eq!(verifier.verify("tok").await, Err(AuthError::Revoked));

        verifier.clear_error();
        assert!(verifier.verify("tok").await.unwrap().is_admin());
    }

    #[tokio::test]
    async fn removed_token_stops_working() {
        let verifier = MockTokenVerifier::new().with_staff("tok", "u1", "t1", "o1");
        verifier.remove_token("tok");
        assert_eq!(verifier.verify("tok").await, Err(AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn delay_is_applied() {
        let verifier = MockTokenVerifier::new()
            .with_staff("tok", "u1", "t1", "o1")
            .with_delay(Duration::from_millis(50));
        let started = tokio::time::Instant::now();
        verifier.verify("tok").await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn blank_ids_register_nothing() {
        let verifier = MockTokenVerifier::new().with_staff("tok", "", "t1", "o1");
        assert_eq!(verifier.verify("tok").await, Err(AuthError::InvalidToken));
    }
}
