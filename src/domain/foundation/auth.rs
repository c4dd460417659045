//! Authentication types for the domain layer.
//!
//! An `Identity` is what the external auth service vouches for in a signed
//! token. This crate never issues tokens; it only decodes a verified one
//! (via the `TokenVerifier` port) and trusts its claims for the lifetime of
//! the connection.
//!
//! # Design Decisions
//!
//! - `Identity` is immutable once attached to a connection; a fresh token
//!   on reconnect is the only way to change it
//! - `AuthError` is domain-centric, not provider-specific
//! - Only `Role::Admin` carries privilege; every other role is scoped by ids

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{OutletId, TenantId, UserId};

/// Role claim carried by the identity token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    Manager,
    Cashier,
    Waiter,
    Kitchen,
    Staff,
    /// A role this service does not know about. Treated as unprivileged.
    Other(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Cashier => "cashier",
            Role::Waiter => "waiter",
            Role::Kitchen => "kitchen",
            Role::Staff => "staff",
            Role::Other(other) => other.as_str(),
        }
    }
}

impl Role {
    /// Parses a role claim. Unknown values are kept as `Role::Other`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Role::Admin,
            "manager" => Role::Manager,
            "cashier" => Role::Cashier,
            "waiter" => Role::Waiter,
            "kitchen" => Role::Kitchen,
            "staff" => Role::Staff,
            _ => Role::Other(s.trim().to_string()),
        }
    }
}

impl FromStr for Role {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Role::parse(s))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Role {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Role::parse(&raw))
    }
}

/// Authenticated principal attached to a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub outlet_id: OutletId,
    pub role: Role,
    #[serde(default)]
    pub permissions: BTreeSet<String>,
}

impl Identity {
    /// Creates a new identity with no extra permissions.
    pub fn new(user_id: UserId, tenant_id: TenantId, outlet_id: OutletId, role: Role) -> Self {
        Self {
            user_id,
            tenant_id,
            outlet_id,
            role,
            permissions: BTreeSet::new(),
        }
    }

    /// Adds permissions from the token's permission set.
    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions
            .extend(permissions.into_iter().map(Into::into));
        self
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }
}

/// Authentication errors that can occur during token verification.
///
/// All variants are fatal to the connection: the client is notified with
/// [`AuthError::client_message`] and the socket is closed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No bearer token was presented in the handshake.
    #[error("Missing bearer token")]
    MissingToken,

    /// The token is malformed or has an invalid signature.
    #[error("Invalid token")]
    InvalidToken,

    /// The token signature is valid but it has expired.
    #[error("Token expired")]
    TokenExpired,

    /// The signing key or session behind the token was revoked.
    #[error("Token revoked")]
    Revoked,

    /// Verification did not complete within the authentication window.
    #[error("Authentication timed out")]
    Timeout,

    /// The verification service is unavailable (network, config, etc.).
    #[error("Auth service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl AuthError {
    /// Creates a service unavailable error with a message.
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable(message.into())
    }

    /// Stable message sent to the client before the connection is closed.
    ///
    /// Infrastructure detail stays in the server log.
    pub fn client_message(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "unauthorized: missing token",
            AuthError::InvalidToken | AuthError::Revoked => "unauthorized: invalid token",
            AuthError::TokenExpired => "unauthorized: token expired",
            AuthError::Timeout => "unauthorized: authentication timed out",
            AuthError::ServiceUnavailable(_) => "unauthorized: authentication unavailable",
        }
    }

    /// Returns true if this is a transient error that may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthError::ServiceUnavailable(_) | AuthError::Timeout)
    }
}
