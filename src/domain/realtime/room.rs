//! Room names: the grouping key for broadcast delivery.
//!
//! A room is written `<namespace>:<scopeId>` on the wire, e.g. `outlet:o1`.
//! Only the first `:` separates; the scope id is the rest of the string, so
//! identity-provider ids such as `google:42` form valid rooms.
//! Rooms are never persisted; they exist only as keys inside each instance's
//! registry and as topic suffixes on the backplane.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::foundation::{Identity, OutletId, TenantId, UserId};

/// Scope category of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RoomNamespace {
    Tenant,
    Outlet,
    User,
    Kitchen,
}

impl RoomNamespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomNamespace::Tenant => "tenant",
            RoomNamespace::Outlet => "outlet",
            RoomNamespace::User => "user",
            RoomNamespace::Kitchen => "kitchen",
        }
    }

    /// All namespaces, in the order default rooms are listed.
    pub fn all() -> [RoomNamespace; 4] {
        [
            RoomNamespace::Tenant,
            RoomNamespace::Outlet,
            RoomNamespace::User,
            RoomNamespace::Kitchen,
        ]
    }
}

impl fmt::Display for RoomNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoomNamespace {
    type Err = RoomParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tenant" => Ok(RoomNamespace::Tenant),
            "outlet" => Ok(RoomNamespace::Outlet),
            "user" => Ok(RoomNamespace::User),
            "kitchen" => Ok(RoomNamespace::Kitchen),
            other => Err(RoomParseError::UnknownNamespace(other.to_string())),
        }
    }
}

/// Errors produced when a client-supplied room string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomParseError {
    #[error("Room name must have the form <namespace>:<scopeId>")]
    Malformed,

    #[error("Unknown room namespace: {0}")]
    UnknownNamespace(String),

    #[error("Room scope id cannot be empty")]
    EmptyScope,
}

/// A structured room name.
///
/// Ordering is namespace first, then scope id, so room sets iterate in a
/// stable order (tenant, outlet, user, kitchen).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomName {
    namespace: RoomNamespace,
    scope_id: String,
}

impl RoomName {
    /// Creates a room from its parts, rejecting a blank scope.
    pub fn new(namespace: RoomNamespace, scope_id: impl Into<String>) -> Result<Self, RoomParseError> {
        let scope_id = scope_id.into();
        if scope_id.trim().is_empty() {
            return Err(RoomParseError::EmptyScope);
        }
        Ok(Self {
            namespace,
            scope_id,
        })
    }

    pub fn tenant(id: &TenantId) -> Self {
        Self::from_trusted(RoomNamespace::Tenant, id.as_str())
    }

    pub fn outlet(id: &OutletId) -> Self {
        Self::from_trusted(RoomNamespace::Outlet, id.as_str())
    }

    pub fn user(id: &UserId) -> Self {
        Self::from_trusted(RoomNamespace::User, id.as_str())
    }

    pub fn kitchen(id: &OutletId) -> Self {
        Self::from_trusted(RoomNamespace::Kitchen, id.as_str())
    }

    // Identifier types already reject blank values.
    fn from_trusted(namespace: RoomNamespace, scope_id: &str) -> Self {
        Self {
            namespace,
            scope_id: scope_id.to_string(),
        }
    }

    pub fn namespace(&self) -> RoomNamespace {
        self.namespace
    }

    pub fn scope_id(&self) -> &str {
        &self.scope_id
    }

    /// The three rooms every authenticated connection belongs to.
    ///
    /// Returned as `[tenant, outlet, user]`.
    pub fn defaults_for(identity: &Identity) -> [RoomName; 3] {
        [
            RoomName::tenant(&identity.tenant_id),
            RoomName::outlet(&identity.outlet_id),
            RoomName::user(&identity.user_id),
        ]
    }

    /// True if this room is one of the identity's non-leavable default rooms.
    pub fn is_default_for(&self, identity: &Identity) -> bool {
        match self.namespace {
            RoomNamespace::Tenant => identity.tenant_id == *self.scope_id.as_str(),
            RoomNamespace::Outlet => identity.outlet_id == *self.scope_id.as_str(),
            RoomNamespace::User => identity.user_id == *self.scope_id.as_str(),
            RoomNamespace::Kitchen => false,
        }
    }
}

impl fmt::Display for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.scope_id)
    }
}

impl FromStr for RoomName {
    type Err = RoomParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, scope_id) = s.split_once(':').ok_or(RoomParseError::Malformed)?;
        RoomName::new(namespace.parse()?, scope_id)
    }
}

impl TryFrom<String> for RoomName {
    type Error = RoomParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RoomName> for String {
    fn from(room: RoomName) -> Self {
        room.to_string()
    }
}
