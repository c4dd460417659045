//! Room authorization engine.
//!
//! A pure decision: may this identity join (and therefore receive events
//! for) this room? The whole rule set lives in [`decide`] so it can be
//! audited in one place:
//!
//! | namespace | allowed when                    |
//! |-----------|---------------------------------|
//! | (any)     | role is admin                   |
//! | tenant    | scope id == identity tenant id  |
//! | outlet    | scope id == identity outlet id  |
//! | user      | scope id == identity user id    |
//! | kitchen   | scope id == identity outlet id  |
//!
//! Denials are values, not errors. The caller reports them to the client
//! with [`ACCESS_DENIED_MESSAGE`] and nothing more; the recorded reason is
//! for server logs only.

use crate::domain::foundation::Identity;

use super::room::{RoomName, RoomNamespace};

/// The only message a client ever sees for a denied room.
pub const ACCESS_DENIED_MESSAGE: &str = "Access denied to room";

/// Result of a room authorization check, kept for audit logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessDecision {
    pub granted: bool,
    pub room: String,
    pub user_id: String,
    /// Why access was denied. Never sent to clients.
    pub reason: Option<&'static str>,
}

impl AccessDecision {
    fn granted(room: impl Into<String>, identity: &Identity) -> Self {
        Self {
            granted: true,
            room: room.into(),
            user_id: identity.user_id.to_string(),
            reason: None,
        }
    }

    fn denied(room: impl Into<String>, identity: &Identity, reason: &'static str) -> Self {
        Self {
            granted: false,
            room: room.into(),
            user_id: identity.user_id.to_string(),
            reason: Some(reason),
        }
    }

    pub fn is_granted(&self) -> bool {
        self.granted
    }
}

/// Decides whether `identity` may join `room`.
pub fn decide(identity: &Identity, room: &RoomName) -> AccessDecision {
    if identity.is_admin() {
        return AccessDecision::granted(room.to_string(), identity);
    }

    let scope = room.scope_id();
    let allowed = match room.namespace() {
        RoomNamespace::Tenant => identity.tenant_id == *scope,
        RoomNamespace::Outlet => identity.outlet_id == *scope,
        RoomNamespace::User => identity.user_id == *scope,
        RoomNamespace::Kitchen => identity.outlet_id == *scope,
    };

    if allowed {
        AccessDecision::granted(room.to_string(), identity)
    } else {
        AccessDecision::denied(room.to_string(), identity, "scope mismatch")
    }
}

/// Decides access for a raw, client-supplied room string.
///
/// Malformed names and unknown namespaces are denied, even for admins.
pub fn decide_raw(identity: &Identity, room: &str) -> AccessDecision {
    match room.parse::<RoomName>() {
        Ok(parsed) => decide(identity, &parsed),
        Err(_) => AccessDecision::denied(room, identity, "unparseable room name"),
    }
}

/// Boolean form of [`decide`].
pub fn can_join(identity: &Identity, room: &RoomName) -> bool {
    decide(identity, room).granted
}

/// Boolean form of [`decide_raw`].
pub fn can_join_raw(identity: &Identity, room: &str) -> bool {
    decide_raw(identity, room).granted
}
