//! Connection record and lifecycle state.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::Serialize;

use crate::domain::foundation::{ConnectionId, Identity, StateMachine, Timestamp};

use super::event::OutboundEvent;
use super::room::RoomName;

/// Lifecycle state of a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Authenticating,
    Joined,
    Active,
    Disconnecting,
    Disconnected,
}

impl StateMachine for ConnectionState {
    fn valid_transitions(&self) -> Vec<Self> {
        use ConnectionState::*;
        match self {
            Connecting => vec![Authenticating, Disconnecting],
            Authenticating => vec![Joined, Disconnecting],
            Joined => vec![Active, Disconnecting],
            Active => vec![Disconnecting],
            Disconnecting => vec![Disconnected],
            Disconnected => vec![],
        }
    }
}

/// Why the server is closing a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Authentication failed or timed out.
    Unauthorized,
    /// The client asked to end its session.
    Logout,
    /// Liveness probe went unanswered.
    Evicted,
    /// Outbox filled faster than the socket drained it.
    SlowConsumer,
    ServerShutdown,
}

impl CloseReason {
    /// Text placed in the websocket close frame.
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Unauthorized => "unauthorized",
            CloseReason::Logout => "logout",
            CloseReason::Evicted => "liveness timeout",
            CloseReason::SlowConsumer => "slow consumer",
            CloseReason::ServerShutdown => "server shutting down",
        }
    }
}

/// An item queued for a connection's socket writer.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Event(OutboundEvent),
    Close(CloseReason),
}

impl From<OutboundEvent> for Delivery {
    fn from(event: OutboundEvent) -> Self {
        Delivery::Event(event)
    }
}

/// A live client connection, owned by the registry of the accepting instance.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub identity: Identity,
    pub joined_rooms: BTreeSet<RoomName>,
    pub connected_at: Timestamp,
    pub last_activity_at: Timestamp,
    pub state: ConnectionState,
    /// Set when a liveness probe was sent and not yet answered.
    pub probe_sent_at: Option<Timestamp>,
}

impl Connection {
    /// Creates a freshly authenticated connection in the `Joined` state.
    ///
    /// Room membership starts empty; the lifecycle joins the default rooms.
    pub fn new(id: ConnectionId, identity: Identity) -> Self {
        let now = Timestamp::now();
        Self {
            id,
            identity,
            joined_rooms: BTreeSet::new(),
            connected_at: now,
            last_activity_at: now,
            state: ConnectionState::Joined,
            probe_sent_at: None,
        }
    }

    /// Records inbound activity and clears any outstanding probe.
    pub fn touch(&mut self) {
        self.last_activity_at = Timestamp::now();
        self.probe_sent_at = None;
    }

    pub fn is_default_room(&self, room: &RoomName) -> bool {
        room.is_default_for(&self.identity)
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity_at.elapsed()
    }
}
