//! Event vocabulary: inbound client frames, outbound frames, and the
//! backplane envelope.
//!
//! Both directions use the same JSON text frame shape:
//!
//! ```text
//! { "event": "order:create", "data": { ... } }
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::domain::foundation::{DomainError, Timestamp, ValidationError};

use super::room::RoomName;

// ============================================
// Domain event types
// ============================================

/// Handler category a domain event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventDomain {
    Order,
    Kitchen,
    Inventory,
    Analytics,
}

impl EventDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventDomain::Order => "order",
            EventDomain::Kitchen => "kitchen",
            EventDomain::Inventory => "inventory",
            EventDomain::Analytics => "analytics",
        }
    }
}

impl fmt::Display for EventDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every inbound domain event type a client may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    OrderCreate,
    OrderUpdate,
    OrderCancel,
    KotCreate,
    KotUpdate,
    InventoryUpdate,
    InventoryLowStock,
    AnalyticsSubscribe,
    AnalyticsUpdate,
}

impl EventKind {
    pub const ALL: [EventKind; 9] = [
        EventKind::OrderCreate,
        EventKind::OrderUpdate,
        EventKind::OrderCancel,
        EventKind::KotCreate,
        EventKind::KotUpdate,
        EventKind::InventoryUpdate,
        EventKind::InventoryLowStock,
        EventKind::AnalyticsSubscribe,
        EventKind::AnalyticsUpdate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::OrderCreate => "order:create",
            EventKind::OrderUpdate => "order:update",
            EventKind::OrderCancel => "order:cancel",
            EventKind::KotCreate => "kitchen:kot_create",
            EventKind::KotUpdate => "kitchen:kot_update",
            EventKind::InventoryUpdate => "inventory:update",
            EventKind::InventoryLowStock => "inventory:low_stock",
            EventKind::AnalyticsSubscribe => "analytics:subscribe",
            EventKind::AnalyticsUpdate => "analytics:update",
        }
    }

    pub fn domain(&self) -> EventDomain {
        match self {
            EventKind::OrderCreate | EventKind::OrderUpdate | EventKind::OrderCancel => {
                EventDomain::Order
            }
            EventKind::KotCreate | EventKind::KotUpdate => EventDomain::Kitchen,
            EventKind::InventoryUpdate | EventKind::InventoryLowStock => EventDomain::Inventory,
            EventKind::AnalyticsSubscribe | EventKind::AnalyticsUpdate => EventDomain::Analytics,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownEventType(s.to_string()))
    }
}

// ============================================
// Client → Server
// ============================================

/// Raw inbound frame as received from the client.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundCommand {
    /// Room is kept raw so unparseable names get the same denial as
    /// forbidden ones.
    JoinRoom { room: String },
    LeaveRoom { room: String },
    Ping,
    /// Reply to a server liveness probe.
    Pong,
    /// Client ends its session; the server closes the socket.
    Logout,
    Domain { kind: EventKind, data: Value },
}

impl InboundMessage {
    /// Parses a text frame.
    pub fn parse(text: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(text)
            .map_err(|e| ValidationError::invalid_format("message", e.to_string()))
    }

    /// Separates control events from domain events.
    pub fn classify(self) -> Result<InboundCommand, ValidationError> {
        match self.event.as_str() {
            "join_room" => Ok(InboundCommand::JoinRoom {
                room: room_field(&self.data)?,
            }),
            "leave_room" => Ok(InboundCommand::LeaveRoom {
                room: room_field(&self.data)?,
            }),
            "ping" => Ok(InboundCommand::Ping),
            "pong" => Ok(InboundCommand::Pong),
            "logout" => Ok(InboundCommand::Logout),
            other => Ok(InboundCommand::Domain {
                kind: other.parse()?,
                data: self.data,
            }),
        }
    }
}

fn room_field(data: &Value) -> Result<String, ValidationError> {
    match data.get("room") {
        Some(Value::String(room)) if !room.trim().is_empty() => Ok(room.clone()),
        Some(Value::String(_)) => Err(ValidationError::empty_field("room")),
        Some(_) => Err(ValidationError::invalid_format("room", "must be a string")),
        None => Err(ValidationError::missing_field("room")),
    }
}

// ============================================
// Server → Client
// ============================================

/// Outbound frame sent to a client socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEvent {
    pub event: String,
    pub data: Value,
}

impl OutboundEvent {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Acknowledgement sent once the default rooms are joined.
    pub fn connected<'a>(rooms: impl IntoIterator<Item = &'a RoomName>) -> Self {
        let rooms: Vec<String> = rooms.into_iter().map(ToString::to_string).collect();
        Self::new(
            "connected",
            json!({
                "message": "Connected to real-time server",
                "rooms": rooms,
            }),
        )
    }

    pub fn room_joined(room: &RoomName) -> Self {
        Self::new("room:joined", json!({ "room": room.to_string() }))
    }

    pub fn room_left(room: &RoomName) -> Self {
        Self::new("room:left", json!({ "room": room.to_string() }))
    }

    /// Error visible only to the requesting connection.
    pub fn error(err: &DomainError) -> Self {
        Self::new(
            "error",
            json!({
                "message": err.message,
                "code": err.code.to_string(),
            }),
        )
    }

    pub fn pong(at: Timestamp) -> Self {
        Self::new("pong", json!({ "timestamp": at.to_rfc3339() }))
    }

    /// Server-initiated liveness probe.
    pub fn ping(at: Timestamp) -> Self {
        Self::new("ping", json!({ "timestamp": at.to_rfc3339() }))
    }

    /// Domain broadcast: the payload's fields plus `timestamp`.
    ///
    /// A non-object payload is nested under `data`.
    pub fn broadcast(event_type: impl Into<String>, payload: Value, at: Timestamp) -> Self {
        let mut body = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };
        body.insert("timestamp".to_string(), Value::String(at.to_rfc3339()));
        Self::new(event_type, Value::Object(body))
    }

    /// Serializes the frame to JSON text.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ============================================
// Backplane
// ============================================

/// Message carried over the backplane: "deliver this event to this room".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastEnvelope {
    pub room: RoomName,
    pub event_type: String,
    pub payload: Value,
    pub timestamp: Timestamp,
    /// Instance that published the envelope.
    pub origin: String,
}

impl BroadcastEnvelope {
    pub fn new(
        room: RoomName,
        event_type: impl Into<String>,
        payload: Value,
        origin: impl Into<String>,
    ) -> Self {
        Self {
            room,
            event_type: event_type.into(),
            payload,
            timestamp: Timestamp::now(),
            origin: origin.into(),
        }
    }

    /// The frame delivered to local members of the room.
    pub fn to_outbound(&self) -> OutboundEvent {
        OutboundEvent::broadcast(self.event_type.clone(), self.payload.clone(), self.timestamp)
    }
}
