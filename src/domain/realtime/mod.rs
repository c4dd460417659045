//! Real-time distribution domain.
//!
//! Rooms, the room authorization rules, the connection record and the
//! event vocabulary shared by the registry, pipeline and fan-out.

pub mod authorization;
mod connection;
mod event;
mod room;

pub use authorization::{can_join, can_join_raw, AccessDecision, ACCESS_DENIED_MESSAGE};
pub use connection::{CloseReason, Connection, ConnectionState, Delivery};
pub use event::{
    BroadcastEnvelope, EventDomain, EventKind, InboundCommand, InboundMessage, OutboundEvent,
};
pub use room::{RoomName, RoomNamespace, RoomParseError};
