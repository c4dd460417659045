//! Connection registry: the live sockets of this instance.
//!
//! Tracks every authenticated connection, its identity and room
//! memberships, and the outbox its socket writer drains. Never shared across
//! instances; a room's cluster-wide membership is only ever implicit.
//!
//! # Thread Safety
//!
//! Connections and the room index live under one `RwLock` so a removal can
//! never leave a dangling room entry. Deliveries (reads) vastly outnumber
//! joins/leaves (writes).
//!
//! # Backpressure
//!
//! Outboxes are bounded and never awaited. A connection whose outbox is full
//! is asked to close with [`CloseReason::SlowConsumer`]; the socket adapter
//! then tears it down.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::RwLock;

use crate::domain::foundation::{ConnectionId, StateMachine, Timestamp};
use crate::domain::realtime::{
    CloseReason, Connection, ConnectionState, Delivery, OutboundEvent, RoomName,
};

use super::outbox::Outbox;

/// Observability snapshot of this instance's connections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub total_connections: usize,
    /// Distinct tenant ids, sorted.
    pub tenants: Vec<String>,
    /// Distinct outlet ids, sorted.
    pub outlets: Vec<String>,
}

/// A connection that has been idle past the liveness threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdleConnection {
    pub id: ConnectionId,
    pub idle_for: Duration,
    pub probe_sent_at: Option<Timestamp>,
}

struct Entry {
    connection: Connection,
    outbox: Outbox,
}

impl Entry {
    fn deliver(&self, delivery: Delivery) -> bool {
        match delivery {
            Delivery::Event(event) => self.push(event),
            Delivery::Close(reason) => self.outbox.close(reason),
        }
    }

    fn push(&self, event: OutboundEvent) -> bool {
        match self.outbox.try_push(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                if self.outbox.close(CloseReason::SlowConsumer) {
                    tracing::warn!(
                        connection_id = %self.connection.id,
                        user_id = %self.connection.identity.user_id,
                        event_type = %event.event,
                        "Outbox full, closing slow consumer"
                    );
                }
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnectionId, Entry>,
    rooms: HashMap<RoomName, HashSet<ConnectionId>>,
}

impl Inner {
    fn index(&mut self, id: ConnectionId, room: RoomName) {
        self.rooms.entry(room).or_default().insert(id);
    }

    fn unindex(&mut self, id: &ConnectionId, room: &RoomName) {
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(id);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
    }
}

/// Registry of the connections accepted by this instance.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<Inner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a connection along with the rooms it already belongs to.
    pub async fn register(&self, connection: Connection, outbox: Outbox) {
        let mut inner = self.inner.write().await;
        let id = connection.id;
        for room in &connection.joined_rooms {
            inner.index(id, room.clone());
        }
        inner.connections.insert(id, Entry { connection, outbox });
    }

    /// Removes a connection and all of its memberships.
    ///
    /// Returns the removed record, or `None` if it was already gone.
    pub async fn remove(&self, id: &ConnectionId) -> Option<Connection> {
        let mut inner = self.inner.write().await;
        let entry = inner.connections.remove(id)?;
        for room in &entry.connection.joined_rooms {
            inner.unindex(id, room);
        }
        Some(entry.connection)
    }

    /// Adds `room` to the connection's memberships.
    ///
    /// Returns `Some(true)` if newly joined, `Some(false)` if already a
    /// member, `None` if the connection is unknown.
    pub async fn join_room(&self, id: &ConnectionId, room: &RoomName) -> Option<bool> {
        let mut inner = self.inner.write().await;
        let entry = inner.connections.get_mut(id)?;
        let newly_joined = entry.connection.joined_rooms.insert(room.clone());
        if newly_joined {
            inner.index(*id, room.clone());
        }
        Some(newly_joined)
    }

    /// Removes `room` from the connection's memberships.
    ///
    /// Returns `Some(true)` if it was a member, `Some(false)` if not,
    /// `None` if the connection is unknown.
    pub async fn leave_room(&self, id: &ConnectionId, room: &RoomName) -> Option<bool> {
        let mut inner = self.inner.write().await;
        let entry = inner.connections.get_mut(id)?;
        let was_member = entry.connection.joined_rooms.remove(room);
        if was_member {
            inner.unindex(id, room);
        }
        Some(was_member)
    }

    /// Delivers an event to every local member of `room`.
    ///
    /// Returns how many outboxes accepted it. Members whose outbox is full
    /// are closed as slow consumers and do not count.
    pub async fn deliver_to_room(&self, room: &RoomName, event: &OutboundEvent) -> usize {
        let inner = self.inner.read().await;
        let Some(members) = inner.rooms.get(room) else {
            return 0;
        };
        members
            .iter()
            .filter_map(|id| inner.connections.get(id))
            .filter(|entry| entry.push(event.clone()))
            .count()
    }

    /// Queues a delivery for a single connection.
    ///
    /// For a close, returns whether this reason was the one recorded.
    pub async fn send(&self, id: &ConnectionId, delivery: impl Into<Delivery>) -> bool {
        let inner = self.inner.read().await;
        match inner.connections.get(id) {
            Some(entry) => entry.deliver(delivery.into()),
            None => false,
        }
    }

    /// Records inbound activity.
    pub async fn touch(&self, id: &ConnectionId) -> bool {
        let mut inner = self.inner.write().await;
        match inner.connections.get_mut(id) {
            Some(entry) => {
                entry.connection.touch();
                true
            }
            None => false,
        }
    }

    /// Moves the connection to `state`, validating the transition.
    pub async fn transition(&self, id: &ConnectionId, state: ConnectionState) -> bool {
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.connections.get_mut(id) else {
            return false;
        };
        match entry.connection.state.transition_to(state) {
            Ok(next) => {
                entry.connection.state = next;
                true
            }
            Err(e) => {
                tracing::warn!(connection_id = %id, error = %e, "Rejected state transition");
                false
            }
        }
    }

    pub async fn mark_probed(&self, id: &ConnectionId, at: Timestamp) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.connections.get_mut(id) {
            entry.connection.probe_sent_at = Some(at);
        }
    }

    /// Connections idle for at least `threshold`.
    pub async fn idle_connections(&self, threshold: Duration) -> Vec<IdleConnection> {
        let inner = self.inner.read().await;
        inner
            .connections
            .values()
            .filter_map(|entry| {
                let idle_for = entry.connection.idle_for();
                (idle_for >= threshold).then(|| IdleConnection {
                    id: entry.connection.id,
                    idle_for,
                    probe_sent_at: entry.connection.probe_sent_at,
                })
            })
            .collect()
    }

    /// Snapshot of a single connection.
    pub async fn get(&self, id: &ConnectionId) -> Option<Connection> {
        self.inner
            .read()
            .await
            .connections
            .get(id)
            .map(|entry| entry.connection.clone())
    }

    pub async fn connection_ids(&self) -> Vec<ConnectionId> {
        self.inner.read().await.connections.keys().copied().collect()
    }

    /// Number of local connections joined to `room`.
    pub async fn room_member_count(&self, room: &RoomName) -> usize {
        self.inner
            .read()
            .await
            .rooms
            .get(room)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> RegistryStats {
        let inner = self.inner.read().await;
        let mut tenants = BTreeSet::new();
        let mut outlets = BTreeSet::new();
        for entry in inner.connections.values() {
            tenants.insert(entry.connection.identity.tenant_id.to_string());
            outlets.insert(entry.connection.identity.outlet_id.to_string());
        }
        RegistryStats {
            total_connections: inner.connections.len(),
            tenants: tenants.into_iter().collect(),
            outlets: outlets.into_iter().collect(),
        }
    }
}
