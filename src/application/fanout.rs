//! Broadcast fan-out over the backplane.
//!
//! Makes "deliver event E to room R" instance-agnostic:
//!
//! ```text
//! publish(R, E) ──► backplane topic <ns>:room:<R> ──► every subscribed instance
//!                                                       └─► local members of R
//! ```
//!
//! An instance subscribes to a room topic only while it has at least one
//! local member in that room. Its own publishes reach its own members through
//! the same round trip, so local and remote delivery share one code path and
//! the receive loop never re-publishes.
//!
//! # Degraded mode
//!
//! While the backplane is unhealthy, or when a publish fails, events are
//! delivered to local members only and the loss of cross-instance delivery
//! is logged. Subscriptions stay recorded so the adapter can restore them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::domain::foundation::{OutletId, TenantId, UserId};
use crate::domain::realtime::{BroadcastEnvelope, RoomName};
use crate::ports::{Backplane, BackplaneError, BackplaneMessage, InstanceId};

use super::registry::ConnectionRegistry;

/// How a published event was routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Handed to the backplane; delivery happens on receipt.
    Relayed,
    /// Backplane unavailable; delivered to this many local members only.
    LocalOnly { delivered: usize },
}

/// Replicates room broadcasts across instances.
pub struct Broadcaster {
    backplane: Arc<dyn Backplane>,
    registry: Arc<ConnectionRegistry>,
    namespace: String,
    instance: InstanceId,
    /// Local member count per room, guarding backplane subscriptions.
    refcounts: Mutex<HashMap<RoomName, usize>>,
    last_healthy: AtomicBool,
}

impl Broadcaster {
    pub fn new(
        backplane: Arc<dyn Backplane>,
        registry: Arc<ConnectionRegistry>,
        namespace: impl Into<String>,
        instance: InstanceId,
    ) -> Self {
        Self {
            backplane,
            registry,
            namespace: namespace.into(),
            instance,
            refcounts: Mutex::new(HashMap::new()),
            last_healthy: AtomicBool::new(true),
        }
    }

    /// Backplane topic carrying broadcasts for `room`.
    pub fn topic_for(&self, room: &RoomName) -> String {
        room_topic(&self.namespace, room)
    }

    fn room_for_topic(&self, topic: &str) -> Option<RoomName> {
        topic
            .strip_prefix(&self.namespace)?
            .strip_prefix(":room:")?
            .parse()
            .ok()
    }

    pub fn instance(&self) -> &InstanceId {
        &self.instance
    }

    pub fn backplane_name(&self) -> &'static str {
        self.backplane.name()
    }

    /// Whether cross-instance delivery is currently possible.
    pub fn is_healthy(&self) -> bool {
        let healthy = self.backplane.is_healthy();
        self.observe_health(healthy);
        healthy
    }

    fn observe_health(&self, healthy: bool) {
        let was_healthy = self.last_healthy.swap(healthy, Ordering::SeqCst);
        if was_healthy && !healthy {
            tracing::warn!(
                backplane = self.backplane.name(),
                "Backplane unavailable, switching to local-only delivery"
            );
        } else if !was_healthy && healthy {
            tracing::info!(
                backplane = self.backplane.name(),
                "Backplane recovered, resuming cross-instance delivery"
            );
        }
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Subscription reference counting
    // ════════════════════════════════════════════════════════════════════════════

    /// Records one more local member of `room`, subscribing on the first.
    pub async fn retain(&self, room: &RoomName) {
        let mut refcounts = self.refcounts.lock().await;
        let count = refcounts.entry(room.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            let topic = self.topic_for(room);
            match self.backplane.subscribe(&topic).await {
                Ok(()) => tracing::debug!(room = %room, topic = %topic, "Subscribed to room topic"),
                Err(e) => {
                    tracing::warn!(room = %room, error = %e, "Room topic subscription failed")
                }
            }
        }
    }

    /// Records one fewer local member of `room`, unsubscribing at zero.
    pub async fn release(&self, room: &RoomName) {
        let mut refcounts = self.refcounts.lock().await;
        let Some(count) = refcounts.get_mut(room) else {
            tracing::warn!(room = %room, "Released a room with no local members");
            return;
        };
        *count -= 1;
        if *count == 0 {
            refcounts.remove(room);
            let topic = self.topic_for(room);
            match self.backplane.unsubscribe(&topic).await {
                Ok(()) => {
                    tracing::debug!(room = %room, topic = %topic, "Unsubscribed from room topic")
                }
                Err(e) => {
                    tracing::warn!(room = %room, error = %e, "Room topic unsubscribe failed")
                }
            }
        }
    }

    /// Local member count backing the subscription for `room`.
    pub async fn local_refcount(&self, room: &RoomName) -> usize {
        self.refcounts.lock().await.get(room).copied().unwrap_or(0)
    }

    /// Rooms this instance is currently subscribed to.
    pub async fn subscribed_rooms(&self) -> Vec<RoomName> {
        let mut rooms: Vec<RoomName> = self.refcounts.lock().await.keys().cloned().collect();
        rooms.sort();
        rooms
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Publishing
    // ════════════════════════════════════════════════════════════════════════════

    /// Broadcasts an event to every member of `room` across the cluster.
    pub async fn publish(&self, room: &RoomName, event_type: &str, payload: Value) -> PublishOutcome {
        let envelope = BroadcastEnvelope::new(
            room.clone(),
            event_type,
            payload,
            self.instance.as_str(),
        );

        if self.is_healthy() {
            match self.relay(&envelope).await {
                Ok(()) => return PublishOutcome::Relayed,
                Err(e) => {
                    tracing::warn!(
                        room = %room,
                        event_type,
                        error = %e,
                        "Backplane publish failed, delivering locally only"
                    );
                }
            }
        }

        let delivered = self
            .registry
            .deliver_to_room(room, &envelope.to_outbound())
            .await;
        tracing::debug!(
            room = %room,
            event_type,
            delivered,
            "Cross-instance delivery skipped while degraded"
        );
        PublishOutcome::LocalOnly { delivered }
    }

    async fn relay(&self, envelope: &BroadcastEnvelope) -> Result<(), BackplaneError> {
        let payload = serde_json::to_string(envelope)
            .map_err(|e| BackplaneError::Serialization(e.to_string()))?;
        self.backplane
            .publish(&self.topic_for(&envelope.room), payload)
            .await
    }

    /// Producer entry point: deliver to every connection of a tenant.
    pub async fn broadcast_to_tenant(
        &self,
        tenant_id: &TenantId,
        event_type: &str,
        payload: Value,
    ) -> PublishOutcome {
        self.publish(&RoomName::tenant(tenant_id), event_type, payload)
            .await
    }

    /// Producer entry point: deliver to every connection of an outlet.
    pub async fn broadcast_to_outlet(
        &self,
        outlet_id: &OutletId,
        event_type: &str,
        payload: Value,
    ) -> PublishOutcome {
        self.publish(&RoomName::outlet(outlet_id), event_type, payload)
            .await
    }

    /// Producer entry point: deliver to every connection of a user.
    pub async fn broadcast_to_user(
        &self,
        user_id: &UserId,
        event_type: &str,
        payload: Value,
    ) -> PublishOutcome {
        self.publish(&RoomName::user(user_id), event_type, payload)
            .await
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Receiving
    // ════════════════════════════════════════════════════════════════════════════

    /// Delivers one backplane message to local room members.
    ///
    /// Returns the number of local deliveries. Never re-publishes.
    pub async fn handle_backplane_message(&self, message: BackplaneMessage) -> usize {
        let Some(room) = self.room_for_topic(&message.topic) else {
            tracing::debug!(topic = %message.topic, "Ignoring message on foreign topic");
            return 0;
        };

        let envelope: BroadcastEnvelope = match serde_json::from_str(&message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(topic = %message.topic, error = %e, "Dropping malformed envelope");
                return 0;
            }
        };

        if envelope.room != room {
            tracing::warn!(
                topic = %message.topic,
                room = %envelope.room,
                "Envelope room does not match topic"
            );
            return 0;
        }

        let delivered = self
            .registry
            .deliver_to_room(&room, &envelope.to_outbound())
            .await;
        tracing::trace!(
            room = %room,
            event_type = %envelope.event_type,
            origin = %envelope.origin,
            delivered,
            "Delivered backplane broadcast"
        );
        delivered
    }

    /// Spawns the receive loop draining the adapter's sink.
    pub fn spawn_receiver(
        self: &Arc<Self>,
        mut inbound: mpsc::UnboundedReceiver<BackplaneMessage>,
    ) -> JoinHandle<()> {
        let broadcaster = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                broadcaster.handle_backplane_message(message).await;
            }
            tracing::debug!("Backplane receive loop ended");
        })
    }
}

/// Topic name for a room within a cluster namespace.
pub fn room_topic(namespace: &str, room: &RoomName) -> String {
    format!("{}:room:{}", namespace, room)
}
