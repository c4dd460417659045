//! Inbound event pipeline.
//!
//! Turns one client text frame into its effect:
//!
//! 1. parse and classify the frame (control event or domain event)
//! 2. control events (`join_room`, `leave_room`, `ping`, `pong`, `logout`)
//!    are handled here directly
//! 3. domain events go to the handler registered for their domain, whose
//!    outcome is checked against the sender's room permissions and
//!    published through the [`Broadcaster`]
//!
//! Every failure becomes an `error` event sent to the originating connection
//! only. Nothing here disconnects a client.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;

use crate::domain::foundation::{
    ConnectionId, DomainError, ErrorCode, Timestamp, ValidationError,
};
use crate::domain::realtime::authorization::{self, ACCESS_DENIED_MESSAGE};
use crate::domain::realtime::{
    Connection, EventKind, InboundCommand, InboundMessage, OutboundEvent, RoomName,
    RoomParseError,
};

use super::fanout::Broadcaster;
use super::handlers::HandlerRegistry;
use super::registry::ConnectionRegistry;

/// Message sent when a client tries to leave one of its default rooms.
pub const DEFAULT_ROOM_LEAVE_MESSAGE: &str = "Cannot leave default room";

/// What the pipeline did with a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    JoinedRoom(RoomName),
    LeftRoom(RoomName),
    Pong,
    /// The client answered a server liveness probe.
    ProbeAnswered,
    /// The client asked to end its session.
    Logout,
    Broadcast {
        event_type: String,
        rooms: Vec<RoomName>,
    },
    /// An `error` event was sent back to the client.
    Rejected(DomainError),
    /// The connection is no longer registered.
    Dropped,
}

/// Dispatches inbound frames for every connection of this instance.
pub struct EventPipeline {
    registry: Arc<ConnectionRegistry>,
    broadcaster: Arc<Broadcaster>,
    handlers: HandlerRegistry,
}

impl EventPipeline {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        broadcaster: Arc<Broadcaster>,
        handlers: HandlerRegistry,
    ) -> Self {
        Self {
            registry,
            broadcaster,
            handlers,
        }
    }

    /// Handles one text frame from connection `id`.
    pub async fn handle_frame(&self, id: &ConnectionId, text: &str) -> Dispatched {
        let Some(connection) = self.registry.get(id).await else {
            tracing::debug!(connection_id = %id, "Frame from unregistered connection");
            return Dispatched::Dropped;
        };

        let command = match InboundMessage::parse(text).and_then(InboundMessage::classify) {
            Ok(command) => command,
            Err(e) => return self.reject(id, e.into()).await,
        };

        match self.dispatch(&connection, command).await {
            Ok(dispatched) => dispatched,
            Err(err) => self.reject(id, err).await,
        }
    }

    async fn reject(&self, id: &ConnectionId, err: DomainError) -> Dispatched {
        tracing::debug!(connection_id = %id, error = %err, "Rejected inbound event");
        self.registry.send(id, OutboundEvent::error(&err)).await;
        Dispatched::Rejected(err)
    }

    async fn dispatch(
        &self,
        connection: &Connection,
        command: InboundCommand,
    ) -> Result<Dispatched, DomainError> {
        match command {
            InboundCommand::JoinRoom { room } => self.join_room(connection, &room).await,
            InboundCommand::LeaveRoom { room } => self.leave_room(connection, &room).await,
            InboundCommand::Ping => {
                self.registry
                    .send(&connection.id, OutboundEvent::pong(Timestamp::now()))
                    .await;
                Ok(Dispatched::Pong)
            }
            InboundCommand::Pong => Ok(Dispatched::ProbeAnswered),
            InboundCommand::Logout => Ok(Dispatched::Logout),
            InboundCommand::Domain { kind, data } => {
                self.dispatch_domain(connection, kind, &data).await
            }
        }
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Control events
    // ════════════════════════════════════════════════════════════════════════════

    async fn join_room(&self, connection: &Connection, raw: &str) -> Result<Dispatched, DomainError> {
        // Unparseable names get the same denial as foreign rooms.
        let room = match raw.parse::<RoomName>() {
            Ok(room) => room,
            Err(e) => {
                tracing::debug!(
                    connection_id = %connection.id,
                    user_id = %connection.identity.user_id,
                    room = raw,
                    reason = %e,
                    "Room access denied"
                );
                return Err(access_denied());
            }
        };

        let decision = authorization::decide(&connection.identity, &room);
        if !decision.is_granted() {
            tracing::debug!(
                connection_id = %connection.id,
                user_id = %decision.user_id,
                room = %decision.room,
                reason = decision.reason.unwrap_or("unknown"),
                "Room access denied"
            );
            return Err(access_denied());
        }

        // Retained before membership is recorded: close releases only
        // recorded rooms.
        self.broadcaster.retain(&room).await;
        match self.registry.join_room(&connection.id, &room).await {
            Some(true) => {
                tracing::debug!(connection_id = %connection.id, room = %room, "Joined room");
            }
            Some(false) => self.broadcaster.release(&room).await,
            None => {
                self.broadcaster.release(&room).await;
                return Ok(Dispatched::Dropped);
            }
        }

        self.registry
            .send(&connection.id, OutboundEvent::room_joined(&room))
            .await;
        Ok(Dispatched::JoinedRoom(room))
    }

    async fn leave_room(&self, connection: &Connection, raw: &str) -> Result<Dispatched, DomainError> {
        let room: RoomName = raw
            .parse()
            .map_err(|e: RoomParseError| ValidationError::invalid_format("room", e.to_string()))?;

        if connection.is_default_room(&room) {
            return Err(DomainError::new(
                ErrorCode::ValidationFailed,
                DEFAULT_ROOM_LEAVE_MESSAGE,
            ));
        }

        if let Some(true) = self.registry.leave_room(&connection.id, &room).await {
            self.broadcaster.release(&room).await;
            tracing::debug!(connection_id = %connection.id, room = %room, "Left room");
        }

        self.registry
            .send(&connection.id, OutboundEvent::room_left(&room))
            .await;
        Ok(Dispatched::LeftRoom(room))
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Domain events
    // ════════════════════════════════════════════════════════════════════════════

    async fn dispatch_domain(
        &self,
        connection: &Connection,
        kind: EventKind,
        data: &Value,
    ) -> Result<Dispatched, DomainError> {
        let handler = self
            .handlers
            .get(kind.domain())
            .ok_or_else(|| ValidationError::UnknownEventType(kind.as_str().to_string()))?;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            handler.handle(connection, kind, data)
        }))
        .unwrap_or_else(|_| {
            tracing::error!(
                connection_id = %connection.id,
                event_type = %kind,
                domain = %kind.domain(),
                "Domain handler panicked"
            );
            Err(ValidationError::handler_fault(kind.as_str()))
        })?;

        let mut rooms: Vec<RoomName> = Vec::with_capacity(outcome.target_rooms.len());
        for room in outcome.target_rooms {
            if !rooms.contains(&room) {
                rooms.push(room);
            }
        }

        if let Some(denied) = rooms
            .iter()
            .find(|room| !authorization::can_join(&connection.identity, room))
        {
            tracing::debug!(
                connection_id = %connection.id,
                event_type = %kind,
                room = %denied,
                "Broadcast to unauthorized room refused"
            );
            return Err(access_denied());
        }

        for room in &rooms {
            self.broadcaster
                .publish(room, &outcome.outbound_type, outcome.outbound_payload.clone())
                .await;
        }

        tracing::debug!(
            connection_id = %connection.id,
            event_type = %kind,
            outbound = %outcome.outbound_type,
            rooms = rooms.len(),
            "Dispatched domain event"
        );

        Ok(Dispatched::Broadcast {
            event_type: outcome.outbound_type,
            rooms,
        })
    }
}

fn access_denied() -> DomainError {
    DomainError::new(ErrorCode::RoomAccessDenied, ACCESS_DENIED_MESSAGE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::backplane::InMemoryBackplaneHub;
    use crate::application::handlers::{DomainHandler, HandlerOutcome};
    use crate::application::outbox::{outbox, OutboxReceiver};
    use crate::domain::foundation::{Identity, OutletId, Role, TenantId, UserId};
    use crate::domain::realtime::{Delivery, EventDomain};
    use crate::ports::InstanceId;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Harness {
        registry: Arc<ConnectionRegistry>,
        broadcaster: Arc<Broadcaster>,
        pipeline: EventPipeline,
        _hub: InMemoryBackplaneHub,
    }

    fn harness_with(handlers: HandlerRegistry) -> Harness {
        let hub = InMemoryBackplaneHub::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Arc::new(Broadcaster::new(
            Arc::new(hub.node(tx)),
            Arc::clone(&registry),
            "test",
            InstanceId::new("pipeline"),
        ));
        broadcaster.spawn_receiver(rx);
        let pipeline = EventPipeline::new(
            Arc::clone(&registry),
            Arc::clone(&broadcaster),
            handlers,
        );
        Harness {
            registry,
            broadcaster,
            pipeline,
            _hub: hub,
        }
    }

    fn harness() -> Harness {
        harness_with(HandlerRegistry::with_defaults())
    }

    fn identity(role: Role) -> Identity {
        Identity::new(
            UserId::new("u1").unwrap(),
            TenantId::new("t1").unwrap(),
            OutletId::new("o1").unwrap(),
            role,
        )
    }

    async fn connect(h: &Harness, role: Role) -> (ConnectionId, OutboxReceiver) {
        let mut conn = Connection::new(ConnectionId::new(), identity(role));
        let rooms = RoomName::defaults_for(&conn.identity);
        conn.joined_rooms = rooms.iter().cloned().collect();
        let id = conn.id;
        let (tx, rx) = outbox(64);
        h.registry.register(conn, tx).await;
        for room in &rooms {
            h.broadcaster.retain(room).await;
        }
        (id, rx)
    }

    async fn next_event(rx: &mut OutboxReceiver) -> OutboundEvent {
        match tokio::time::timeout(Duration::from_millis(500), rx.recv()).await {
            Ok(Some(Delivery::Event(event))) => event,
            other => panic!("expected an event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn join_permitted_room_replies_joined_and_retains_topic() {
        let h = harness();
        let (id, mut rx) = connect(&h, Role::Staff).await;

        let result = h
            .pipeline
            .handle_frame(&id, r#"{"event":"join_room","data":{"room":"kitchen:o1"}}"#)
            .await;

        let kitchen: RoomName = "kitchen:o1".parse().unwrap();
        assert_eq!(result, Dispatched::JoinedRoom(kitchen.clone()));
        let reply = next_event(&mut rx).await;
        assert_eq!(reply.event, "room:joined");
        assert_eq!(reply.data["room"], "kitchen:o1");
        assert_eq!(h.broadcaster.local_refcount(&kitchen).await, 1);
    }

    #[tokio::test]
    async fn join_foreign_tenant_is_denied_with_stable_message() {
        let h = harness();
        let (id, mut rx) = connect(&h, Role::Staff).await;

        let result = h
            .pipeline
            .handle_frame(&id, r#"{"event":"join_room","data":{"room":"tenant:t2"}}"#)
            .await;

        assert!(matches!(result, Dispatched::Rejected(ref e) if e.code == ErrorCode::RoomAccessDenied));
        let reply = next_event(&mut rx).await;
        assert_eq!(reply.event, "error");
        assert_eq!(reply.data["message"], ACCESS_DENIED_MESSAGE);
        let conn = h.registry.get(&id).await.unwrap();
        assert_eq!(conn.joined_rooms.len(), 3);
    }

    #[tokio::test]
    async fn unknown_namespace_gets_same_denial() {
        let h = harness();
        let (id, mut rx) = connect(&h, Role::Admin).await;

        h.pipeline
            .handle_frame(&id, r#"{"event":"join_room","data":{"room":"galaxy:42"}}"#)
            .await;

        assert_eq!(next_event(&mut rx).await.data["message"], ACCESS_DENIED_MESSAGE);
    }

    #[tokio::test]
    async fn malformed_room_is_denied_without_retaining_anything() {
        let h = harness();
        let (id, mut rx) = connect(&h, Role::Admin).await;

        for raw in ["kitchen", "tenant:", "table:5"] {
            let frame = format!(r#"{{"event":"join_room","data":{{"room":"{}"}}}}"#, raw);
            let result = h.pipeline.handle_frame(&id, &frame).await;

            assert!(
                matches!(result, Dispatched::Rejected(ref e) if e.code == ErrorCode::RoomAccessDenied),
                "{} was not denied",
                raw
            );
            assert_eq!(next_event(&mut rx).await.data["message"], ACCESS_DENIED_MESSAGE);
        }
        assert_eq!(h.broadcaster.subscribed_rooms().await.len(), 3);
    }

    #[tokio::test]
    async fn joining_twice_keeps_refcount_at_one() {
        let h = harness();
        let (id, _rx) = connect(&h, Role::Staff).await;
        let frame = r#"{"event":"join_room","data":{"room":"kitchen:o1"}}"#;

        h.pipeline.handle_frame(&id, frame).await;
        h.pipeline.handle_frame(&id, frame).await;

        let kitchen: RoomName = "kitchen:o1".parse().unwrap();
        assert_eq!(h.broadcaster.local_refcount(&kitchen).await, 1);
    }

    #[tokio::test]
    async fn leave_releases_topic() {
        let h = harness();
        let (id, mut rx) = connect(&h, Role::Staff).await;
        h.pipeline
            .handle_frame(&id, r#"{"event":"join_room","data":{"room":"kitchen:o1"}}"#)
            .await;
        next_event(&mut rx).await;

        let result = h
            .pipeline
            .handle_frame(&id, r#"{"event":"leave_room","data":{"room":"kitchen:o1"}}"#)
            .await;

        let kitchen: RoomName = "kitchen:o1".parse().unwrap();
        assert_eq!(result, Dispatched::LeftRoom(kitchen.clone()));
        assert_eq!(next_event(&mut rx).await.event, "room:left");
        assert_eq!(h.broadcaster.local_refcount(&kitchen).await, 0);
    }

    #[tokio::test]
    async fn default_rooms_cannot_be_left() {
        let h = harness();
        let (id, mut rx) = connect(&h, Role::Staff).await;

        h.pipeline
            .handle_frame(&id, r#"{"event":"leave_room","data":{"room":"outlet:o1"}}"#)
            .await;

        let reply = next_event(&mut rx).await;
        assert_eq!(reply.event, "error");
        assert_eq!(reply.data["message"], DEFAULT_ROOM_LEAVE_MESSAGE);
        assert_eq!(h.registry.get(&id).await.unwrap().joined_rooms.len(), 3);
    }

    #[tokio::test]
    async fn ping_replies_pong_with_server_timestamp() {
        let h = harness();
        let (id, mut rx) = connect(&h, Role::Staff).await;
        let sent_at = Timestamp::now();

        assert_eq!(
            h.pipeline.handle_frame(&id, r#"{"event":"ping","data":{}}"#).await,
            Dispatched::Pong
        );

        let reply = next_event(&mut rx).await;
        assert_eq!(reply.event, "pong");
        let stamp: Timestamp =
            serde_json::from_value(reply.data["timestamp"].clone()).unwrap();
        assert!(stamp.as_unix_millis() >= sent_at.as_unix_millis());
    }

    #[tokio::test]
    async fn malformed_frame_is_reported_not_fatal() {
        let h = harness();
        let (id, mut rx) = connect(&h, Role::Staff).await;

        let result = h.pipeline.handle_frame(&id, "{not json").await;

        assert!(matches!(result, Dispatched::Rejected(ref e) if e.code == ErrorCode::ValidationFailed));
        assert_eq!(next_event(&mut rx).await.event, "error");
        assert!(h.registry.get(&id).await.is_some());
    }

    #[tokio::test]
    async fn unknown_event_type_is_reported() {
        let h = harness();
        let (id, mut rx) = connect(&h, Role::Staff).await;

        let result = h
            .pipeline
            .handle_frame(&id, r#"{"event":"order:teleport","data":{}}"#)
            .await;

        assert!(matches!(result, Dispatched::Rejected(ref e) if e.code == ErrorCode::UnknownEvent));
        assert_eq!(next_event(&mut rx).await.data["code"], "UNKNOWN_EVENT");
    }

    #[tokio::test]
    async fn order_create_is_broadcast_to_outlet_members() {
        let h = harness();
        let (id, mut rx) = connect(&h, Role::Staff).await;

        let result = h
            .pipeline
            .handle_frame(
                &id,
                r#"{"event":"order:create","data":{"order":{"id":"ord-1","items":[{"sku":"A"}]}}}"#,
            )
            .await;

        assert!(matches!(result, Dispatched::Broadcast { ref event_type, .. } if event_type == "order:new"));
        let event = next_event(&mut rx).await;
        assert_eq!(event.event, "order:new");
        assert_eq!(event.data["order"]["id"], "ord-1");
        assert!(event.data["timestamp"].is_string());
    }

    #[tokio::test]
    async fn broadcast_to_foreign_outlet_is_refused() {
        let h = harness();
        let (id, mut rx) = connect(&h, Role::Staff).await;

        let result = h
            .pipeline
            .handle_frame(
                &id,
                r#"{"event":"order:update","data":{"orderId":"ord-1","outletId":"o2"}}"#,
            )
            .await;

        assert!(matches!(result, Dispatched::Rejected(ref e) if e.code == ErrorCode::RoomAccessDenied));
        assert_eq!(next_event(&mut rx).await.data["message"], ACCESS_DENIED_MESSAGE);
    }

    #[tokio::test]
    async fn admin_may_broadcast_to_any_outlet() {
        let h = harness();
        let (id, _rx) = connect(&h, Role::Admin).await;

        let result = h
            .pipeline
            .handle_frame(
                &id,
                r#"{"event":"order:update","data":{"orderId":"ord-1","outletId":"o2"}}"#,
            )
            .await;

        assert!(matches!(result, Dispatched::Broadcast { .. }));
    }

    #[tokio::test]
    async fn panicking_handler_becomes_internal_error() {
        struct Exploding;
        impl DomainHandler for Exploding {
            fn domain(&self) -> EventDomain {
                EventDomain::Analytics
            }
            fn handle(
                &self,
                _: &Connection,
                _: EventKind,
                _: &Value,
            ) -> Result<HandlerOutcome, ValidationError> {
                panic!("boom")
            }
        }

        let mut handlers = HandlerRegistry::with_defaults();
        handlers.register(Arc::new(Exploding));
        let h = harness_with(handlers);
        let (id, mut rx) = connect(&h, Role::Staff).await;

        let result = h
            .pipeline
            .handle_frame(&id, r#"{"event":"analytics:update","data":{"metrics":{}}}"#)
            .await;

        assert!(matches!(result, Dispatched::Rejected(ref e) if e.code == ErrorCode::InternalError));
        assert_eq!(next_event(&mut rx).await.data["code"], "INTERNAL_ERROR");
        assert!(h.registry.get(&id).await.is_some());
    }

    #[tokio::test]
    async fn missing_handler_is_unknown_event() {
        let h = harness_with(HandlerRegistry::new());
        let (id, _rx) = connect(&h, Role::Staff).await;

        let result = h
            .pipeline
            .handle_frame(&id, r#"{"event":"inventory:update","data":{}}"#)
            .await;

        assert!(matches!(result, Dispatched::Rejected(ref e) if e.code == ErrorCode::UnknownEvent));
    }

    #[tokio::test]
    async fn frames_from_removed_connections_are_dropped() {
        let h = harness();
        let (id, _rx) = connect(&h, Role::Staff).await;
        h.registry.remove(&id).await;

        assert_eq!(
            h.pipeline.handle_frame(&id, r#"{"event":"ping"}"#).await,
            Dispatched::Dropped
        );
    }

    #[tokio::test]
    async fn logout_and_probe_answers_are_classified() {
        let h = harness();
        let (id, _rx) = connect(&h, Role::Staff).await;

        assert_eq!(
            h.pipeline.handle_frame(&id, r#"{"event":"logout"}"#).await,
            Dispatched::Logout
        );
        assert_eq!(
            h.pipeline.handle_frame(&id, r#"{"event":"pong"}"#).await,
            Dispatched::ProbeAnswered
        );
    }
}
