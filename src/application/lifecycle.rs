//! Connection lifecycle controller.
//!
//! Drives each socket through
//!
//! ```text
//! Connecting → Authenticating → Joined → Active → Disconnecting → Disconnected
//! ```
//!
//! The transport adapter owns the socket; this controller owns everything the
//! socket's life touches: token verification, registry membership, backplane
//! subscriptions for default rooms, the inbound pipeline and liveness
//! eviction.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::domain::foundation::{AuthError, ConnectionId, Identity, Timestamp};
use crate::domain::realtime::{
    CloseReason, Connection, ConnectionState, Delivery, OutboundEvent, RoomName,
};
use crate::ports::TokenVerifier;

use super::fanout::Broadcaster;
use super::handlers::HandlerRegistry;
use super::outbox::{outbox, OutboxReceiver};
use super::pipeline::{Dispatched, EventPipeline};
use super::registry::{ConnectionRegistry, RegistryStats};

/// Timing and buffering knobs for authentication, liveness and delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// Upper bound on token verification.
    pub auth_timeout: Duration,
    /// Inactivity after which a connection is probed.
    pub liveness_timeout: Duration,
    /// How long a probed connection has to answer before eviction.
    pub probe_grace: Duration,
    pub sweep_interval: Duration,
    /// Undelivered events a connection may hold before it is closed as a
    /// slow consumer.
    pub outbox_capacity: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            auth_timeout: Duration::from_secs(10),
            liveness_timeout: Duration::from_secs(60),
            probe_grace: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(15),
            outbox_capacity: 256,
        }
    }
}

/// Result of one liveness sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub probed: usize,
    pub evicted: usize,
}

/// Orchestrates connection setup, steady state and teardown.
pub struct ConnectionLifecycle {
    registry: Arc<ConnectionRegistry>,
    broadcaster: Arc<Broadcaster>,
    pipeline: EventPipeline,
    verifier: Arc<dyn TokenVerifier>,
    config: LifecycleConfig,
}

impl ConnectionLifecycle {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        broadcaster: Arc<Broadcaster>,
        verifier: Arc<dyn TokenVerifier>,
        handlers: HandlerRegistry,
        config: LifecycleConfig,
    ) -> Self {
        let pipeline = EventPipeline::new(Arc::clone(&registry), Arc::clone(&broadcaster), handlers);
        Self {
            registry,
            broadcaster,
            pipeline,
            verifier,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Authenticating
    // ════════════════════════════════════════════════════════════════════════════

    /// Verifies the handshake token within `auth_timeout`.
    pub async fn authenticate(&self, token: Option<&str>) -> Result<Identity, AuthError> {
        let token = token
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(AuthError::MissingToken)?;

        let result = match tokio::time::timeout(self.config.auth_timeout, self.verifier.verify(token)).await {
            Ok(result) => result,
            Err(_) => Err(AuthError::Timeout),
        };

        match &result {
            Ok(identity) => tracing::debug!(
                user_id = %identity.user_id,
                tenant_id = %identity.tenant_id,
                "Token verified"
            ),
            Err(e) if e.is_transient() => tracing::warn!(error = %e, "Token verification unavailable"),
            Err(e) => tracing::debug!(error = %e, "Token rejected"),
        }
        result
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Joined → Active
    // ════════════════════════════════════════════════════════════════════════════

    /// Registers an authenticated connection and joins its default rooms.
    ///
    /// The returned receiver yields everything the socket writer must send,
    /// starting with the `connected` acknowledgement.
    pub async fn open(&self, identity: Identity) -> (ConnectionId, OutboxReceiver) {
        let id = ConnectionId::new();
        let rooms = RoomName::defaults_for(&identity);
        for room in &rooms {
            self.broadcaster.retain(room).await;
        }

        let mut connection = Connection::new(id, identity);
        connection.joined_rooms.extend(rooms.iter().cloned());
        let user_id = connection.identity.user_id.clone();
        let tenant_id = connection.identity.tenant_id.clone();

        let (sender, receiver) = outbox(self.config.outbox_capacity);
        self.registry.register(connection, sender).await;
        self.registry.send(&id, OutboundEvent::connected(&rooms)).await;
        self.registry.transition(&id, ConnectionState::Active).await;

        tracing::info!(
            connection_id = %id,
            user_id = %user_id,
            tenant_id = %tenant_id,
            "Client connected"
        );
        (id, receiver)
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Active
    // ════════════════════════════════════════════════════════════════════════════

    /// Handles one inbound text frame.
    pub async fn handle_inbound(&self, id: &ConnectionId, text: &str) -> Dispatched {
        self.registry.touch(id).await;
        let dispatched = self.pipeline.handle_frame(id, text).await;
        if dispatched == Dispatched::Logout {
            tracing::info!(connection_id = %id, "Client logged out");
            self.registry
                .send(id, Delivery::Close(CloseReason::Logout))
                .await;
        }
        dispatched
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Disconnecting → Disconnected
    // ════════════════════════════════════════════════════════════════════════════

    /// Removes the connection and releases its room subscriptions.
    ///
    /// Idempotent: returns `None` once the connection is gone.
    pub async fn close(&self, id: &ConnectionId) -> Option<Connection> {
        self.registry
            .transition(id, ConnectionState::Disconnecting)
            .await;
        let mut connection = self.registry.remove(id).await?;
        for room in &connection.joined_rooms {
            self.broadcaster.release(room).await;
        }
        connection.state = ConnectionState::Disconnected;

        tracing::info!(
            connection_id = %id,
            user_id = %connection.identity.user_id,
            connected_secs = connection.connected_at.elapsed().as_secs(),
            "Client disconnected"
        );
        Some(connection)
    }

    /// Server-initiated disconnect: tells the socket writer to close, then
    /// tears the connection down.
    pub async fn evict(&self, id: &ConnectionId, reason: CloseReason) -> bool {
        self.registry.send(id, Delivery::Close(reason)).await;
        let evicted = self.close(id).await.is_some();
        if evicted {
            tracing::info!(connection_id = %id, reason = reason.as_str(), "Connection evicted");
        }
        evicted
    }

    /// Probes idle connections and evicts those that ignored a probe.
    pub async fn sweep_once(&self) -> SweepReport {
        let mut report = SweepReport::default();

        for idle in self
            .registry
            .idle_connections(self.config.liveness_timeout)
            .await
        {
            match idle.probe_sent_at {
                None => {
                    let now = Timestamp::now();
                    if self.registry.send(&idle.id, OutboundEvent::ping(now)).await {
                        self.registry.mark_probed(&idle.id, now).await;
                        report.probed += 1;
                    } else if self.evict(&idle.id, CloseReason::Evicted).await {
                        report.evicted += 1;
                    }
                }
                Some(sent_at) if sent_at.elapsed() >= self.config.probe_grace => {
                    tracing::debug!(
                        connection_id = %idle.id,
                        idle_secs = idle.idle_for.as_secs(),
                        "Liveness probe unanswered"
                    );
                    if self.evict(&idle.id, CloseReason::Evicted).await {
                        report.evicted += 1;
                    }
                }
                Some(_) => {}
            }
        }

        report
    }

    /// Runs [`sweep_once`](Self::sweep_once) every `sweep_interval`.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let lifecycle = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(lifecycle.config.sweep_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let report = lifecycle.sweep_once().await;
                if report != SweepReport::default() {
                    tracing::debug!(
                        probed = report.probed,
                        evicted = report.evicted,
                        "Liveness sweep"
                    );
                }
            }
        })
    }

    /// Closes every local connection. Returns how many were closed.
    pub async fn shutdown(&self) -> usize {
        let ids = self.registry.connection_ids().await;
        let mut closed = 0;
        for id in &ids {
            if self.evict(id, CloseReason::ServerShutdown).await {
                closed += 1;
            }
        }
        tracing::info!(closed, "Closed all connections for shutdown");
        closed
    }

    pub async fn stats(&self) -> RegistryStats {
        self.registry.stats().await
    }
}
