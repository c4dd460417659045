//! Redis pub/sub backplane for multi-instance deployments.
//!
//! Publishing goes through a multiplexed connection. A supervisor task owns
//! the subscriber connection: it keeps the connection's SUBSCRIBE set equal
//! to the topics this instance references, forwards their messages to the
//! sink, and when the connection drops it marks the backplane unhealthy and
//! reconnects with exponential backoff.
//!
//! `subscribe`/`unsubscribe` only edit the desired topic set and wake the
//! supervisor, which reconciles the live connection against it. A fresh
//! connection starts empty, so recovery resubscribes the whole set.
//!
//! Redis pub/sub is at-most-once: messages published while a subscription
//! change is in flight, or while disconnected, may be lost.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::{MultiplexedConnection, PubSub};
use redis::{AsyncCommands, Msg};
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;

use crate::ports::{Backplane, BackplaneError, BackplaneMessage, BackplaneSink, ExponentialBackoff};

/// Settings for [`RedisBackplane`].
#[derive(Debug, Clone)]
pub struct RedisBackplaneConfig {
    pub url: String,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

struct Shared {
    publisher: RwLock<Option<MultiplexedConnection>>,
    desired: Mutex<HashSet<String>>,
    /// Signalled whenever `desired` changes.
    changed: Notify,
    healthy: AtomicBool,
}

impl Shared {
    fn wants(&self, topic: &str) -> bool {
        self.desired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(topic)
    }

    fn update_desired(&self, edit: impl FnOnce(&mut HashSet<String>) -> bool) {
        let modified = edit(&mut self.desired.lock().unwrap_or_else(PoisonError::into_inner));
        if modified {
            self.changed.notify_one();
        }
    }

    fn pending_changes(&self, active: &BTreeSet<String>) -> SubscriptionDiff {
        let desired = self.desired.lock().unwrap_or_else(PoisonError::into_inner);
        SubscriptionDiff::between(&desired, active)
    }

    async fn mark_up(&self, publisher: MultiplexedConnection) {
        *self.publisher.write().await = Some(publisher);
        if !self.healthy.swap(true, Ordering::SeqCst) {
            tracing::info!("Redis backplane connected");
        }
    }

    async fn mark_down(&self, reason: &str) {
        *self.publisher.write().await = None;
        if self.healthy.swap(false, Ordering::SeqCst) {
            tracing::warn!(reason, "Redis backplane lost, delivering locally only");
        }
    }
}

/// Channels to add to and drop from a live subscriber connection.
#[derive(Debug, Default, PartialEq, Eq)]
struct SubscriptionDiff {
    subscribe: Vec<String>,
    unsubscribe: Vec<String>,
}

impl SubscriptionDiff {
    fn between(desired: &HashSet<String>, active: &BTreeSet<String>) -> Self {
        let mut subscribe: Vec<String> = desired
            .iter()
            .filter(|topic| !active.contains(*topic))
            .cloned()
            .collect();
        subscribe.sort();
        let unsubscribe = active
            .iter()
            .filter(|topic| !desired.contains(*topic))
            .cloned()
            .collect();
        Self {
            subscribe,
            unsubscribe,
        }
    }

    fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.unsubscribe.is_empty()
    }
}

/// Redis pub/sub implementation of the `Backplane` port.
pub struct RedisBackplane {
    shared: Arc<Shared>,
    supervisor: JoinHandle<()>,
}

impl RedisBackplane {
    /// Starts the supervisor task and returns immediately.
    ///
    /// The backplane reports unhealthy until the first connection succeeds.
    /// Fails only when the URL itself is invalid.
    pub fn start(config: RedisBackplaneConfig, sink: BackplaneSink) -> Result<Self, BackplaneError> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| BackplaneError::Unavailable(format!("invalid redis url: {}", e)))?;

        let shared = Arc::new(Shared {
            publisher: RwLock::new(None),
            desired: Mutex::new(HashSet::new()),
            changed: Notify::new(),
            healthy: AtomicBool::new(false),
        });

        let supervisor = tokio::spawn(supervise(client, config, Arc::clone(&shared), sink));

        Ok(Self { shared, supervisor })
    }
}

impl Drop for RedisBackplane {
    fn drop(&mut self) {
        self.supervisor.abort();
    }
}

async fn supervise(
    client: redis::Client,
    config: RedisBackplaneConfig,
    shared: Arc<Shared>,
    sink: BackplaneSink,
) {
    let mut backoff = ExponentialBackoff::new(config.backoff_initial, config.backoff_max);

    loop {
        match run_session(&client, &shared, &sink, &mut backoff).await {
            Ok(()) => shared.mark_down("subscription stream ended").await,
            Err(e) => shared.mark_down(&e.to_string()).await,
        }

        if sink.is_closed() {
            tracing::debug!("Backplane sink closed, stopping redis supervisor");
            return;
        }

        let delay = backoff.next_delay();
        tracing::info!(
            attempt = backoff.attempts(),
            delay_ms = delay.as_millis() as u64,
            "Reconnecting to redis backplane"
        );
        tokio::time::sleep(delay).await;
    }
}

/// One connected period: returns when the subscriber connection ends.
async fn run_session(
    client: &redis::Client,
    shared: &Shared,
    sink: &BackplaneSink,
    backoff: &mut ExponentialBackoff,
) -> redis::RedisResult<()> {
    let publisher = client.get_multiplexed_tokio_connection().await?;
    let mut pubsub = client.get_async_connection().await?.into_pubsub();

    let mut active = BTreeSet::new();
    reconcile(&mut pubsub, shared, &mut active).await?;

    shared.mark_up(publisher).await;
    backoff.reset();

    loop {
        // The message stream borrows the connection; it is dropped before
        // any SUBSCRIBE/UNSUBSCRIBE is issued.
        {
            let mut messages = pubsub.on_message();
            loop {
                tokio::select! {
                    msg = messages.next() => {
                        let Some(msg) = msg else {
                            return Ok(());
                        };
                        if !forward(msg, shared, sink) {
                            return Ok(());
                        }
                    }
                    _ = shared.changed.notified() => break,
                }
            }
        }
        reconcile(&mut pubsub, shared, &mut active).await?;
    }
}

/// Brings the connection's subscriptions in line with the desired set.
async fn reconcile(
    pubsub: &mut PubSub,
    shared: &Shared,
    active: &mut BTreeSet<String>,
) -> redis::RedisResult<()> {
    let diff = shared.pending_changes(active);
    if diff.is_empty() {
        return Ok(());
    }

    for topic in diff.subscribe {
        pubsub.subscribe(topic.as_str()).await?;
        tracing::debug!(topic = %topic, "Subscribed to redis channel");
        active.insert(topic);
    }
    for topic in diff.unsubscribe {
        pubsub.unsubscribe(topic.as_str()).await?;
        tracing::debug!(topic = %topic, "Unsubscribed from redis channel");
        active.remove(&topic);
    }
    Ok(())
}

/// Hands one message to the sink. Returns `false` once the sink is closed.
fn forward(msg: Msg, shared: &Shared, sink: &BackplaneSink) -> bool {
    let topic = msg.get_channel_name().to_string();
    // Late deliveries for a channel being unsubscribed.
    if !shared.wants(&topic) {
        return true;
    }
    let payload: String = match msg.get_payload() {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(topic = %topic, error = %e, "Dropping undecodable backplane message");
            return true;
        }
    };
    sink.send(BackplaneMessage { topic, payload }).is_ok()
}

#[async_trait]
impl Backplane for RedisBackplane {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BackplaneError> {
        let mut conn = match self.shared.publisher.read().await.as_ref() {
            Some(conn) => conn.clone(),
            None => return Err(BackplaneError::Unavailable("not connected".to_string())),
        };

        conn.publish::<_, _, ()>(topic, payload)
            .await
            .map_err(|e: redis::RedisError| BackplaneError::Unavailable(e.to_string()))
    }

    async fn subscribe(&self, topic: &str) -> Result<(), BackplaneError> {
        self.shared
            .update_desired(|desired| desired.insert(topic.to_string()));
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), BackplaneError> {
        self.shared.update_desired(|desired| desired.remove(topic));
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.shared.healthy.load(Ordering::SeqCst)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
