//! Backplane port - cross-instance publish/subscribe.
//!
//! Every server instance delivers only to its own sockets. The backplane is
//! the one resource instances share: an instance publishes "deliver E to R"
//! on the room's topic, and every instance subscribed to that topic delivers
//! to its local members.
//!
//! ```text
//!   instance A ──publish(topic)──► backplane ──► instance A (if subscribed)
//!                                            └─► instance B (if subscribed)
//! ```
//!
//! Inbound messages are pushed into a [`BackplaneSink`] handed to the adapter
//! when it is constructed.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;

/// Unique identifier for a server instance.
///
/// Stamped on published envelopes as their origin, for tracing only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A random id of the form `<prefix>-<uuid>`.
    pub fn generate(prefix: &str) -> Self {
        Self(format!("{}-{}", prefix, uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A raw message received on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackplaneMessage {
    pub topic: String,
    pub payload: String,
}

/// Where adapters push inbound messages.
pub type BackplaneSink = mpsc::UnboundedSender<BackplaneMessage>;

/// Errors that can occur in backplane operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackplaneError {
    /// Connection to the backplane is down or the command failed.
    #[error("Backplane unavailable: {0}")]
    Unavailable(String),

    /// Envelope could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Port for the shared publish/subscribe transport.
///
/// # Contract
///
/// - `subscribe`/`unsubscribe` record the desired topic set even while the
///   backplane is down; implementations re-apply it on reconnect
/// - `publish` fails fast with `Unavailable` while unhealthy
/// - A message published to a topic reaches every subscriber of that topic,
///   including the publisher itself if it is subscribed
#[async_trait]
pub trait Backplane: Send + Sync {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BackplaneError>;

    async fn subscribe(&self, topic: &str) -> Result<(), BackplaneError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), BackplaneError>;

    /// Whether the connection to the shared transport is currently up.
    fn is_healthy(&self) -> bool;

    /// Adapter name for logging.
    fn name(&self) -> &'static str;
}

/// Exponential reconnect delay: doubles from `initial` up to `max`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    current: Duration,
    attempts: u32,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
            attempts: 0,
        }
    }

    /// Returns the delay to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    /// Call after a successful connection.
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_cap() {
        let mut backoff = ExponentialBackoff::new(Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.attempts(), 5);
    }

    #[test]
    fn backoff_reset_starts_over() {
        let mut backoff = ExponentialBackoff::new(Duration::from_millis(50), Duration::from_secs(1));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(50));
    }

    #[test]
    fn instance_id_generate_uses_prefix() {
        let id = InstanceId::generate("pos");
        assert!(id.as_str().starts_with("pos-"));
        assert_ne!(id, InstanceId::generate("pos"));
    }

    #[test]
    fn error_messages_are_descriptive() {
        let err = BackplaneError::Unavailable("connection reset".to_string());
        assert_eq!(err.to_string(), "Backplane unavailable: connection reset");
    }
}
