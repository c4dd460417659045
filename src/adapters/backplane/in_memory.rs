//! In-memory backplane for single-instance deployments and tests.
//!
//! An [`InMemoryBackplaneHub`] stands in for the shared pub/sub server; each
//! [`InMemoryBackplane`] node attached to it behaves like one server
//! instance's connection. The hub can be taken down and brought back to
//! exercise degraded mode:
//!
//! - while down, `publish` fails and every node reports unhealthy
//! - subscriptions requested while down are remembered
//! - on recovery every node resubscribes its remembered topics

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use async_trait::async_trait;

use crate::ports::{Backplane, BackplaneError, BackplaneMessage, BackplaneSink};

/// Shared pub/sub hub that in-memory nodes attach to.
#[derive(Clone, Default)]
pub struct InMemoryBackplaneHub {
    inner: Arc<HubInner>,
}

#[derive(Default)]
struct HubInner {
    down: AtomicBool,
    nodes: Mutex<Vec<Weak<NodeState>>>,
}

struct NodeState {
    sink: BackplaneSink,
    /// Topics the owner asked for.
    desired: Mutex<HashSet<String>>,
    /// Topics the hub currently routes to this node.
    active: Mutex<HashSet<String>>,
    healthy: AtomicBool,
}

impl NodeState {
    fn resubscribe(&self) {
        let desired = self.desired.lock().unwrap_or_else(PoisonError::into_inner).clone();
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = desired;
        self.healthy.store(true, Ordering::SeqCst);
    }

    fn drop_subscriptions(&self) {
        self.active.lock().unwrap_or_else(PoisonError::into_inner).clear();
        self.healthy.store(false, Ordering::SeqCst);
    }
}

impl InMemoryBackplaneHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a new node whose inbound messages go to `sink`.
    pub fn node(&self, sink: BackplaneSink) -> InMemoryBackplane {
        let available = self.is_available();
        let state = Arc::new(NodeState {
            sink,
            desired: Mutex::new(HashSet::new()),
            active: Mutex::new(HashSet::new()),
            healthy: AtomicBool::new(available),
        });
        self.lock_nodes().push(Arc::downgrade(&state));
        InMemoryBackplane {
            hub: self.clone(),
            state,
        }
    }

    pub fn is_available(&self) -> bool {
        !self.inner.down.load(Ordering::SeqCst)
    }

    /// Simulates losing (`false`) or regaining (`true`) the backplane.
    pub fn set_available(&self, available: bool) {
        let was_available = !self.inner.down.swap(!available, Ordering::SeqCst);
        if was_available == available {
            return;
        }

        for node in self.live_nodes() {
            if available {
                node.resubscribe();
            } else {
                node.drop_subscriptions();
            }
        }

        if available {
            tracing::info!("In-memory backplane restored");
        } else {
            tracing::warn!("In-memory backplane taken down");
        }
    }

    /// Number of nodes currently routed messages for `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.live_nodes()
            .iter()
            .filter(|node| {
                node.active
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .contains(topic)
            })
            .count()
    }

    fn lock_nodes(&self) -> std::sync::MutexGuard<'_, Vec<Weak<NodeState>>> {
        self.inner.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn live_nodes(&self) -> Vec<Arc<NodeState>> {
        let mut nodes = self.lock_nodes();
        nodes.retain(|node| node.strong_count() > 0);
        nodes.iter().filter_map(Weak::upgrade).collect()
    }

    fn route(&self, topic: &str, payload: &str) -> usize {
        let mut delivered = 0;
        for node in self.live_nodes() {
            let subscribed = node
                .active
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(topic);
            if subscribed {
                let message = BackplaneMessage {
                    topic: topic.to_string(),
                    payload: payload.to_string(),
                };
                if node.sink.send(message).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }
}

/// One instance's view of an [`InMemoryBackplaneHub`].
pub struct InMemoryBackplane {
    hub: InMemoryBackplaneHub,
    state: Arc<NodeState>,
}

impl InMemoryBackplane {
    /// A hub with a single node, for single-instance deployments.
    pub fn standalone(sink: BackplaneSink) -> Self {
        InMemoryBackplaneHub::new().node(sink)
    }

    pub fn hub(&self) -> &InMemoryBackplaneHub {
        &self.hub
    }
}

#[async_trait]
impl Backplane for InMemoryBackplane {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BackplaneError> {
        if !self.hub.is_available() {
            return Err(BackplaneError::Unavailable("hub is down".to_string()));
        }
        let delivered = self.hub.route(topic, &payload);
        tracing::trace!(topic, delivered, "Published to in-memory backplane");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), BackplaneError> {
        self.state
            .desired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(topic.to_string());
        if self.hub.is_available() {
            self.state
                .active
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(topic.to_string());
        }
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), BackplaneError> {
        self.state
            .desired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(topic);
        self.state
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(topic);
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.state.healthy.load(Ordering::SeqCst)
    }

    fn name(&self) -> &'static str {
        "in-memory"
    }
}
