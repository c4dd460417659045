//! Application layer - connection orchestration and fan-out.
//!
//! Ties the domain rules to the ports: the registry holds this instance's
//! connections, the broadcaster replicates room events over the backplane,
//! the pipeline dispatches client frames and the lifecycle controller drives
//! each socket from handshake to teardown.

pub mod fanout;
pub mod handlers;
pub mod lifecycle;
pub mod outbox;
pub mod pipeline;
pub mod registry;

pub use fanout::{room_topic, Broadcaster, PublishOutcome};
pub use handlers::{
    AnalyticsHandler, DomainHandler, HandlerOutcome, HandlerRegistry, InventoryHandler,
    KitchenHandler, OrderHandler,
};
pub use lifecycle::{ConnectionLifecycle, LifecycleConfig, SweepReport};
pub use pipeline::{Dispatched, EventPipeline, DEFAULT_ROOM_LEAVE_MESSAGE};
pub use outbox::{outbox, CloseSignal, Outbox, OutboxReceiver};
pub use registry::{ConnectionRegistry, RegistryStats};
