//! WebSocket adapter for real-time clients.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  text frames   ┌──────────────────────┐
//! │   client     │ ─────────────► │ ConnectionLifecycle  │ ─► EventPipeline ─► Broadcaster
//! │   socket     │ ◄───────────── │  (per-connection     │                        │
//! └──────────────┘    outbox      │   outbox)            │ ◄── ConnectionRegistry ◄┘
//!                                 └──────────────────────┘       (backplane receipt)
//! ```
//!
//! # Routes
//!
//! - `GET /ws` - upgrade; bearer token from header or `?token=`
//! - `GET /stats` - local registry statistics
//! - `GET /health` - backplane health (503 while degraded)

pub mod handler;

pub use handler::{
    bearer_token, close_code_for, health_handler, realtime_router, stats_handler, ws_handler,
    ConnectParams, HealthResponse, WebSocketState,
};
