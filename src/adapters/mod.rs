//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the application to external systems:
//! - `auth` - Token verifiers (shared-secret JWT, mock)
//! - `backplane` - Cross-instance pub/sub (Redis, in-memory)
//! - `websocket` - Axum transport for clients

pub mod auth;
pub mod backplane;
pub mod websocket;

pub use auth::{JwtConfig, JwtTokenVerifier, MockTokenVerifier};
pub use backplane::{InMemoryBackplane, InMemoryBackplaneHub, RedisBackplane, RedisBackplaneConfig};
pub use websocket::{realtime_router, WebSocketState};
