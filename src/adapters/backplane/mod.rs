//! Backplane adapters.
//!
//! Implementations of the `Backplane` port:
//!
//! - `in_memory` - Process-local hub for single-instance deployments and tests
//! - `redis` - Redis pub/sub for multi-instance deployments

mod in_memory;
mod redis;

pub use in_memory::{InMemoryBackplane, InMemoryBackplaneHub};
pub use self::redis::{RedisBackplane, RedisBackplaneConfig};
