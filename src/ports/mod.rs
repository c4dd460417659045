//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the real-time core and the outside world. Adapters implement these ports.
//!
//! - `TokenVerifier` - Identity token verification (external auth service)
//! - `Backplane` - Cross-instance publish/subscribe transport

mod backplane;
mod token_verifier;

pub use backplane::{
    Backplane, BackplaneError, BackplaneMessage, BackplaneSink, ExponentialBackoff, InstanceId,
};
pub use token_verifier::TokenVerifier;
