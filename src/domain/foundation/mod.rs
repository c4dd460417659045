//! Foundation module - Shared domain primitives.
//!
//! Contains value objects, identifiers, authentication types and error
//! types that form the vocabulary of the real-time core.

mod auth;
mod errors;
mod ids;
mod state_machine;
mod timestamp;

pub use auth::{AuthError, Identity, Role};
pub use errors::{DomainError, ErrorCode, ValidationError};
pub use ids::{ConnectionId, OutletId, TenantId, UserId};
pub use state_machine::StateMachine;
pub use timestamp::Timestamp;
