//! Domain layer containing business rules and domain types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (IDs, timestamps, identity, errors)
//! - `realtime` - Rooms, room authorization, connections and event vocabulary

pub mod foundation;
pub mod realtime;
