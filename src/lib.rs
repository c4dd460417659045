//! POS Realtime - Multi-tenant real-time event distribution
//!
//! This crate pushes domain events (orders, kitchen tickets, inventory,
//! analytics) to connected point-of-sale, kitchen display and dashboard
//! clients. Clients only ever receive events for the tenant, outlet or user
//! rooms they are authorized for, and broadcasts are replicated across
//! stateless server instances through a shared pub/sub backplane.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
