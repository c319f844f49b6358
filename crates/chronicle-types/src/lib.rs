//! Shared type definitions for the chronicle event store.
//!
//! This crate is the single source of truth for the records exchanged
//! between the persistence core and its callers: stored events, event
//! notifications, consumer tracking checkpoints, and the worker handle
//! that keys pooled database connections.
//!
//! # Modules
//!
//! - [`records`] -- Immutable storage records (events, notifications, tracking)
//! - [`worker`] -- Worker identity handle for connection affinity

pub mod records;
pub mod worker;

// Re-export all public types at crate root for convenience.
pub use records::{Notification, StoredEvent, Tracking};
pub use worker::WorkerId;
