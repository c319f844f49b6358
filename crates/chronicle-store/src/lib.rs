//! Persistence core for the chronicle event store (`PostgreSQL`).
//!
//! This crate provides a durable, append-only store for immutable domain
//! events, organized per aggregate, with a globally ordered notification
//! log for cross-consumer delivery and per-consumer offset tracking for
//! exactly-once processing relative to a consumer's own writes.
//!
//! # Architecture
//!
//! ```text
//! Caller (per worker)
//!     |
//!     +-- Datastore::transaction() --> ConnectionPool (worker -> Connection)
//!     |       |
//!     |       +-- TransactionScope  (commit or rollback on every exit path)
//!     |
//!     +-- AggregateRecorder    (append-only events, optimistic concurrency)
//!         +-- ApplicationRecorder  (adds global notification sequence)
//!             +-- ProcessRecorder  (adds atomic consumer tracking)
//! ```
//!
//! # Modules
//!
//! - [`config`] -- Datastore connection configuration
//! - [`connection`] -- Per-worker connection and pool lifecycle
//! - [`datastore`] -- Transaction entry point and connection invalidation
//! - [`transaction`] -- Scoped transaction acquisition
//! - [`aggregate`] -- Append-only per-aggregate event recorder
//! - [`application`] -- Notification-sequence recorder layer
//! - [`process`] -- Consumer-tracking recorder layer
//! - [`factory`] -- Environment-driven construction of the above
//! - [`error`] -- Shared error types

pub mod aggregate;
pub mod application;
pub mod config;
pub mod connection;
pub mod datastore;
pub mod error;
pub mod factory;
pub mod process;
pub mod transaction;

// Re-export primary types for convenience.
pub use aggregate::AggregateRecorder;
pub use application::ApplicationRecorder;
pub use config::DatastoreConfig;
pub use connection::{Connection, ConnectionPool};
pub use datastore::Datastore;
pub use error::StoreError;
pub use factory::Factory;
pub use process::ProcessRecorder;
pub use transaction::TransactionScope;

pub use chronicle_types::{Notification, StoredEvent, Tracking, WorkerId};
