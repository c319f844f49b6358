//! Worker identity handle for connection affinity.
//!
//! The connection pool binds one physical database session to one
//! worker. Keying by an explicit handle (rather than ambient thread
//! identity) keeps the pool testable and lets executors that manage
//! their own workers pass handles through explicitly.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counter for worker id allocation.
static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

std::thread_local! {
    /// The worker id assigned to the current OS thread on first use.
    static CURRENT_WORKER: WorkerId =
        WorkerId(NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed));
}

/// An opaque handle identifying one execution worker.
///
/// Each worker owns at most one pooled database connection at a time,
/// so no locking is needed on the session itself beyond the guard the
/// transaction scope takes while it is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(u64);

impl WorkerId {
    /// Resolve the worker id for the calling thread.
    ///
    /// Ids are allocated lazily from a process-wide counter: the same
    /// thread always resolves the same id, and distinct threads always
    /// resolve distinct ids.
    pub fn current() -> Self {
        CURRENT_WORKER.with(|id| *id)
    }

    /// Construct a worker id from a raw value.
    ///
    /// Intended for executors that manage their own worker handles; raw
    /// ids share the pool's keyspace with thread-assigned ids.
    pub const fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// Return the raw id value.
    pub const fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
