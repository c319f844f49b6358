//! Per-worker connection and pool lifecycle.
//!
//! Each worker owns at most one physical database session. The pool
//! maps [`WorkerId`] to [`Connection`] and is the only structure mutated
//! by multiple callers; connections themselves are never shared across
//! workers, so the session needs no locking beyond the guard a
//! transaction scope holds while it is active.
//!
//! A connection created with a `max_age` arms an expiry timer on a
//! separate task. When the timer fires it must never sever the session
//! mid-transaction without at least attempting to wait: it marks the
//! connection closing, waits for the idle signal (bounded by an optional
//! timeout), and only then performs the physical close. The owning
//! worker discovers a closed connection on its next operation and
//! transparently reconnects through the pool.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chronicle_types::WorkerId;
use sqlx::Connection as SqlxConnection;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use tokio::sync::watch;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::config::DatastoreConfig;
use crate::error::StoreError;

/// Exclusive handle on a connection's underlying session.
///
/// `None` once the connection has been physically closed.
pub(crate) type SessionGuard = OwnedMutexGuard<Option<PgConnection>>;

/// One physical database session bound to one worker.
#[derive(Debug)]
pub struct Connection {
    session: Arc<AsyncMutex<Option<PgConnection>>>,
    /// `true` while no transaction scope is active on this connection.
    idle: watch::Sender<bool>,
    /// Latched once teardown has begun; the pool treats the connection
    /// as unusable from that point on.
    closing: watch::Sender<bool>,
    closed: AtomicBool,
}

impl Connection {
    /// Wrap a freshly opened session, arming the expiry timer when a
    /// maximum age is configured.
    pub(crate) fn new(session: PgConnection, max_age: Option<Duration>) -> Arc<Self> {
        let (idle, _) = watch::channel(true);
        let (closing, _) = watch::channel(false);
        let connection = Arc::new(Self {
            session: Arc::new(AsyncMutex::new(Some(session))),
            idle,
            closing,
            closed: AtomicBool::new(false),
        });
        if let Some(max_age) = max_age {
            let timer_handle = Arc::clone(&connection);
            let mut closing_rx = connection.closing.subscribe();
            tokio::spawn(async move {
                tokio::select! {
                    () = tokio::time::sleep(max_age) => {
                        tracing::debug!(max_age_secs = max_age.as_secs_f64(),
                            "connection reached max age; closing");
                        timer_handle.close(None).await;
                    }
                    () = async {
                        let _ = closing_rx.wait_for(|closing| *closing).await;
                    } => {}
                }
            });
        }
        connection
    }

    /// Whether teardown has begun.
    pub fn is_closing(&self) -> bool {
        *self.closing.borrow()
    }

    /// Whether the session has been (logically) closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the connection as having an active transaction scope.
    pub(crate) fn mark_in_use(&self) {
        self.idle.send_replace(false);
    }

    /// Mark the connection idle again. Called from the transaction
    /// scope's drop on every exit path.
    pub(crate) fn mark_idle(&self) {
        self.idle.send_replace(true);
    }

    /// Take the exclusive session guard for a transaction scope.
    pub(crate) async fn lock_session(&self) -> SessionGuard {
        Arc::clone(&self.session).lock_owned().await
    }

    /// Issue a trivial round-trip query to check the session is alive.
    pub(crate) async fn probe(&self) -> bool {
        let mut guard = self.session.lock().await;
        match guard.as_mut() {
            Some(session) => session.ping().await.is_ok(),
            None => false,
        }
    }

    /// Close the connection, waiting up to `timeout` for the current
    /// transaction to finish first.
    ///
    /// Idempotent; later calls return immediately. With no timeout the
    /// wait for idle is unbounded, so a worker must never call this
    /// while it still holds an open scope on the same connection. If
    /// the timeout elapses before the connection becomes idle, it is
    /// marked closed immediately and the physical close is deferred to
    /// a detached task that runs as soon as the in-flight scope
    /// releases the session.
    pub async fn close(&self, timeout: Option<Duration>) {
        if self.closing.send_replace(true) {
            return;
        }
        let mut idle_rx = self.idle.subscribe();
        let wait_for_idle = async {
            let _ = idle_rx.wait_for(|idle| *idle).await;
        };
        let became_idle = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, wait_for_idle).await.is_ok(),
            None => {
                wait_for_idle.await;
                true
            }
        };
        self.closed.store(true, Ordering::Release);
        if became_idle {
            if let Some(session) = self.session.lock().await.take() {
                if let Err(error) = session.close().await {
                    tracing::debug!(%error, "error closing database session");
                }
            }
        } else {
            tracing::warn!("timed out waiting for idle; deferring physical close");
            let session = Arc::clone(&self.session);
            tokio::spawn(async move {
                if let Some(session) = session.lock().await.take() {
                    let _ = session.close().await;
                }
            });
        }
    }
}

/// Maps worker identity to its [`Connection`]; creates, validates, and
/// recycles connections, and closes all of them on shutdown.
#[derive(Debug)]
pub struct ConnectionPool {
    options: PgConnectOptions,
    max_age: Option<Duration>,
    pre_ping: bool,
    connections: Mutex<HashMap<WorkerId, Arc<Connection>>>,
}

impl ConnectionPool {
    /// Create a pool from datastore configuration. No connection is
    /// opened until a worker first acquires one.
    pub fn new(config: &DatastoreConfig) -> Self {
        Self {
            options: config.connect_options(),
            max_age: config.conn_max_age,
            pre_ping: config.pre_ping,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve the worker's connection, creating a fresh one on first
    /// use or when the stored connection is closing or closed.
    ///
    /// With the liveness probe enabled, a reused connection is pinged
    /// first and recreated on failure; probe failures are operational,
    /// never conflicts.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Operational`] if opening a session fails.
    pub async fn acquire(&self, worker: WorkerId) -> Result<Arc<Connection>, StoreError> {
        let existing = self.lock_map().get(&worker).cloned();
        if let Some(connection) = existing {
            if !connection.is_closing() && !connection.is_closed() {
                if !self.pre_ping {
                    return Ok(connection);
                }
                if connection.probe().await {
                    return Ok(connection);
                }
                tracing::debug!(%worker, "liveness probe failed; recreating connection");
            }
        }
        self.create(worker).await
    }

    /// Remove and close a specific worker's connection. Used for fast
    /// invalidation after an operational error.
    pub async fn release(&self, worker: WorkerId) {
        let removed = self.lock_map().remove(&worker);
        if let Some(connection) = removed {
            connection.close(None).await;
        }
    }

    /// Close every pooled connection, waiting up to `timeout` for each
    /// to become idle first.
    pub async fn close_all(&self, timeout: Option<Duration>) {
        let drained: Vec<Arc<Connection>> = self.lock_map().drain().map(|(_, c)| c).collect();
        for connection in drained {
            connection.close(timeout).await;
        }
        tracing::debug!("connection pool closed");
    }

    /// Number of currently pooled connections.
    pub fn len(&self) -> usize {
        self.lock_map().len()
    }

    /// Whether the pool currently holds no connections.
    pub fn is_empty(&self) -> bool {
        self.lock_map().is_empty()
    }

    async fn create(&self, worker: WorkerId) -> Result<Arc<Connection>, StoreError> {
        let session = PgConnection::connect_with(&self.options).await?;
        let connection = Connection::new(session, self.max_age);
        tracing::debug!(%worker, "opened database connection");
        let replaced = self
            .lock_map()
            .insert(worker, Arc::clone(&connection));
        if let Some(old) = replaced {
            // A stale entry (expired or probe failure). It is idle by
            // construction, so this completes promptly.
            tokio::spawn(async move { old.close(None).await });
        }
        Ok(connection)
    }

    fn lock_map(&self) -> std::sync::MutexGuard<'_, HashMap<WorkerId, Arc<Connection>>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_pool_is_empty() {
        let config = DatastoreConfig::new("localhost", 5432, "db", "user", "pw");
        let pool = ConnectionPool::new(&config);
        assert!(pool.is_empty());
        assert_eq!(pool.len(), 0);
    }

    #[tokio::test]
    async fn release_of_unknown_worker_is_a_no_op() {
        let config = DatastoreConfig::new("localhost", 5432, "db", "user", "pw");
        let pool = ConnectionPool::new(&config);
        pool.release(WorkerId::from_raw(7)).await;
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn close_all_on_empty_pool_is_a_no_op() {
        let config = DatastoreConfig::new("localhost", 5432, "db", "user", "pw");
        let pool = ConnectionPool::new(&config);
        pool.close_all(Some(Duration::from_millis(10))).await;
        assert!(pool.is_empty());
    }
}
