//! Transaction entry point and connection invalidation.
//!
//! A [`Datastore`] owns the connection pool and hands out
//! [`TransactionScope`]s. Recorders funnel every operation through it:
//! acquire a scope, run statements, commit or roll back, and on an
//! operational failure invalidate the worker's connection so the next
//! call gets a fresh session.

use std::sync::Arc;
use std::time::Duration;

use chronicle_types::WorkerId;

use crate::config::DatastoreConfig;
use crate::connection::ConnectionPool;
use crate::error::StoreError;
use crate::transaction::TransactionScope;

/// Handle to the database, cheap to clone and share between recorders.
#[derive(Clone, Debug)]
pub struct Datastore {
    pool: Arc<ConnectionPool>,
}

impl Datastore {
    /// Create a datastore from configuration. No connection is opened
    /// until the first transaction.
    pub fn new(config: &DatastoreConfig) -> Self {
        Self {
            pool: Arc::new(ConnectionPool::new(config)),
        }
    }

    /// Open a transaction scope on the calling worker's connection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Operational`] if a session cannot be
    /// opened.
    pub async fn transaction(&self) -> Result<TransactionScope, StoreError> {
        self.transaction_for(WorkerId::current()).await
    }

    /// Open a transaction scope on a specific worker's connection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Operational`] if a session cannot be
    /// opened.
    pub async fn transaction_for(&self, worker: WorkerId) -> Result<TransactionScope, StoreError> {
        let connection = self.pool.acquire(worker).await?;
        let session = connection.lock_session().await;
        connection.mark_in_use();
        Ok(TransactionScope::new(connection, session))
    }

    /// Remove and close the calling worker's connection.
    pub async fn close_connection(&self) {
        self.pool.release(WorkerId::current()).await;
    }

    /// Close every pooled connection, waiting up to `timeout` for each
    /// to become idle first.
    pub async fn close_all_connections(&self, timeout: Option<Duration>) {
        self.pool.close_all(timeout).await;
    }

    /// Access the underlying pool.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Surface a recorder result, invalidating the worker's connection
    /// first when the failure is operational. Conflicts leave the
    /// connection alone: the session is healthy, the caller just lost a
    /// race.
    pub(crate) async fn surface<T>(
        &self,
        worker: WorkerId,
        result: Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        if let Err(error) = &result {
            if error.is_operational() {
                tracing::debug!(%worker, %error, "invalidating connection after operational failure");
                self.pool.release(worker).await;
            }
        }
        result
    }

    /// Run a batch of DDL statements in one transaction on the given
    /// worker's connection.
    pub(crate) async fn execute_statements(
        &self,
        worker: WorkerId,
        statements: &[String],
    ) -> Result<(), StoreError> {
        let mut scope = self.transaction_for(worker).await?;
        let mut tx = scope.begin().await?;
        for statement in statements {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
