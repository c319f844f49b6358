//! Scoped transaction acquisition.
//!
//! A [`TransactionScope`] holds exclusive access to one worker's
//! session for the duration of one database transaction. The inner
//! [`sqlx::Transaction`] guarantees exactly one of commit/rollback on
//! every exit path (an uncommitted transaction rolls back when
//! dropped), and the scope's own drop restores the connection's idle
//! signal so the expiry timer can proceed with teardown.

use std::sync::Arc;

use sqlx::Connection as SqlxConnection;
use sqlx::{Postgres, Transaction};

use crate::connection::{Connection, SessionGuard};
use crate::error::StoreError;

/// Exclusive, single-transaction access to a pooled connection.
///
/// Obtained from [`crate::Datastore::transaction`]. Call [`begin`] to
/// start the database transaction, run statements against it, then
/// commit it; dropping it instead rolls back.
///
/// [`begin`]: TransactionScope::begin
pub struct TransactionScope {
    connection: Arc<Connection>,
    session: SessionGuard,
    entered: bool,
}

impl TransactionScope {
    pub(crate) fn new(connection: Arc<Connection>, session: SessionGuard) -> Self {
        Self {
            connection,
            session,
            entered: false,
        }
    }

    /// Start the database transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConnectionClosed`] if the session was
    /// closed underneath the scope (the expiry timer force-closed it),
    /// or [`StoreError::Operational`] if the BEGIN itself fails.
    pub async fn begin(&mut self) -> Result<Transaction<'_, Postgres>, StoreError> {
        self.entered = true;
        let session = self.session.as_mut().ok_or(StoreError::ConnectionClosed)?;
        Ok(session.begin().await?)
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        // A scope that allocated a connection but never ran anything is
        // a caller defect worth surfacing, though not an error path.
        if !self.entered {
            tracing::warn!("transaction scope was dropped without being entered");
        }
        self.connection.mark_idle();
    }
}
