//! Consumer-tracking recorder layer.
//!
//! Extends the application recorder with a tracking table keyed by
//! `(application_name, notification_id)`. A consumer records the
//! events it produced in response to a notification and its checkpoint
//! for that notification in one transaction: if the checkpoint insert
//! collides (the notification was already processed), the whole
//! transaction rolls back and none of the paired events become
//! visible. This is exactly-once relative to the consumer's own
//! writes.

use chronicle_types::{Notification, StoredEvent, Tracking, WorkerId};
use uuid::Uuid;

use crate::application::{ApplicationRecorder, create_statements};
use crate::datastore::Datastore;
use crate::error::StoreError;

/// Application recorder extended with atomic per-consumer offset
/// tracking.
pub struct ProcessRecorder {
    base: ApplicationRecorder,
    tracking_table: String,
    create_table_sql: Vec<String>,
    insert_tracking_sql: String,
    max_tracking_id_sql: String,
}

impl ProcessRecorder {
    /// Create a recorder bound to the named events and tracking tables.
    pub fn new(datastore: Datastore, events_table: &str, tracking_table: &str) -> Self {
        let mut create_table_sql = create_statements(events_table);
        create_table_sql.push(create_tracking_table_statement(tracking_table));
        Self {
            base: ApplicationRecorder::new(datastore, events_table),
            tracking_table: tracking_table.to_owned(),
            create_table_sql,
            insert_tracking_sql: format!(
                "INSERT INTO {tracking_table} (application_name, notification_id) \
                 VALUES ($1, $2)"
            ),
            max_tracking_id_sql: format!(
                "SELECT MAX(notification_id) FROM {tracking_table} \
                 WHERE application_name = $1"
            ),
        }
    }

    /// The events table this recorder writes to.
    pub fn events_table(&self) -> &str {
        self.base.events_table()
    }

    /// The tracking table this recorder checkpoints into.
    pub fn tracking_table(&self) -> &str {
        &self.tracking_table
    }

    fn datastore(&self) -> &Datastore {
        self.base.datastore()
    }

    /// Idempotently ensure the events table, notification index, and
    /// tracking table exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Operational`] if the DDL fails; the
    /// worker's connection is invalidated first.
    pub async fn create_schema(&self) -> Result<(), StoreError> {
        let worker = WorkerId::current();
        let result = self
            .datastore()
            .execute_statements(worker, &self.create_table_sql)
            .await;
        self.datastore().surface(worker, result).await
    }

    /// Insert a batch of stored events, optionally together with the
    /// consumer's tracking checkpoint, in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if an event row violates the
    /// version uniqueness invariant, or if the tracking pair was
    /// already recorded, in which case the events roll back with it
    /// and none become visible. Returns [`StoreError::Operational`]
    /// for any other failure, after invalidating the worker's
    /// connection.
    pub async fn insert_events(
        &self,
        stored_events: &[StoredEvent],
        tracking: Option<&Tracking>,
    ) -> Result<(), StoreError> {
        let worker = WorkerId::current();
        let result = self.insert_events_for(worker, stored_events, tracking).await;
        self.datastore().surface(worker, result).await
    }

    async fn insert_events_for(
        &self,
        worker: WorkerId,
        stored_events: &[StoredEvent],
        tracking: Option<&Tracking>,
    ) -> Result<(), StoreError> {
        let mut scope = self.datastore().transaction_for(worker).await?;
        let mut tx = scope.begin().await?;
        self.base.base().insert_rows(&mut tx, stored_events).await?;
        if let Some(tracking) = tracking {
            sqlx::query(&self.insert_tracking_sql)
                .bind(&tracking.application_name)
                .bind(tracking.notification_id)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::from_write)?;
            tracing::debug!(
                application = tracking.application_name.as_str(),
                notification_id = tracking.notification_id,
                "recorded tracking checkpoint"
            );
        }
        tx.commit().await.map_err(StoreError::from_write)?;
        Ok(())
    }

    /// Select stored events for one aggregate. See
    /// [`crate::AggregateRecorder::select_events`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Operational`] on any query failure.
    pub async fn select_events(
        &self,
        originator_id: Uuid,
        gt: Option<i32>,
        lte: Option<i32>,
        desc: bool,
        limit: Option<i64>,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        self.base
            .select_events(originator_id, gt, lte, desc, limit)
            .await
    }

    /// Page the notification log. See
    /// [`ApplicationRecorder::select_notifications`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Operational`] on any query failure.
    pub async fn select_notifications(
        &self,
        start: i64,
        limit: i64,
    ) -> Result<Vec<Notification>, StoreError> {
        self.base.select_notifications(start, limit).await
    }

    /// Return the highest committed notification id, or 0. See
    /// [`ApplicationRecorder::max_notification_id`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Operational`] on any query failure.
    pub async fn max_notification_id(&self) -> Result<i64, StoreError> {
        self.base.max_notification_id().await
    }

    /// Return the highest notification id this application has durably
    /// recorded, or 0 for an unseen application. This is the resume
    /// point for a restarting consumer.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Operational`] on any query failure, after
    /// invalidating the worker's connection.
    pub async fn max_tracking_id(&self, application_name: &str) -> Result<i64, StoreError> {
        let worker = WorkerId::current();
        let result = self.max_tracking_id_for(worker, application_name).await;
        self.datastore().surface(worker, result).await
    }

    async fn max_tracking_id_for(
        &self,
        worker: WorkerId,
        application_name: &str,
    ) -> Result<i64, StoreError> {
        let mut scope = self.datastore().transaction_for(worker).await?;
        let mut tx = scope.begin().await?;
        let row: (Option<i64>,) = sqlx::query_as(&self.max_tracking_id_sql)
            .bind(application_name)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(row.0.unwrap_or(0))
    }
}

/// Build the CREATE TABLE statement for a tracking table.
fn create_tracking_table_statement(tracking_table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {tracking_table} (\
         application_name text, \
         notification_id bigint, \
         PRIMARY KEY (application_name, notification_id))"
    )
}
