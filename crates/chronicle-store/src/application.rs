//! Notification-sequence recorder layer.
//!
//! Extends the aggregate recorder's schema with a database-assigned
//! `notification_id` column (BIGSERIAL, uniquely indexed) so every
//! stored event is also a [`Notification`] in a globally ordered log.
//! Ids are assigned at commit time and are monotonic for committed
//! rows; ids reserved by rolled-back transactions are never reused and
//! leave permanent gaps that consumers must tolerate.

use chronicle_types::{Notification, StoredEvent, WorkerId};
use uuid::Uuid;

use crate::aggregate::AggregateRecorder;
use crate::datastore::Datastore;
use crate::error::StoreError;

/// A row from an events table carrying its notification id.
#[derive(Debug, sqlx::FromRow)]
struct NotificationRow {
    notification_id: i64,
    originator_id: Uuid,
    originator_version: i32,
    topic: String,
    state: Vec<u8>,
}

impl From<NotificationRow> for Notification {
    fn from(row: NotificationRow) -> Self {
        Self {
            id: row.notification_id,
            originator_id: row.originator_id,
            originator_version: row.originator_version,
            topic: row.topic,
            state: row.state,
        }
    }
}

/// Aggregate recorder extended with a strictly-ordered global
/// notification sequence over all stored events.
pub struct ApplicationRecorder {
    base: AggregateRecorder,
    create_table_sql: Vec<String>,
    select_notifications_sql: String,
    max_notification_id_sql: String,
}

impl ApplicationRecorder {
    /// Create a recorder bound to the named events table.
    pub fn new(datastore: Datastore, events_table: &str) -> Self {
        Self {
            base: AggregateRecorder::new(datastore, events_table),
            create_table_sql: create_statements(events_table),
            select_notifications_sql: format!(
                "SELECT notification_id, originator_id, originator_version, topic, state \
                 FROM {events_table} WHERE notification_id >= $1 \
                 ORDER BY notification_id LIMIT $2"
            ),
            max_notification_id_sql: format!(
                "SELECT MAX(notification_id) FROM {events_table}"
            ),
        }
    }

    /// The events table this recorder writes to.
    pub fn events_table(&self) -> &str {
        self.base.events_table()
    }

    pub(crate) fn datastore(&self) -> &Datastore {
        self.base.datastore()
    }

    pub(crate) fn create_statements(&self) -> &[String] {
        &self.create_table_sql
    }

    pub(crate) fn base(&self) -> &AggregateRecorder {
        &self.base
    }

    /// Idempotently ensure the backing table and notification index
    /// exist.
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

    /// Insert a batch of stored events atomically. Notification ids are
    /// assigned by the database and are not caller-controlled.
    ///
    /// # Errors
    ///
    /// See [`AggregateRecorder::insert_events`].
    pub async fn insert_events(&self, stored_events: &[StoredEvent]) -> Result<(), StoreError> {
        self.base.insert_events(stored_events).await
    }

    /// Select stored events for one aggregate. See
    /// [`AggregateRecorder::select_events`].
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

    /// Return notifications with `id >= start`, ascending by id, capped
    /// at `limit`. Consumers page forward with
    /// `start = last_received_id + 1`; gaps are possible, omissions of
    /// committed ids are not.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Operational`] on any query failure, after
    /// invalidating the worker's connection.
    pub async fn select_notifications(
        &self,
        start: i64,
        limit: i64,
    ) -> Result<Vec<Notification>, StoreError> {
        let worker = WorkerId::current();
        let result = self.select_notifications_for(worker, start, limit).await;
        self.datastore().surface(worker, result).await
    }

    async fn select_notifications_for(
        &self,
        worker: WorkerId,
        start: i64,
        limit: i64,
    ) -> Result<Vec<Notification>, StoreError> {
        let mut scope = self.datastore().transaction_for(worker).await?;
        let mut tx = scope.begin().await?;
        let rows = sqlx::query_as::<_, NotificationRow>(&self.select_notifications_sql)
            .bind(start)
            .bind(limit)
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(rows.into_iter().map(Notification::from).collect())
    }

    /// Return the highest committed notification id, or 0 if the store
    /// is empty.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Operational`] on any query failure, after
    /// invalidating the worker's connection.
    pub async fn max_notification_id(&self) -> Result<i64, StoreError> {
        let worker = WorkerId::current();
        let result = self.max_notification_id_for(worker).await;
        self.datastore().surface(worker, result).await
    }

    async fn max_notification_id_for(&self, worker: WorkerId) -> Result<i64, StoreError> {
        let mut scope = self.datastore().transaction_for(worker).await?;
        let mut tx = scope.begin().await?;
        let row: (Option<i64>,) = sqlx::query_as(&self.max_notification_id_sql)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(row.0.unwrap_or(0))
    }
}

/// Build the schema statements for an events table that carries the
/// notification sequence.
pub(crate) fn create_statements(events_table: &str) -> Vec<String> {
    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {events_table} (\
             originator_id uuid NOT NULL, \
             originator_version integer NOT NULL, \
             topic text, \
             state bytea, \
             notification_id bigserial, \
             PRIMARY KEY (originator_id, originator_version))"
        ),
        format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {events_table}_notification_id_idx \
             ON {events_table} (notification_id ASC)"
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::insert_events_statement;
    use crate::config::DatastoreConfig;

    fn recorder() -> ApplicationRecorder {
        let config = DatastoreConfig::new("localhost", 5432, "db", "user", "pw");
        ApplicationRecorder::new(Datastore::new(&config), "myapp_events")
    }

    #[test]
    fn schema_adds_serial_column_and_unique_index() {
        let statements = create_statements("myapp_events");
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("notification_id bigserial"));
        assert!(statements[1].contains("UNIQUE INDEX IF NOT EXISTS myapp_events_notification_id_idx"));
    }

    #[test]
    fn notifications_query_pages_forward_by_id() {
        let recorder = recorder();
        assert_eq!(
            recorder.select_notifications_sql,
            "SELECT notification_id, originator_id, originator_version, topic, state \
             FROM myapp_events WHERE notification_id >= $1 \
             ORDER BY notification_id LIMIT $2"
        );
    }

    #[test]
    fn insert_statement_leaves_notification_id_to_the_database() {
        // The insert path names its columns explicitly, so the serial
        // column is always database-assigned.
        let sql = insert_events_statement("myapp_events");
        assert!(sql.contains("(originator_id, originator_version, topic, state)"));
        assert!(!sql.contains("notification_id"));
    }

    #[test]
    fn max_notification_id_query_shape() {
        let recorder = recorder();
        assert_eq!(
            recorder.max_notification_id_sql,
            "SELECT MAX(notification_id) FROM myapp_events"
        );
    }
}
