//! Append-only per-aggregate event recorder.
//!
//! Events for one aggregate are stored under
//! `(originator_id, originator_version)` with a primary key on that
//! pair. The recorder performs no gap-filling or contiguity validation
//! on versions; assigning the next version is the caller's concern, and
//! a duplicate is the optimistic-concurrency signal.

use chronicle_types::{StoredEvent, WorkerId};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::datastore::Datastore;
use crate::error::StoreError;

/// A row from an events table.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EventRow {
    originator_id: Uuid,
    originator_version: i32,
    topic: String,
    state: Vec<u8>,
}

impl From<EventRow> for StoredEvent {
    fn from(row: EventRow) -> Self {
        Self {
            originator_id: row.originator_id,
            originator_version: row.originator_version,
            topic: row.topic,
            state: row.state,
        }
    }
}

/// Append-only event store for aggregates, with uniqueness-enforced
/// optimistic concurrency.
pub struct AggregateRecorder {
    datastore: Datastore,
    events_table: String,
    insert_events_sql: String,
    create_table_sql: Vec<String>,
}

impl AggregateRecorder {
    /// Create a recorder bound to the named events table.
    pub fn new(datastore: Datastore, events_table: &str) -> Self {
        Self {
            datastore,
            events_table: events_table.to_owned(),
            insert_events_sql: insert_events_statement(events_table),
            create_table_sql: vec![create_events_table_statement(events_table)],
        }
    }

    /// The events table this recorder writes to.
    pub fn events_table(&self) -> &str {
        &self.events_table
    }

    pub(crate) fn datastore(&self) -> &Datastore {
        &self.datastore
    }

    /// Idempotently ensure the backing table exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Operational`] if the DDL fails; the
    /// worker's connection is invalidated first.
    pub async fn create_schema(&self) -> Result<(), StoreError> {
        let worker = WorkerId::current();
        let result = self
            .datastore
            .execute_statements(worker, &self.create_table_sql)
            .await;
        self.datastore.surface(worker, result).await
    }

    /// Insert a batch of stored events atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if any row violates the
    /// `(originator_id, originator_version)` uniqueness invariant; the
    /// caller lost the race for that version and must re-read and retry
    /// its command against fresh state. Returns
    /// [`StoreError::Operational`] for any other failure, after
    /// invalidating the worker's connection. Either the whole batch
    /// commits or none of it does.
    pub async fn insert_events(&self, stored_events: &[StoredEvent]) -> Result<(), StoreError> {
        let worker = WorkerId::current();
        let result = self.insert_events_for(worker, stored_events).await;
        self.datastore.surface(worker, result).await
    }

    async fn insert_events_for(
        &self,
        worker: WorkerId,
        stored_events: &[StoredEvent],
    ) -> Result<(), StoreError> {
        let mut scope = self.datastore.transaction_for(worker).await?;
        let mut tx = scope.begin().await?;
        self.insert_rows(&mut tx, stored_events).await?;
        tx.commit().await.map_err(StoreError::from_write)?;
        Ok(())
    }

    /// Insert event rows within an already-open transaction. Shared
    /// with the tracking layer so a consumer's checkpoint and its
    /// produced events commit or roll back together.
    pub(crate) async fn insert_rows(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        stored_events: &[StoredEvent],
    ) -> Result<(), StoreError> {
        if stored_events.is_empty() {
            return Ok(());
        }
        let len = stored_events.len();
        let mut originator_ids = Vec::with_capacity(len);
        let mut originator_versions = Vec::with_capacity(len);
        let mut topics = Vec::with_capacity(len);
        let mut states = Vec::with_capacity(len);
        for event in stored_events {
            originator_ids.push(event.originator_id);
            originator_versions.push(event.originator_version);
            topics.push(event.topic.clone());
            states.push(event.state.clone());
        }

        // Multi-row INSERT using UNNEST: one round-trip per batch.
        sqlx::query(&self.insert_events_sql)
            .bind(&originator_ids)
            .bind(&originator_versions)
            .bind(&topics)
            .bind(&states)
            .execute(&mut **tx)
            .await
            .map_err(StoreError::from_write)?;

        tracing::debug!(
            table = self.events_table.as_str(),
            count = len,
            "inserted stored events"
        );
        Ok(())
    }

    /// Select stored events for one aggregate, filtered by version
    /// bounds, ordered by version (ascending unless `desc`), optionally
    /// capped.
    ///
    /// Returns an empty list when nothing matches.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Operational`] on any query failure, after
    /// invalidating the worker's connection.
    pub async fn select_events(
        &self,
        originator_id: Uuid,
        gt: Option<i32>,
        lte: Option<i32>,
        desc: bool,
        limit: Option<i64>,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        let worker = WorkerId::current();
        let result = self
            .select_events_for(worker, originator_id, gt, lte, desc, limit)
            .await;
        self.datastore.surface(worker, result).await
    }

    async fn select_events_for(
        &self,
        worker: WorkerId,
        originator_id: Uuid,
        gt: Option<i32>,
        lte: Option<i32>,
        desc: bool,
        limit: Option<i64>,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        let sql = self.select_events_statement(gt.is_some(), lte.is_some(), desc, limit.is_some());
        let mut query = sqlx::query_as::<_, EventRow>(&sql).bind(originator_id);
        if let Some(gt) = gt {
            query = query.bind(gt);
        }
        if let Some(lte) = lte {
            query = query.bind(lte);
        }
        if let Some(limit) = limit {
            query = query.bind(limit);
        }

        let mut scope = self.datastore.transaction_for(worker).await?;
        let mut tx = scope.begin().await?;
        let rows = query.fetch_all(&mut *tx).await?;
        tx.commit().await?;
        Ok(rows.into_iter().map(StoredEvent::from).collect())
    }

    /// Assemble the SELECT statement for the given filter shape, with
    /// sequentially numbered bind positions.
    fn select_events_statement(&self, gt: bool, lte: bool, desc: bool, limit: bool) -> String {
        let mut sql = format!(
            "SELECT originator_id, originator_version, topic, state \
             FROM {} WHERE originator_id = $1",
            self.events_table
        );
        let mut position = 2;
        if gt {
            sql.push_str(&format!(" AND originator_version > ${position}"));
            position += 1;
        }
        if lte {
            sql.push_str(&format!(" AND originator_version <= ${position}"));
            position += 1;
        }
        sql.push_str(" ORDER BY originator_version ");
        sql.push_str(if desc { "DESC" } else { "ASC" });
        if limit {
            sql.push_str(&format!(" LIMIT ${position}"));
        }
        sql
    }
}

/// Build the UNNEST-based batch insert statement for an events table.
pub(crate) fn insert_events_statement(events_table: &str) -> String {
    format!(
        "INSERT INTO {events_table} (originator_id, originator_version, topic, state) \
         SELECT * FROM UNNEST($1::uuid[], $2::integer[], $3::text[], $4::bytea[])"
    )
}

/// Build the CREATE TABLE statement for a plain aggregate events table.
fn create_events_table_statement(events_table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {events_table} (\
         originator_id uuid NOT NULL, \
         originator_version integer NOT NULL, \
         topic text, \
         state bytea, \
         PRIMARY KEY (originator_id, originator_version))"
    )
}
