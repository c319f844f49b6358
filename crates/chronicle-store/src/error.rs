//! Error types for the persistence core.
//!
//! The taxonomy deliberately distinguishes conflicts from everything
//! else: a [`StoreError::Conflict`] means the caller lost an optimistic
//! concurrency race and should re-read current state before retrying its
//! command, while operational failures are surfaced after the offending
//! worker's connection has been invalidated so the next call gets a
//! fresh session.

/// Errors that can occur in the persistence core.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A write violated a uniqueness invariant: either an aggregate's
    /// `(originator_id, originator_version)` pair or a consumer's
    /// `(application_name, notification_id)` tracking pair. Expected
    /// under concurrent writers.
    #[error("record conflict: a row with the same key already exists")]
    Conflict,

    /// Any other low-level database failure (connectivity loss,
    /// malformed statement, other constraints).
    #[error("operational database error: {0}")]
    Operational(#[from] sqlx::Error),

    /// The worker's connection was closed underneath an acquired scope,
    /// typically by the age-based expiry timer. The next operation on
    /// that worker transparently reconnects.
    #[error("connection is closed")]
    ConnectionClosed,

    /// Required settings missing or malformed at construction time.
    #[error("configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Map a write-path database error, classifying unique-constraint
    /// violations as conflicts.
    pub(crate) fn from_write(error: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_error) = &error {
            if db_error.is_unique_violation() {
                return Self::Conflict;
            }
        }
        Self::Operational(error)
    }

    /// Whether this error indicates a low-level storage failure that
    /// should invalidate the worker's connection.
    pub fn is_operational(&self) -> bool {
        matches!(self, Self::Operational(_) | Self::ConnectionClosed)
    }

    /// Whether this error is an optimistic-concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_is_not_operational() {
        assert!(StoreError::Conflict.is_conflict());
        assert!(!StoreError::Conflict.is_operational());
    }

    #[test]
    fn closed_connection_is_operational() {
        assert!(StoreError::ConnectionClosed.is_operational());
        assert!(!StoreError::ConnectionClosed.is_conflict());
    }

    #[test]
    fn non_database_errors_map_to_operational() {
        let err = StoreError::from_write(sqlx::Error::RowNotFound);
        assert!(err.is_operational());
    }

    #[test]
    fn config_error_displays_message() {
        let err = StoreError::Config(String::from("missing POSTGRES_DBNAME"));
        assert!(format!("{err}").contains("missing POSTGRES_DBNAME"));
    }
}
