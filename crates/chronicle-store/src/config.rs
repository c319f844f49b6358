//! Datastore connection configuration.
//!
//! Carries the settings needed to open physical sessions plus the two
//! pool policies: an optional age-based expiry for pooled connections
//! and an optional liveness probe before reuse.

use std::time::Duration;

use sqlx::postgres::PgConnectOptions;

/// Default `PostgreSQL` port.
pub const DEFAULT_PORT: u16 = 5432;

/// Configuration for a [`crate::Datastore`].
#[derive(Debug, Clone)]
pub struct DatastoreConfig {
    /// Database host.
    pub host: String,
    /// Database port.
    pub port: u16,
    /// Database name.
    pub dbname: String,
    /// Database user.
    pub user: String,
    /// Database password.
    pub password: String,
    /// Maximum age of a pooled connection before its expiry timer closes
    /// it. `None` means connections never expire.
    pub conn_max_age: Option<Duration>,
    /// Whether to issue a trivial round-trip query before reusing a
    /// pooled connection, recreating it on failure.
    pub pre_ping: bool,
}

impl DatastoreConfig {
    /// Create a configuration with no connection expiry and no liveness
    /// probe.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        dbname: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            dbname: dbname.into(),
            user: user.into(),
            password: password.into(),
            conn_max_age: None,
            pre_ping: false,
        }
    }

    /// Set the maximum connection age.
    #[must_use]
    pub const fn with_conn_max_age(mut self, max_age: Duration) -> Self {
        self.conn_max_age = Some(max_age);
        self
    }

    /// Enable or disable the liveness probe before connection reuse.
    #[must_use]
    pub const fn with_pre_ping(mut self, pre_ping: bool) -> Self {
        self.pre_ping = pre_ping;
        self
    }

    /// Build the driver-level connect options.
    pub(crate) fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.dbname)
            .username(&self.user)
            .password(&self.password)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_disable_expiry_and_probe() {
        let config = DatastoreConfig::new("localhost", DEFAULT_PORT, "db", "user", "pw");
        assert!(config.conn_max_age.is_none());
        assert!(!config.pre_ping);
    }

    #[test]
    fn builder_methods_apply() {
        let config = DatastoreConfig::new("localhost", 5433, "db", "user", "pw")
            .with_conn_max_age(Duration::from_secs(30))
            .with_pre_ping(true);
        assert_eq!(config.conn_max_age, Some(Duration::from_secs(30)));
        assert!(config.pre_ping);
        assert_eq!(config.port, 5433);
    }
}
