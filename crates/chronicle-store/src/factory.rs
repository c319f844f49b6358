//! Environment-driven construction of datastores and recorders.
//!
//! The factory reads recognized settings from an environment map,
//! failing fast with [`StoreError::Config`] when required settings are
//! absent or malformed, and hands out recorders bound to table names
//! derived from the application name and a purpose suffix.

use std::collections::HashMap;
use std::time::Duration;

use crate::aggregate::AggregateRecorder;
use crate::application::ApplicationRecorder;
use crate::config::{DEFAULT_PORT, DatastoreConfig};
use crate::datastore::Datastore;
use crate::error::StoreError;
use crate::process::ProcessRecorder;

/// Environment map the factory reads settings from.
pub type Environment = HashMap<String, String>;

/// Constructs datastores and recorders from configuration.
#[derive(Debug)]
pub struct Factory {
    application_name: String,
    datastore: Datastore,
    create_table: bool,
}

impl Factory {
    /// Environment key for the database name (required).
    pub const POSTGRES_DBNAME: &'static str = "POSTGRES_DBNAME";
    /// Environment key for the database host (required).
    pub const POSTGRES_HOST: &'static str = "POSTGRES_HOST";
    /// Environment key for the database port (optional, default 5432).
    pub const POSTGRES_PORT: &'static str = "POSTGRES_PORT";
    /// Environment key for the database user (required).
    pub const POSTGRES_USER: &'static str = "POSTGRES_USER";
    /// Environment key for the database password (required).
    pub const POSTGRES_PASSWORD: &'static str = "POSTGRES_PASSWORD";
    /// Environment key for the connection max age in seconds (optional;
    /// empty or absent means connections never expire).
    pub const POSTGRES_CONN_MAX_AGE: &'static str = "POSTGRES_CONN_MAX_AGE";
    /// Environment key for the liveness-probe-before-reuse flag
    /// (optional, default off).
    pub const POSTGRES_PRE_PING: &'static str = "POSTGRES_PRE_PING";
    /// Environment key for the auto-create-schema flag (optional,
    /// default on).
    pub const CREATE_TABLE: &'static str = "CREATE_TABLE";

    /// Build a factory from an environment map.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] when a required setting is
    /// missing or any setting is malformed.
    pub fn new(application_name: &str, env: &Environment) -> Result<Self, StoreError> {
        let dbname = required(env, Self::POSTGRES_DBNAME)?;
        let host = required(env, Self::POSTGRES_HOST)?;
        let user = required(env, Self::POSTGRES_USER)?;
        let password = required(env, Self::POSTGRES_PASSWORD)?;

        let port = match env.get(Self::POSTGRES_PORT).map(String::as_str) {
            None | Some("") => DEFAULT_PORT,
            Some(value) => value.parse::<u16>().map_err(|_| {
                StoreError::Config(format!(
                    "invalid value for '{}': expected a port number, got '{value}'",
                    Self::POSTGRES_PORT
                ))
            })?,
        };

        let conn_max_age = parse_max_age(env.get(Self::POSTGRES_CONN_MAX_AGE))?;
        let pre_ping = parse_bool(env.get(Self::POSTGRES_PRE_PING), Self::POSTGRES_PRE_PING, false)?;
        let create_table = parse_bool(env.get(Self::CREATE_TABLE), Self::CREATE_TABLE, true)?;

        let mut config = DatastoreConfig::new(host, port, dbname, user, password);
        config.conn_max_age = conn_max_age;
        config.pre_ping = pre_ping;

        Ok(Self {
            application_name: application_name.to_owned(),
            datastore: Datastore::new(&config),
            create_table,
        })
    }

    /// Build a factory from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] when a required setting is
    /// missing or any setting is malformed.
    pub fn from_process_env(application_name: &str) -> Result<Self, StoreError> {
        let env: Environment = std::env::vars().collect();
        Self::new(application_name, &env)
    }

    /// Access the factory's datastore.
    pub fn datastore(&self) -> &Datastore {
        &self.datastore
    }

    /// Build an aggregate recorder bound to the `<application>_<purpose>`
    /// table, creating the schema when configured to.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] when the derived table name is not
    /// a valid identifier, or [`StoreError::Operational`] if schema
    /// creation fails.
    pub async fn aggregate_recorder(&self, purpose: &str) -> Result<AggregateRecorder, StoreError> {
        let table = self.events_table_name(purpose)?;
        let recorder = AggregateRecorder::new(self.datastore.clone(), &table);
        if self.create_table {
            recorder.create_schema().await?;
        }
        Ok(recorder)
    }

    /// Build an application recorder bound to the `<application>_events`
    /// table, creating the schema when configured to.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] when the derived table name is not
    /// a valid identifier, or [`StoreError::Operational`] if schema
    /// creation fails.
    pub async fn application_recorder(&self) -> Result<ApplicationRecorder, StoreError> {
        let table = self.events_table_name("events")?;
        let recorder = ApplicationRecorder::new(self.datastore.clone(), &table);
        if self.create_table {
            recorder.create_schema().await?;
        }
        Ok(recorder)
    }

    /// Build a process recorder bound to the `<application>_events` and
    /// `<application>_tracking` tables, creating the schema when
    /// configured to.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] when a derived table name is not
    /// a valid identifier, or [`StoreError::Operational`] if schema
    /// creation fails.
    pub async fn process_recorder(&self) -> Result<ProcessRecorder, StoreError> {
        let events_table = self.events_table_name("events")?;
        let tracking_table = self.tracking_table_name()?;
        let recorder =
            ProcessRecorder::new(self.datastore.clone(), &events_table, &tracking_table);
        if self.create_table {
            recorder.create_schema().await?;
        }
        Ok(recorder)
    }

    fn events_table_name(&self, purpose: &str) -> Result<String, StoreError> {
        let prefix = self.table_prefix("stored");
        let table = format!("{prefix}_{purpose}");
        validate_table_name(&table)?;
        Ok(table)
    }

    fn tracking_table_name(&self) -> Result<String, StoreError> {
        let prefix = self.table_prefix("notification");
        let table = format!("{prefix}_tracking");
        validate_table_name(&table)?;
        Ok(table)
    }

    fn table_prefix(&self, fallback: &str) -> String {
        let prefix = self.application_name.to_lowercase();
        if prefix.is_empty() {
            fallback.to_owned()
        } else {
            prefix
        }
    }
}

fn required(env: &Environment, key: &str) -> Result<String, StoreError> {
    env.get(key)
        .filter(|value| !value.is_empty())
        .cloned()
        .ok_or_else(|| StoreError::Config(format!("required setting '{key}' not found in environment")))
}

fn parse_max_age(value: Option<&String>) -> Result<Option<Duration>, StoreError> {
    match value.map(String::as_str) {
        None | Some("") => Ok(None),
        Some(text) => {
            let seconds = text.parse::<f64>().map_err(|_| {
                StoreError::Config(format!(
                    "invalid value for '{}': expected seconds as a number or \
                     an empty string, got '{text}'",
                    Factory::POSTGRES_CONN_MAX_AGE
                ))
            })?;
            if !seconds.is_finite() || seconds < 0.0 {
                return Err(StoreError::Config(format!(
                    "invalid value for '{}': expected a non-negative number, got '{text}'",
                    Factory::POSTGRES_CONN_MAX_AGE
                )));
            }
            Ok(Some(Duration::from_secs_f64(seconds)))
        }
    }
}

/// Parse a boolean word (`y`/`yes`/`t`/`true`/`on`/`1` or
/// `n`/`no`/`f`/`false`/`off`/`0`, case-insensitive).
fn parse_bool(value: Option<&String>, key: &str, default: bool) -> Result<bool, StoreError> {
    let Some(text) = value.map(String::as_str).filter(|text| !text.is_empty()) else {
        return Ok(default);
    };
    match text.to_lowercase().as_str() {
        "y" | "yes" | "t" | "true" | "on" | "1" => Ok(true),
        "n" | "no" | "f" | "false" | "off" | "0" => Ok(false),
        _ => Err(StoreError::Config(format!(
            "invalid value for '{key}': expected a boolean word, got '{text}'"
        ))),
    }
}

/// Reject table names that cannot be safely interpolated into DDL and
/// query text. Bind parameters cannot cover identifiers, so the name
/// itself is constrained instead.
fn validate_table_name(name: &str) -> Result<(), StoreError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid_start && valid_rest {
        Ok(())
    } else {
        Err(StoreError::Config(format!(
            "invalid table name '{name}': expected lowercase letters, digits, \
             and underscores, starting with a letter or underscore"
        )))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn full_env() -> Environment {
        let mut env = Environment::new();
        env.insert(Factory::POSTGRES_DBNAME.to_owned(), "chronicle".to_owned());
        env.insert(Factory::POSTGRES_HOST.to_owned(), "localhost".to_owned());
        env.insert(Factory::POSTGRES_USER.to_owned(), "chronicle".to_owned());
        env.insert(Factory::POSTGRES_PASSWORD.to_owned(), "secret".to_owned());
        env
    }

    #[test]
    fn missing_required_setting_fails_fast() {
        for key in [
            Factory::POSTGRES_DBNAME,
            Factory::POSTGRES_HOST,
            Factory::POSTGRES_USER,
            Factory::POSTGRES_PASSWORD,
        ] {
            let mut env = full_env();
            env.remove(key);
            let err = Factory::new("myapp", &env).unwrap_err();
            assert!(matches!(err, StoreError::Config(_)), "key: {key}");
            assert!(format!("{err}").contains(key));
        }
    }

    #[test]
    fn port_defaults_and_parses() {
        let factory = Factory::new("myapp", &full_env());
        assert!(factory.is_ok());

        let mut env = full_env();
        env.insert(Factory::POSTGRES_PORT.to_owned(), "not-a-port".to_owned());
        assert!(matches!(
            Factory::new("myapp", &env),
            Err(StoreError::Config(_))
        ));
    }

    #[test]
    fn max_age_accepts_seconds_or_empty() {
        assert_eq!(parse_max_age(None).unwrap(), None);
        assert_eq!(parse_max_age(Some(&String::new())).unwrap(), None);
        assert_eq!(
            parse_max_age(Some(&"2.5".to_owned())).unwrap(),
            Some(Duration::from_millis(2500))
        );
        assert!(parse_max_age(Some(&"abc".to_owned())).is_err());
        assert!(parse_max_age(Some(&"-1".to_owned())).is_err());
    }

    #[test]
    fn bool_settings_accept_the_usual_words() {
        let key = Factory::POSTGRES_PRE_PING;
        assert!(!parse_bool(None, key, false).unwrap());
        assert!(parse_bool(None, key, true).unwrap());
        assert!(parse_bool(Some(&"yes".to_owned()), key, false).unwrap());
        assert!(parse_bool(Some(&"On".to_owned()), key, false).unwrap());
        assert!(!parse_bool(Some(&"0".to_owned()), key, true).unwrap());
        assert!(parse_bool(Some(&"nope".to_owned()), key, false).is_err());
    }

    #[test]
    fn table_names_derive_from_application_name() {
        let factory = Factory::new("MyApp", &full_env()).unwrap();
        assert_eq!(factory.events_table_name("events").unwrap(), "myapp_events");
        assert_eq!(
            factory.events_table_name("snapshots").unwrap(),
            "myapp_snapshots"
        );
        assert_eq!(factory.tracking_table_name().unwrap(), "myapp_tracking");
    }

    #[test]
    fn empty_application_name_uses_fallback_prefixes() {
        let factory = Factory::new("", &full_env()).unwrap();
        assert_eq!(factory.events_table_name("events").unwrap(), "stored_events");
        assert_eq!(
            factory.tracking_table_name().unwrap(),
            "notification_tracking"
        );
    }

    #[test]
    fn hostile_table_names_are_rejected() {
        let factory = Factory::new("myapp", &full_env()).unwrap();
        assert!(factory.events_table_name("events; drop table x").is_err());
        assert!(validate_table_name("1starts_with_digit").is_err());
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("ok_name_2").is_ok());
    }
}
