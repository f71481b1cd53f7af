//! # Destinations Module
//!
//! Warehouse loaders the pipeline writes into. Every destination stores one
//! table per resource with the same shape:
//!
//! | column      | meaning                                                        |
//! |-------------|----------------------------------------------------------------|
//! | `_row_key`  | primary key value for merge tables, `<load_id>.<n>` otherwise  |
//! | `data`      | the record as JSON                                             |
//! | `_load_id`  | id of the load that last wrote the row                         |
//!
//! plus a `_platform_loads` table recording completed loads.
//!
//! ## Contained Modules:
//!
//! - **`sqlite`**: embedded single-file database used for local runs.
//! - **`postgres`**: pooled PostgreSQL loader used in deployed environments.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

use std::fmt;
use std::future::Future;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::configs::{ConfigError, RuntimeConfig};
use crate::pipeline::{primary_key_value, ExtractedTable, WriteDisposition};

pub mod postgres;
pub mod sqlite;

pub use postgres::{PostgresCredentials, PostgresDestination};
pub use sqlite::SqliteDestination;

/// Name of the bookkeeping table holding one row per completed load.
pub const LOADS_TABLE: &str = "_platform_loads";

/// Errors raised while writing to a destination.
#[derive(Debug, Error)]
pub enum DestinationError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Destination configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record in table '{table}' has no usable primary key '{key}'")]
    MissingPrimaryKey { table: String, key: String },

    #[error("Unknown destination '{0}', expected 'sqlite' or 'postgres'")]
    UnknownDestination(String),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Destination connection lock poisoned")]
    LockPoisoned,
}

/// A warehouse the pipeline can load tables into.
pub trait Destination {
    /// Name reported in load summaries.
    fn name(&self) -> &str;

    /// Kind of destination (`sqlite`, `postgres`).
    fn destination_type(&self) -> &str;

    /// Whether any load of `pipeline` into `dataset` was completed before.
    fn has_completed_load(
        &self,
        pipeline: &str,
        dataset: &str,
    ) -> impl Future<Output = Result<bool, DestinationError>> + Send;

    /// Writes one extracted table in a single transaction and returns the number of rows written.
    fn load_table(
        &self,
        dataset: &str,
        load_id: &str,
        table: &ExtractedTable,
    ) -> impl Future<Output = Result<u64, DestinationError>> + Send;

    /// Records `load_id` as completed.
    fn complete_load(
        &self,
        pipeline: &str,
        dataset: &str,
        load_id: &str,
        finished_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), DestinationError>> + Send;
}

/// The destinations selectable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationKind {
    Sqlite,
    Postgres,
}

impl fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestinationKind::Sqlite => f.write_str("sqlite"),
            DestinationKind::Postgres => f.write_str("postgres"),
        }
    }
}

impl FromStr for DestinationKind {
    type Err = DestinationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(DestinationKind::Sqlite),
            "postgres" | "postgresql" => Ok(DestinationKind::Postgres),
            other => Err(DestinationError::UnknownDestination(other.to_string())),
        }
    }
}

/// A destination chosen at runtime.
#[derive(Debug)]
pub enum AnyDestination {
    Sqlite(SqliteDestination),
    Postgres(PostgresDestination),
}

impl AnyDestination {
    /// Builds the destination of `kind` for `pipeline_name`.
    ///
    /// SQLite opens `<pipeline_name>.db` in the working directory unless a
    /// `credentials` path is configured for it. PostgreSQL credentials come
    /// from the provider hierarchy.
    pub fn from_config(
        kind: DestinationKind,
        pipeline_name: &str,
        config: &RuntimeConfig,
    ) -> Result<Self, DestinationError> {
        match kind {
            DestinationKind::Sqlite => {
                let path = config
                    .resolve_destination_credential(pipeline_name, "sqlite", None)
                    .unwrap_or_else(|| format!("{}.db", pipeline_name));
                Ok(AnyDestination::Sqlite(SqliteDestination::open(path)?))
            }
            DestinationKind::Postgres => {
                let credentials = PostgresCredentials::from_config(config, pipeline_name)?;
                Ok(AnyDestination::Postgres(PostgresDestination::new(&credentials)?))
            }
        }
    }
}

impl Destination for AnyDestination {
    fn name(&self) -> &str {
        match self {
            AnyDestination::Sqlite(d) => d.name(),
            AnyDestination::Postgres(d) => d.name(),
        }
    }

    fn destination_type(&self) -> &str {
        match self {
            AnyDestination::Sqlite(d) => d.destination_type(),
            AnyDestination::Postgres(d) => d.destination_type(),
        }
    }

    async fn has_completed_load(&self, pipeline: &str, dataset: &str) -> Result<bool, DestinationError> {
        match self {
            AnyDestination::Sqlite(d) => d.has_completed_load(pipeline, dataset).await,
            AnyDestination::Postgres(d) => d.has_completed_load(pipeline, dataset).await,
        }
    }

    async fn load_table(
        &self,
        dataset: &str,
        load_id: &str,
        table: &ExtractedTable,
    ) -> Result<u64, DestinationError> {
        match self {
            AnyDestination::Sqlite(d) => d.load_table(dataset, load_id, table).await,
            AnyDestination::Postgres(d) => d.load_table(dataset, load_id, table).await,
        }
    }

    async fn complete_load(
        &self,
        pipeline: &str,
        dataset: &str,
        load_id: &str,
        finished_at: DateTime<Utc>,
    ) -> Result<(), DestinationError> {
        match self {
            AnyDestination::Sqlite(d) => d.complete_load(pipeline, dataset, load_id, finished_at).await,
            AnyDestination::Postgres(d) => {
                d.complete_load(pipeline, dataset, load_id, finished_at).await
            }
        }
    }
}

/// One row ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PreparedRow {
    pub row_key: String,
    pub data: Value,
}

/// Computes the row key of every record of `table`.
///
/// Merge tables key rows by their primary key and fail on a record without
/// one. Other dispositions key rows by load id and position, so rows of
/// different loads never collide.
pub(crate) fn prepare_rows(
    table: &ExtractedTable,
    load_id: &str,
) -> Result<Vec<PreparedRow>, DestinationError> {
    let merge_key = match table.resource.write_disposition {
        WriteDisposition::Merge => table.resource.primary_key.as_deref(),
        WriteDisposition::Append | WriteDisposition::Replace => None,
    };

    table
        .records()
        .enumerate()
        .map(|(index, record)| {
            let row_key = match merge_key {
                Some(key) => primary_key_value(record, key).ok_or_else(|| {
                    DestinationError::MissingPrimaryKey {
                        table: table.resource.name.clone(),
                        key: key.to_string(),
                    }
                })?,
                None => format!("{}.{}", load_id, index),
            };
            Ok(PreparedRow {
                row_key,
                data: Value::Object(record.clone()),
            })
        })
        .collect()
}

/// Double-quotes an SQL identifier.
pub(crate) fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ResourceSpec;
    use serde_json::json;

    fn table(resource: ResourceSpec, rows: Vec<Value>) -> ExtractedTable {
        let page = rows.into_iter().map(|r| r.as_object().unwrap().clone()).collect();
        ExtractedTable::new(resource, vec![page])
    }

    #[test]
    fn test_destination_kind_parses_case_insensitively() {
        assert_eq!("SQLite".parse::<DestinationKind>().unwrap(), DestinationKind::Sqlite);
        assert_eq!("postgres".parse::<DestinationKind>().unwrap(), DestinationKind::Postgres);
        assert!(matches!(
            "duckdb".parse::<DestinationKind>(),
            Err(DestinationError::UnknownDestination(name)) if name == "duckdb"
        ));
    }

    #[test]
    fn test_merge_rows_are_keyed_by_primary_key() {
        let rows = prepare_rows(
            &table(ResourceSpec::merge("users", "id"), vec![json!({ "id": 7 }), json!({ "id": "x" })]),
            "100.000001",
        )
        .unwrap();
        let keys: Vec<&str> = rows.iter().map(|r| r.row_key.as_str()).collect();
        assert_eq!(keys, vec!["7", "x"]);
    }

    #[test]
    fn test_merge_row_without_key_is_rejected() {
        let err = prepare_rows(
            &table(ResourceSpec::merge("users", "id"), vec![json!({ "email": "a@b.c" })]),
            "1.0",
        )
        .unwrap_err();
        assert!(matches!(err, DestinationError::MissingPrimaryKey { ref key, .. } if key == "id"));
    }

    #[test]
    fn test_append_rows_are_keyed_by_load_and_position() {
        let rows = prepare_rows(
            &table(ResourceSpec::append("events"), vec![json!({ "a": 1 }), json!({ "a": 1 })]),
            "5.000000",
        )
        .unwrap();
        assert_eq!(rows[0].row_key, "5.000000.0");
        assert_eq!(rows[1].row_key, "5.000000.1");
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("data__users"), "\"data__users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
