//! `SQLite`-backed destination.
//!
//! Uses a single `Mutex<Connection>`; every table load runs in one
//! transaction. Resource tables are named `<dataset>__<resource>`.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::debug;

use super::{prepare_rows, quote_ident, Destination, DestinationError, LOADS_TABLE};
use crate::pipeline::{ExtractedTable, WriteDisposition};
use crate::retrieve::Record;

/// `SQLite` database holding every dataset of a pipeline.
///
/// Create with [`SqliteDestination::open`] for a file or
/// [`SqliteDestination::open_in_memory`] for tests.
///
/// The [`Destination`] methods are `async` only to share the trait with the
/// warehouse; the `rusqlite` calls run synchronously on the calling task. This
/// is meant for the single-run ingestion CLI, not for a runtime serving other work.
#[derive(Debug)]
pub struct SqliteDestination {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteDestination {
    /// Opens or creates the database file at `path`, creating parent directories as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DestinationError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn, Some(path.to_path_buf()))
    }

    pub fn open_in_memory() -> Result<Self, DestinationError> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self, DestinationError> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                load_id TEXT PRIMARY KEY,
                pipeline_name TEXT NOT NULL,
                dataset_name TEXT NOT NULL,
                inserted_at TEXT NOT NULL
            );",
            quote_ident(LOADS_TABLE)
        ))?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Database file, `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn table_name(dataset: &str, resource: &str) -> String {
        format!("{}__{}", dataset, resource)
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, DestinationError> {
        self.conn.lock().map_err(|_| DestinationError::LockPoisoned)
    }

    /// Reads back every stored record of a resource, ordered by row key.
    /// A table that was never loaded reads as empty.
    pub fn read_table(&self, dataset: &str, resource: &str) -> Result<Vec<Record>, DestinationError> {
        let conn = self.lock_conn()?;
        let table = Self::table_name(dataset, resource);
        let exists: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [&table],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Ok(Vec::new());
        }

        let mut stmt = conn.prepare(&format!(
            "SELECT data FROM {} ORDER BY _row_key",
            quote_ident(&table)
        ))?;
        let raw: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<_, _>>()?;

        raw.iter()
            .map(|text| match serde_json::from_str::<Value>(text)? {
                Value::Object(record) => Ok(record),
                _ => Ok(Record::new()),
            })
            .collect()
    }

    fn write_table(&self, dataset: &str, load_id: &str, table: &ExtractedTable) -> Result<u64, DestinationError> {
        let rows = prepare_rows(table, load_id)?;
        let name = quote_ident(&Self::table_name(dataset, &table.resource.name));

        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        tx.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                _row_key TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                _load_id TEXT NOT NULL
            );",
            name
        ))?;
        if table.resource.write_disposition == WriteDisposition::Replace {
            tx.execute(&format!("DELETE FROM {}", name), [])?;
        }
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} (_row_key, data, _load_id) VALUES (?1, ?2, ?3)
                 ON CONFLICT(_row_key) DO UPDATE SET data = excluded.data, _load_id = excluded._load_id",
                name
            ))?;
            for row in &rows {
                stmt.execute(params![row.row_key, row.data.to_string(), load_id])?;
            }
        }
        tx.commit()?;
        debug!(table = %name, rows = rows.len(), "sqlite table written");
        Ok(rows.len() as u64)
    }
}

impl Destination for SqliteDestination {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn destination_type(&self) -> &str {
        "sqlite"
    }

    async fn has_completed_load(&self, pipeline: &str, dataset: &str) -> Result<bool, DestinationError> {
        let conn = self.lock_conn()?;
        let count: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE pipeline_name = ?1 AND dataset_name = ?2",
                quote_ident(LOADS_TABLE)
            ),
            params![pipeline, dataset],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    async fn load_table(
        &self,
        dataset: &str,
        load_id: &str,
        table: &ExtractedTable,
    ) -> Result<u64, DestinationError> {
        self.write_table(dataset, load_id, table)
    }

    async fn complete_load(
        &self,
        pipeline: &str,
        dataset: &str,
        load_id: &str,
        finished_at: DateTime<Utc>,
    ) -> Result<(), DestinationError> {
        let conn = self.lock_conn()?;
        conn.execute(
            &format!(
                "INSERT INTO {} (load_id, pipeline_name, dataset_name, inserted_at) VALUES (?1, ?2, ?3, ?4)",
                quote_ident(LOADS_TABLE)
            ),
            params![load_id, pipeline, dataset, finished_at.to_rfc3339()],
        )?;
        Ok(())
    }
}
