//! # Load Summary
//!
//! [`LoadInfo`] describes one completed pipeline run. It prints a
//! human-readable report and exposes the handful of fields that are attached
//! to materializations as metadata.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;

use super::resource::WriteDisposition;

/// Keys of [`LoadInfo::metadata_subset`], in reporting order.
pub const METADATA_KEYS: [&str; 6] = [
    "first_run",
    "started_at",
    "finished_at",
    "dataset_name",
    "destination_name",
    "destination_type",
];

/// Rows written to one destination table during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableLoad {
    pub table_name: String,
    pub write_disposition: WriteDisposition,
    pub rows: u64,
}

/// Outcome of a successful pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct LoadInfo {
    pub pipeline_name: String,
    pub load_id: String,
    /// `true` when the destination held no completed load for this pipeline and dataset.
    pub first_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dataset_name: String,
    pub destination_name: String,
    pub destination_type: String,
    pub tables: Vec<TableLoad>,
}

impl LoadInfo {
    pub fn total_rows(&self) -> u64 {
        self.tables.iter().map(|t| t.rows).sum()
    }

    /// The six metadata fields reported with each materialization, as text.
    pub fn metadata_subset(&self) -> BTreeMap<String, String> {
        METADATA_KEYS
            .iter()
            .map(|key| {
                let value = match *key {
                    "first_run" => self.first_run.to_string(),
                    "started_at" => self.started_at.to_rfc3339(),
                    "finished_at" => self.finished_at.to_rfc3339(),
                    "dataset_name" => self.dataset_name.clone(),
                    "destination_name" => self.destination_name.clone(),
                    _ => self.destination_type.clone(),
                };
                (key.to_string(), value)
            })
            .collect()
    }
}

impl fmt::Display for LoadInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let elapsed = (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0;
        writeln!(
            f,
            "Pipeline {} load step completed in {:.2}s",
            self.pipeline_name.bold(),
            elapsed
        )?;
        writeln!(
            f,
            "1 load package(s) were loaded to destination {} and into dataset {}",
            self.destination_name.bold(),
            self.dataset_name.bold()
        )?;
        writeln!(
            f,
            "Load package {} is {} and contains no failed jobs",
            self.load_id.bold(),
            "LOADED".green()
        )?;
        for table in &self.tables {
            writeln!(
                f,
                "  - {} ({}): {} row(s)",
                table.table_name, table.write_disposition, table.rows
            )?;
        }
        if self.first_run {
            write!(f, "{}", "First run of this pipeline against the destination".yellow())?;
        }
        Ok(())
    }
}
