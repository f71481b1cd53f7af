//! # Pipeline Runner
//!
//! Extracts every resource of a [`Source`] and loads the tables into a
//! [`Destination`]. Extraction completes fully before the first row is
//! written, so a failed fetch never leaves a partial load behind.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, instrument};

use super::load_info::{LoadInfo, TableLoad};
use super::resource::Source;
use crate::destinations::{Destination, DestinationError};
use crate::retrieve::FetchError;

/// Failure of a pipeline run, by phase.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Extraction failed: {0}")]
    Extract(#[from] FetchError),

    #[error("Load failed: {0}")]
    Load(#[from] DestinationError),
}

/// A named pipeline bound to a destination and a dataset.
#[derive(Debug)]
pub struct Pipeline<D> {
    pipeline_name: String,
    dataset_name: String,
    destination: D,
}

impl<D: Destination + Sync> Pipeline<D> {
    pub fn new(pipeline_name: &str, dataset_name: &str, destination: D) -> Self {
        Self {
            pipeline_name: pipeline_name.to_string(),
            dataset_name: dataset_name.to_string(),
            destination,
        }
    }

    pub fn pipeline_name(&self) -> &str {
        &self.pipeline_name
    }

    pub fn dataset_name(&self) -> &str {
        &self.dataset_name
    }

    pub fn destination(&self) -> &D {
        &self.destination
    }

    /// Runs one extract-and-load cycle.
    ///
    /// Each table is written in its own transaction. The load is recorded as
    /// completed only after every table was written, which is what later runs
    /// consult to decide `first_run`.
    #[instrument(skip_all, fields(pipeline = %self.pipeline_name, dataset = %self.dataset_name))]
    pub async fn run<S: Source + Sync>(&self, source: &S) -> Result<LoadInfo, PipelineError> {
        let started_at = Utc::now();
        let load_id = new_load_id(started_at);
        info!(%load_id, source = source.name(), destination = self.destination.name(), "Pipeline run started");

        let first_run = !self
            .destination
            .has_completed_load(&self.pipeline_name, &self.dataset_name)
            .await?;

        let tables = source.extract().await?;
        info!(tables = tables.len(), "Extraction finished");

        let mut loads = Vec::with_capacity(tables.len());
        for table in &tables {
            let rows = self
                .destination
                .load_table(&self.dataset_name, &load_id, table)
                .await?;
            info!(table = %table.resource.name, rows, disposition = %table.resource.write_disposition, "Table loaded");
            loads.push(TableLoad {
                table_name: table.resource.name.clone(),
                write_disposition: table.resource.write_disposition,
                rows,
            });
        }

        let finished_at = Utc::now();
        self.destination
            .complete_load(&self.pipeline_name, &self.dataset_name, &load_id, finished_at)
            .await?;

        Ok(LoadInfo {
            pipeline_name: self.pipeline_name.clone(),
            load_id,
            first_run,
            started_at,
            finished_at,
            dataset_name: self.dataset_name.clone(),
            destination_name: self.destination.name().to_string(),
            destination_type: self.destination.destination_type().to_string(),
            tables: loads,
        })
    }
}

/// Load ids are the run start time as `<unix seconds>.<microseconds>`.
fn new_load_id(at: DateTime<Utc>) -> String {
    format!("{}.{:06}", at.timestamp(), at.timestamp_subsec_micros())
}
