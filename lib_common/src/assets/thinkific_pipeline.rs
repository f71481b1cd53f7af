//! Multi-asset wrapping the course platform ingestion pipeline.
//!
//! One materialization runs the pipeline once and reports the same load
//! metadata for each of the four declared assets.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use super::{AssetKey, AssetSpec, MaterializeResult};
use crate::configs::{ConfigError, RuntimeConfig};
use crate::destinations::{AnyDestination, DestinationError, DestinationKind};
use crate::ingestors::thinkific::{self, ThinkificCredentials, ThinkificSource};
use crate::pipeline::{LoadInfo, Pipeline, PipelineError};
use crate::retrieve::FetchError;

/// Name of the operation producing the assets.
pub const MULTI_ASSET_NAME: &str = "thinkific_pipeline";

/// Asset keys in the order they are reported.
pub const ASSET_KEYS: [&str; 4] = [
    "thinkific_dlt_courses",
    "thinkific_dlt_course_reviews",
    "thinkific_dlt_enrollments",
    "thinkific_dlt_users",
];

pub const GROUP_NAME: &str = "education";

pub const COMPUTE_KIND: &str = "dlt";

/// Run configuration of the wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThinkificPipelineConfig {
    pub pipeline_name: String,
    pub dataset_name: String,
    pub destination: DestinationKind,
}

impl Default for ThinkificPipelineConfig {
    fn default() -> Self {
        Self {
            pipeline_name: "thinkific".to_string(),
            dataset_name: "thinkific".to_string(),
            destination: DestinationKind::Postgres,
        }
    }
}

#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Destination(#[from] DestinationError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// The four declared asset specs.
pub fn asset_specs() -> Vec<AssetSpec> {
    ASSET_KEYS
        .iter()
        .map(|key| {
            AssetSpec::new(*key)
                .with_group(GROUP_NAME)
                .with_compute_kind(COMPUTE_KIND)
                .with_description("Asset wrapper around the Thinkific ingestion pipeline.")
        })
        .collect()
}

/// One result per declared asset, all carrying the load metadata subset.
pub fn materializations(load_info: &LoadInfo) -> Vec<MaterializeResult> {
    let metadata = load_info.metadata_subset();
    ASSET_KEYS
        .iter()
        .map(|key| MaterializeResult {
            asset_key: AssetKey::from(*key),
            metadata: metadata.clone(),
        })
        .collect()
}

/// Runs the pipeline once against the configured destination.
pub async fn run_pipeline(
    config: &ThinkificPipelineConfig,
    runtime: &RuntimeConfig,
) -> Result<LoadInfo, MaterializeError> {
    let credentials = ThinkificCredentials::from_config(runtime, &config.pipeline_name)?;
    let base_url = thinkific::base_url(runtime, &config.pipeline_name);
    let source = ThinkificSource::connect(&credentials, &base_url)?;

    let destination = AnyDestination::from_config(config.destination, &config.pipeline_name, runtime)?;
    let pipeline = Pipeline::new(&config.pipeline_name, &config.dataset_name, destination);

    let load_info = pipeline.run(&source).await?;
    info!(
        pipeline = %config.pipeline_name,
        load_id = %load_info.load_id,
        rows = load_info.total_rows(),
        "Thinkific pipeline finished"
    );
    Ok(load_info)
}

/// Runs the pipeline and reports the materializations.
pub async fn materialize(
    config: &ThinkificPipelineConfig,
    runtime: &RuntimeConfig,
) -> Result<Vec<MaterializeResult>, MaterializeError> {
    let load_info = run_pipeline(config, runtime).await?;
    Ok(materializations(&load_info))
}
