//! # Platform Schedules
//!
//! The concrete jobs and schedules of the data platform. Selections refer to
//! assets defined in the manifest-loaded graph; they are only resolved when a
//! schedule is evaluated.

use std::sync::Arc;

use chrono::NaiveDate;

use super::jobs::JobDefinition;
use super::partitions::DailyPartitionsDefinition;
use super::schedules::{ScheduleDefinition, ScheduleError, ScheduleKind};
use super::selection::AssetSelection;

const TEAM_TAG: &str = "team";

const HIGH_VOLUME_INGEST_GROUP: &str = "cloud_product_high_volume_ingest";
const LOW_VOLUME_INGEST_GROUP: &str = "cloud_product_low_volume_ingest";

/// First day of the insights partitions.
pub fn insights_partition() -> DailyPartitionsDefinition {
    let start = NaiveDate::from_ymd_opt(2023, 7, 1).unwrap_or_default();
    DailyPartitionsDefinition::new(start, chrono_tz::UTC)
}

pub fn support_bot_job() -> JobDefinition {
    JobDefinition::new("support_bot_job", AssetSelection::keys(["github_issues"])).with_tag(TEAM_TAG, "devrel")
}

pub fn oss_telemetry_job() -> JobDefinition {
    JobDefinition::new("oss_telemetry_job", AssetSelection::groups(["telemetry"]).downstream())
        .with_tag(TEAM_TAG, "devrel")
}

/// Every insights model plus everything upstream of it, ingestion included,
/// except the cloud product sync groups that run on their own schedules.
pub fn insights_selection() -> AssetSelection {
    AssetSelection::dbt("tag:insights").upstream().required_multi_asset_neighbors()
        - AssetSelection::groups([HIGH_VOLUME_INGEST_GROUP])
        - AssetSelection::groups([LOW_VOLUME_INGEST_GROUP])
}

pub fn insights_job() -> JobDefinition {
    JobDefinition::new("insights_job", insights_selection())
        .with_partitions(insights_partition())
        .with_tag(TEAM_TAG, "insights")
}

pub fn cloud_usage_metrics_selection() -> AssetSelection {
    AssetSelection::dbt("fqn:*")
        .upstream()
        .downstream()
        .required_multi_asset_neighbors()
        - AssetSelection::groups(["cloud_reporting"])
        - AssetSelection::key_prefixes(["purina", "postgres_mirror"])
        - AssetSelection::groups([HIGH_VOLUME_INGEST_GROUP])
        - AssetSelection::groups([LOW_VOLUME_INGEST_GROUP])
}

pub fn cloud_usage_metrics_job() -> JobDefinition {
    JobDefinition::new("cloud_usage_metrics_job", cloud_usage_metrics_selection()).with_tag(TEAM_TAG, "devrel")
}

pub fn cloud_product_sync_high_volume_job() -> JobDefinition {
    JobDefinition::new(
        "cloud_product_sync_high_volume",
        AssetSelection::groups([HIGH_VOLUME_INGEST_GROUP]),
    )
    .with_tag(TEAM_TAG, "devrel")
}

pub fn cloud_product_sync_low_volume_job() -> JobDefinition {
    JobDefinition::new(
        "cloud_product_sync_low_volume",
        AssetSelection::groups([LOW_VOLUME_INGEST_GROUP]),
    )
    .with_tag(TEAM_TAG, "devrel")
}

pub fn purina_clone_cleanup_job() -> JobDefinition {
    JobDefinition::new("purina_clone_cleanup_job", AssetSelection::keys(["inactive_snowflake_clones"]))
        .with_tag(TEAM_TAG, "devrel")
}

/// Jobs that are launched by schedules and also exposed on their own.
pub fn scheduled_jobs() -> Vec<JobDefinition> {
    vec![oss_telemetry_job(), insights_job(), support_bot_job()]
}

pub fn schedules() -> Result<Vec<ScheduleDefinition>, ScheduleError> {
    Ok(vec![
        ScheduleDefinition::new(
            "oss_telemetry_schedule",
            "0 5 * * *",
            oss_telemetry_job(),
            ScheduleKind::Plain,
        )?,
        ScheduleDefinition::from_partitioned_job(insights_job())?,
        // Not partitioned itself, but reads an insights-managed partitioned
        // asset: always run the most recent insights partition.
        ScheduleDefinition::new(
            "cloud_usage_metrics_schedule",
            "0 3 * * *",
            cloud_usage_metrics_job(),
            ScheduleKind::LatestPartition(Arc::new(insights_partition())),
        )?,
        ScheduleDefinition::new(
            "cloud_product_sync_high_volume_schedule",
            "*/5 * * * *",
            cloud_product_sync_high_volume_job(),
            ScheduleKind::Plain,
        )?,
        ScheduleDefinition::new(
            "cloud_product_sync_low_volume_schedule",
            "0 */2 * * *",
            cloud_product_sync_low_volume_job(),
            ScheduleKind::Plain,
        )?,
        ScheduleDefinition::new(
            "purina_clone_cleanup_schedule",
            "0 3 * * *",
            purina_clone_cleanup_job(),
            ScheduleKind::Plain,
        )?,
        ScheduleDefinition::new(
            "support_bot_schedule",
            "@daily",
            support_bot_job(),
            ScheduleKind::TrailingPartitionRange { days: 30 },
        )?,
    ])
}
