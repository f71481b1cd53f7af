//! # Schedules
//!
//! A schedule pairs a cron expression with a job and an evaluator that turns
//! a tick into run requests. Expressions are written in the usual five-field
//! form (or `@daily`-style shorthands) and are evaluated in the schedule's
//! execution timezone. Numeric day-of-week values follow the `cron` crate
//! (1 = Sunday).

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Days, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::graph::AssetGraph;
use super::jobs::JobDefinition;
use super::partitions::{PartitionRegistry, DAILY_KEY_FORMAT};
use super::selection::SelectionError;
use crate::assets::AssetKey;

pub const ASSET_PARTITION_RANGE_START_TAG: &str = "dagster/asset_partition_range_start";
pub const ASSET_PARTITION_RANGE_END_TAG: &str = "dagster/asset_partition_range_end";
pub const PARTITION_TAG: &str = "dagster/partition";
pub const SCHEDULE_NAME_TAG: &str = "dagster/schedule_name";

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("Schedule '{schedule}' has an invalid cron expression '{expression}': {reason}")]
    InvalidCron {
        schedule: String,
        expression: String,
        reason: String,
    },

    #[error("Schedule '{schedule}' cannot resolve its selection: {source}")]
    Selection {
        schedule: String,
        #[source]
        source: SelectionError,
    },

    #[error("Job '{0}' has no partitions to build a schedule from")]
    MissingPartitions(String),
}

/// How a tick becomes run requests.
#[derive(Debug, Clone)]
pub enum ScheduleKind {
    /// One request per tick.
    Plain,
    /// One request tagged with the date range `[tick - days, tick]`.
    TrailingPartitionRange { days: u64 },
    /// One request for the job's last complete partition at the tick, keyed by it.
    PartitionedJob,
    /// One request for the registry's latest partition, keyed by it.
    LatestPartition(Arc<dyn PartitionRegistry>),
}

/// A run the scheduler wants submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub schedule_name: String,
    pub job_name: String,
    /// Requests sharing a run key within one schedule are submitted once.
    pub run_key: Option<String>,
    pub partition_key: Option<String>,
    pub tags: BTreeMap<String, String>,
    pub asset_selection: Vec<AssetKey>,
    pub scheduled_execution_time: DateTime<Utc>,
}

pub struct ScheduleEvaluationContext<'a> {
    pub graph: &'a AssetGraph,
    pub scheduled_execution_time: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ScheduleDefinition {
    pub name: String,
    pub cron_schedule: String,
    pub job: JobDefinition,
    pub execution_timezone: Tz,
    pub kind: ScheduleKind,
    cron: cron::Schedule,
}

impl ScheduleDefinition {
    pub fn new(
        name: &str,
        cron_schedule: &str,
        job: JobDefinition,
        kind: ScheduleKind,
    ) -> Result<Self, ScheduleError> {
        let cron = parse_cron(name, cron_schedule)?;
        Ok(Self {
            name: name.to_string(),
            cron_schedule: cron_schedule.to_string(),
            job,
            execution_timezone: chrono_tz::UTC,
            kind,
            cron,
        })
    }

    /// Schedule named `<job>_schedule`, ticking on the job's partition
    /// boundaries in the partitions' timezone.
    pub fn from_partitioned_job(job: JobDefinition) -> Result<Self, ScheduleError> {
        let partitions = job
            .partitions
            .clone()
            .ok_or_else(|| ScheduleError::MissingPartitions(job.name.clone()))?;
        let name = format!("{}_schedule", job.name);
        Ok(ScheduleDefinition::new(&name, partitions.cron_schedule(), job, ScheduleKind::PartitionedJob)?
            .with_timezone(partitions.timezone))
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.execution_timezone = timezone;
        self
    }

    /// The expression with a leading seconds field, as cron job schedulers expect it.
    pub fn six_field_cron(&self) -> String {
        to_six_fields(&self.cron_schedule)
    }

    /// First tick strictly after `after`.
    pub fn next_tick_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.cron
            .after(&after.with_timezone(&self.execution_timezone))
            .next()
            .map(|tick| tick.with_timezone(&Utc))
    }

    /// Resolves the job selection and builds the run requests for one tick.
    pub fn evaluate(&self, ctx: &ScheduleEvaluationContext<'_>) -> Result<Vec<RunRequest>, ScheduleError> {
        let assets = self.job.resolve(ctx.graph).map_err(|source| ScheduleError::Selection {
            schedule: self.name.clone(),
            source,
        })?;
        let tick = ctx.scheduled_execution_time;

        let partition_key = match &self.kind {
            ScheduleKind::Plain | ScheduleKind::TrailingPartitionRange { .. } => None,
            ScheduleKind::PartitionedJob => {
                let partitions = self
                    .job
                    .partitions
                    .as_ref()
                    .ok_or_else(|| ScheduleError::MissingPartitions(self.job.name.clone()))?;
                match partitions.last_partition_key(tick) {
                    Some(key) => Some(key),
                    None => {
                        debug!(schedule = %self.name, %tick, "no complete partition yet, skipping");
                        return Ok(Vec::new());
                    }
                }
            }
            ScheduleKind::LatestPartition(registry) => match registry.last_partition_key(tick) {
                Some(key) => Some(key),
                None => {
                    debug!(schedule = %self.name, %tick, "registry has no partition yet, skipping");
                    return Ok(Vec::new());
                }
            },
        };

        let mut tags = self.job.tags.clone();
        tags.insert(SCHEDULE_NAME_TAG.to_string(), self.name.clone());
        if let ScheduleKind::TrailingPartitionRange { days } = self.kind {
            let local = tick.with_timezone(&self.execution_timezone);
            let start = local.checked_sub_days(Days::new(days)).unwrap_or(local);
            tags.insert(
                ASSET_PARTITION_RANGE_START_TAG.to_string(),
                start.format(DAILY_KEY_FORMAT).to_string(),
            );
            tags.insert(
                ASSET_PARTITION_RANGE_END_TAG.to_string(),
                local.format(DAILY_KEY_FORMAT).to_string(),
            );
        }
        if let Some(key) = &partition_key {
            tags.insert(PARTITION_TAG.to_string(), key.clone());
        }

        Ok(vec![RunRequest {
            schedule_name: self.name.clone(),
            job_name: self.job.name.clone(),
            run_key: partition_key.clone(),
            partition_key,
            tags,
            asset_selection: assets.into_iter().collect(),
            scheduled_execution_time: tick,
        }])
    }
}

fn parse_cron(schedule: &str, expression: &str) -> Result<cron::Schedule, ScheduleError> {
    cron::Schedule::from_str(&to_six_fields(expression)).map_err(|e| ScheduleError::InvalidCron {
        schedule: schedule.to_string(),
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// Prefixes a five-field expression with a zero seconds field and expands shorthands.
/// Six and seven field expressions pass through untouched.
pub fn to_six_fields(expression: &str) -> String {
    let expression = expression.trim();
    match expression {
        "@yearly" | "@annually" => "0 0 0 1 1 *".to_string(),
        "@monthly" => "0 0 0 1 * *".to_string(),
        "@weekly" => "0 0 0 * * Sun".to_string(),
        "@daily" | "@midnight" => "0 0 0 * * *".to_string(),
        "@hourly" => "0 0 * * * *".to_string(),
        _ if expression.split_whitespace().count() == 5 => format!("0 {}", expression),
        _ => expression.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::graph::AssetNode;
    use crate::orchestration::partitions::DailyPartitionsDefinition;
    use crate::orchestration::selection::AssetSelection;
    use chrono::{NaiveDate, TimeZone};

    fn graph() -> AssetGraph {
        AssetGraph::new(vec![AssetNode::new("github_issues"), AssetNode::new("daily_usage")]).unwrap()
    }

    fn job(key: &str) -> JobDefinition {
        JobDefinition::new("test_job", AssetSelection::keys([key])).with_tag("team", "devrel")
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_five_field_and_shorthand_conversion() {
        assert_eq!(to_six_fields("0 5 * * *"), "0 0 5 * * *");
        assert_eq!(to_six_fields("*/5 * * * *"), "0 */5 * * * *");
        assert_eq!(to_six_fields("@daily"), "0 0 0 * * *");
        assert_eq!(to_six_fields("0 0 * * * *"), "0 0 * * * *");
    }

    #[test]
    fn test_invalid_cron_is_rejected() {
        let err = ScheduleDefinition::new("bad", "not-a-cron", job("github_issues"), ScheduleKind::Plain).unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidCron { ref schedule, .. } if schedule == "bad"));
    }

    #[test]
    fn test_next_tick_respects_cron_and_timezone() {
        let every_five = ScheduleDefinition::new("hv", "*/5 * * * *", job("daily_usage"), ScheduleKind::Plain).unwrap();
        assert_eq!(every_five.next_tick_after(at(2024, 5, 1, 10, 2)), Some(at(2024, 5, 1, 10, 5)));

        let la = ScheduleDefinition::new("la", "0 3 * * *", job("daily_usage"), ScheduleKind::Plain)
            .unwrap()
            .with_timezone(chrono_tz::America::Los_Angeles);
        // 03:00 PDT is 10:00 UTC.
        assert_eq!(la.next_tick_after(at(2024, 5, 1, 0, 0)), Some(at(2024, 5, 1, 10, 0)));
    }

    #[test]
    fn test_plain_schedule_has_no_run_key() {
        let schedule = ScheduleDefinition::new("plain", "0 5 * * *", job("daily_usage"), ScheduleKind::Plain).unwrap();
        let graph = graph();
        let requests = schedule
            .evaluate(&ScheduleEvaluationContext {
                graph: &graph,
                scheduled_execution_time: at(2024, 5, 1, 5, 0),
            })
            .unwrap();

        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].run_key, None);
        assert_eq!(requests[0].tags["team"], "devrel");
        assert_eq!(requests[0].tags[SCHEDULE_NAME_TAG], "plain");
        assert_eq!(requests[0].asset_selection, vec![AssetKey::from("daily_usage")]);
    }

    #[test]
    fn test_trailing_range_tags() {
        let schedule = ScheduleDefinition::new(
            "support_bot_schedule",
            "@daily",
            job("github_issues"),
            ScheduleKind::TrailingPartitionRange { days: 30 },
        )
        .unwrap();
        let graph = graph();
        let requests = schedule
            .evaluate(&ScheduleEvaluationContext {
                graph: &graph,
                scheduled_execution_time: at(2024, 3, 31, 0, 0),
            })
            .unwrap();

        assert_eq!(requests[0].tags[ASSET_PARTITION_RANGE_START_TAG], "2024-03-01");
        assert_eq!(requests[0].tags[ASSET_PARTITION_RANGE_END_TAG], "2024-03-31");
    }

    #[test]
    fn test_partitioned_job_schedule() {
        let partitions = DailyPartitionsDefinition::new(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), chrono_tz::UTC);
        let job = JobDefinition::new("insights_job", AssetSelection::keys(["daily_usage"])).with_partitions(partitions);
        let schedule = ScheduleDefinition::from_partitioned_job(job).unwrap();
        assert_eq!(schedule.name, "insights_job_schedule");
        assert_eq!(schedule.cron_schedule, "0 0 * * *");

        let graph = graph();
        let requests = schedule
            .evaluate(&ScheduleEvaluationContext {
                graph: &graph,
                scheduled_execution_time: at(2024, 2, 2, 0, 0),
            })
            .unwrap();
        assert_eq!(requests[0].partition_key.as_deref(), Some("2024-02-01"));
        assert_eq!(requests[0].run_key.as_deref(), Some("2024-02-01"));

        let before_start = schedule
            .evaluate(&ScheduleEvaluationContext {
                graph: &graph,
                scheduled_execution_time: at(2024, 1, 1, 0, 0),
            })
            .unwrap();
        assert!(before_start.is_empty());
    }

    #[test]
    fn test_unpartitioned_job_cannot_build_partitioned_schedule() {
        assert!(matches!(
            ScheduleDefinition::from_partitioned_job(job("daily_usage")),
            Err(ScheduleError::MissingPartitions(_))
        ));
    }

    #[test]
    fn test_empty_selection_fails_evaluation() {
        let schedule = ScheduleDefinition::new(
            "s",
            "0 3 * * *",
            JobDefinition::new("j", AssetSelection::groups(["nothing"])),
            ScheduleKind::Plain,
        )
        .unwrap();
        let graph = graph();
        let err = schedule
            .evaluate(&ScheduleEvaluationContext {
                graph: &graph,
                scheduled_execution_time: at(2024, 1, 1, 3, 0),
            })
            .unwrap_err();
        assert!(matches!(err, ScheduleError::Selection { source: SelectionError::Empty(_), .. }));
    }
}
