//! # Platform Scheduler
//!
//! Evaluates the platform schedules against the asset graph and queues the
//! resulting run requests.
//!
//! ## Subcommands:
//! - **`list`**: every schedule with its cron, timezone, next tick and resolved selection.
//! - **`evaluate`**: dry-runs one schedule at a given time and prints the run requests.
//! - **`run`**: registers every schedule with a cron job scheduler and appends
//!   admitted run requests, one JSON object per line, to the run queue file.
//!   Run keys already submitted are skipped; the ledger survives restarts.
//!
//! The graph is read from the manifest at `--manifest` / `ASSET_MANIFEST_PATH`
//! and extended with the locally defined Thinkific multi-asset.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, DurationRound, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;
use static_init::dynamic;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{JobBuilder, JobScheduler};
use tracing::{error, info, warn};

use lib_common::assets::thinkific_pipeline::{asset_specs, MULTI_ASSET_NAME};
use lib_common::loggers::{setup_logging, LoggingOptions};
use lib_common::orchestration::definitions;
use lib_common::orchestration::{
    AssetGraph, AssetNode, JobDefinition, RunKeyLedger, RunRequest, ScheduleDefinition, ScheduleEvaluationContext,
};

#[dynamic]
static DOTENV_INIT: () = {
    // Set up environment variables
    dotenvy::dotenv().ok();
};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Evaluates the data platform schedules and queues run requests.")]
struct Cli {
    /// JSON manifest describing the asset graph.
    #[clap(long, env = "ASSET_MANIFEST_PATH", default_value = "asset_manifest.json")]
    manifest: PathBuf,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List schedules and their resolved selections.
    List,
    /// Evaluate one schedule without queueing anything.
    Evaluate {
        #[clap(long)]
        schedule: String,
        /// Scheduled execution time (RFC 3339). Defaults to now.
        #[clap(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Run every schedule until interrupted.
    Run {
        #[clap(long, env = "RUN_QUEUE_PATH", default_value = "run_queue.jsonl")]
        queue: PathBuf,
        #[clap(long, env = "RUN_KEY_LEDGER_PATH", default_value = "run_keys.json")]
        ledger: PathBuf,
    },
}

/// Files written by the `run` subcommand.
#[derive(Debug, Clone)]
struct RunPaths {
    queue: PathBuf,
    ledger: PathBuf,
}

fn load_graph(manifest: &Path) -> Result<AssetGraph> {
    let graph = AssetGraph::from_manifest_file(manifest)
        .with_context(|| format!("Failed to load asset manifest {}", manifest.display()))?;
    let local = asset_specs()
        .iter()
        .map(|spec| AssetNode::from_spec(spec, MULTI_ASSET_NAME, false))
        .collect::<Vec<_>>();
    Ok(graph.with_assets(local)?)
}

fn find_schedule(schedules: Vec<ScheduleDefinition>, name: &str) -> Result<ScheduleDefinition> {
    let known: Vec<String> = schedules.iter().map(|s| s.name.clone()).collect();
    schedules
        .into_iter()
        .find(|s| s.name == name)
        .ok_or_else(|| anyhow!("Unknown schedule '{}'. Known schedules: {}", name, known.join(", ")))
}

fn describe_selection(job: &JobDefinition, graph: &AssetGraph) -> String {
    match job.resolve(graph) {
        Ok(keys) => {
            let keys: Vec<String> = keys.iter().map(ToString::to_string).collect();
            format!("    {} asset(s): {}", keys.len().to_string().green(), keys.join(", "))
        }
        Err(e) => format!("    {}", e.to_string().red()),
    }
}

/// Schedules with their next tick and resolved selection, then the jobs that
/// can also be launched on their own.
fn listing(graph: &AssetGraph, now: DateTime<Utc>) -> Result<String> {
    let mut lines = Vec::new();
    for schedule in definitions::schedules()? {
        let next = schedule
            .next_tick_after(now)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        lines.push(format!(
            "{} [{} {}] job={} next={}",
            schedule.name.bold(),
            schedule.cron_schedule,
            schedule.execution_timezone,
            schedule.job.name,
            next
        ));
        lines.push(describe_selection(&schedule.job, graph));
    }

    lines.push(format!("{}", "Jobs".bold()));
    for job in definitions::scheduled_jobs() {
        let partitioned = if job.partitions.is_some() { " (daily partitions)" } else { "" };
        lines.push(format!("{}{}", job.name, partitioned));
        lines.push(describe_selection(&job, graph));
    }
    Ok(lines.join("\n"))
}

/// Evaluates one tick, drops already submitted run keys and queues the rest.
///
/// Run keys are recorded only once their requests are in the queue, so a failed
/// queue write leaves the partition available to the next tick.
async fn tick(
    schedule: &ScheduleDefinition,
    graph: &AssetGraph,
    ledger: &Mutex<RunKeyLedger>,
    paths: &RunPaths,
    at: DateTime<Utc>,
) -> Result<usize> {
    let requests = schedule.evaluate(&ScheduleEvaluationContext {
        graph,
        scheduled_execution_time: at,
    })?;

    let mut ledger = ledger.lock().await;
    let accepted = ledger.pending(requests);
    append_to_queue(&paths.queue, &accepted).await?;

    ledger.record(&accepted);
    if accepted.iter().any(|r| r.run_key.is_some()) {
        ledger.save(&paths.ledger)?;
    }
    Ok(accepted.len())
}

async fn append_to_queue(queue: &Path, requests: &[RunRequest]) -> Result<()> {
    if requests.is_empty() {
        return Ok(());
    }
    let mut lines = String::new();
    for request in requests {
        lines.push_str(&serde_json::to_string(request)?);
        lines.push('\n');
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(queue)
        .await
        .with_context(|| format!("Failed to open run queue {}", queue.display()))?;
    file.write_all(lines.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

async fn run(graph: AssetGraph, paths: RunPaths) -> Result<()> {
    let graph = Arc::new(graph);
    let ledger = Arc::new(Mutex::new(RunKeyLedger::load(&paths.ledger)?));
    let paths = Arc::new(paths);

    let mut scheduler = JobScheduler::new()
        .await
        .map_err(|e| anyhow!("Failed to create job scheduler: {:?}", e))?;

    for schedule in definitions::schedules()? {
        let cron = schedule.six_field_cron();
        let timezone = schedule.execution_timezone;
        let name = schedule.name.clone();
        let schedule = Arc::new(schedule);
        let (graph, ledger, paths) = (graph.clone(), ledger.clone(), paths.clone());

        let job = JobBuilder::new()
            .with_timezone(timezone)
            .with_cron_job_type()
            .with_schedule(cron.as_str())
            .map_err(|e| anyhow!("Invalid schedule {} ({}): {:?}", name, cron, e))?
            .with_run_async(Box::new(move |_uuid, _lock| {
                let (schedule, graph, ledger, paths) =
                    (schedule.clone(), graph.clone(), ledger.clone(), paths.clone());
                Box::pin(async move {
                    let at = Utc::now()
                        .duration_trunc(chrono::Duration::minutes(1))
                        .unwrap_or_else(|_| Utc::now());
                    match tick(&schedule, &graph, &ledger, &paths, at).await {
                        Ok(0) => info!(schedule = %schedule.name, %at, "Tick produced no new runs"),
                        Ok(count) => info!(schedule = %schedule.name, %at, count, "Run requests queued"),
                        Err(e) => error!(schedule = %schedule.name, %at, "Tick failed: {:#}", e),
                    }
                })
            }))
            .build()
            .map_err(|e| anyhow!("Failed to build job {}: {:?}", name, e))?;

        scheduler
            .add(job)
            .await
            .map_err(|e| anyhow!("Failed to register {}: {:?}", name, e))?;
        info!(schedule = %name, %cron, %timezone, "Schedule registered");
    }

    scheduler
        .start()
        .await
        .map_err(|e| anyhow!("Failed to start job scheduler: {:?}", e))?;
    info!(queue = %paths.queue.display(), "Scheduler running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    warn!("Shutdown requested");
    scheduler
        .shutdown()
        .await
        .map_err(|e| anyhow!("Failed to stop job scheduler: {:?}", e))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _guard = setup_logging(&LoggingOptions::from_env("platform_scheduler"))
        .context("Failed to initialize logging")?;

    let graph = load_graph(&cli.manifest)?;
    info!(assets = graph.len(), "Asset graph loaded");

    match cli.command {
        Command::List => {
            println!("{}", listing(&graph, Utc::now())?);
            Ok(())
        }
        Command::Evaluate { schedule, at } => {
            let schedule = find_schedule(definitions::schedules()?, &schedule)?;
            let at = at.unwrap_or_else(Utc::now);
            let requests = schedule.evaluate(&ScheduleEvaluationContext {
                graph: &graph,
                scheduled_execution_time: at,
            })?;
            if requests.is_empty() {
                println!("{}", "No run requested for this tick".yellow());
            }
            println!("{}", serde_json::to_string_pretty(&requests)?);
            Ok(())
        }
        Command::Run { queue, ledger } => {
            if graph.is_empty() {
                bail!("Refusing to run with an empty asset graph");
            }
            run(graph, RunPaths { queue, ledger }).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const MANIFEST: &str = r#"{ "assets": [
        { "key": "github_issues", "group_name": "support_bot" },
        { "key": ["purina", "usage_raw"], "group_name": "cloud_product_high_volume_ingest" },
        { "key": "stg_usage", "deps": [["purina", "usage_raw"]],
          "dbt": { "name": "stg_usage", "fqn": ["cloud_analytics", "staging", "stg_usage"], "tags": ["insights"] } },
        { "key": "usage_metrics", "deps": ["stg_usage"],
          "dbt": { "name": "usage_metrics", "fqn": ["cloud_analytics", "marts", "usage_metrics"] } }
    ] }"#;

    fn fixture() -> (tempfile::TempDir, AssetGraph, RunPaths) {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("manifest.json");
        std::fs::write(&manifest, MANIFEST).unwrap();
        let graph = load_graph(&manifest).unwrap();
        let paths = RunPaths {
            queue: dir.path().join("queue.jsonl"),
            ledger: dir.path().join("run_keys.json"),
        };
        (dir, graph, paths)
    }

    fn queued(paths: &RunPaths) -> Vec<RunRequest> {
        std::fs::read_to_string(&paths.queue)
            .unwrap_or_default()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_graph_includes_local_multi_asset() {
        let (_dir, graph, _) = fixture();
        assert_eq!(graph.len(), 8);
        assert!(graph.contains(&"thinkific_dlt_users".into()));
    }

    #[tokio::test]
    async fn test_latest_partition_tick_is_queued_once() {
        let (_dir, graph, paths) = fixture();
        let schedule = find_schedule(definitions::schedules().unwrap(), "cloud_usage_metrics_schedule").unwrap();
        let ledger = Mutex::new(RunKeyLedger::load(&paths.ledger).unwrap());
        let at = Utc.with_ymd_and_hms(2024, 6, 2, 3, 0, 0).unwrap();

        assert_eq!(tick(&schedule, &graph, &ledger, &paths, at).await.unwrap(), 1);
        assert_eq!(tick(&schedule, &graph, &ledger, &paths, at).await.unwrap(), 0);

        let requests = queued(&paths);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].partition_key.as_deref(), Some("2024-06-01"));
        assert_eq!(requests[0].run_key.as_deref(), Some("2024-06-01"));
        // High volume ingestion and the purina prefix are carved out of the selection.
        assert!(!requests[0].asset_selection.contains(&"purina/usage_raw".into()));
        assert!(requests[0].asset_selection.contains(&"usage_metrics".into()));

        // A restarted scheduler still remembers the key.
        let restarted = Mutex::new(RunKeyLedger::load(&paths.ledger).unwrap());
        assert_eq!(tick(&schedule, &graph, &restarted, &paths, at).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_queue_write_keeps_partition_for_next_tick() {
        let (dir, graph, paths) = fixture();
        let schedule = find_schedule(definitions::schedules().unwrap(), "cloud_usage_metrics_schedule").unwrap();
        let ledger = Mutex::new(RunKeyLedger::load(&paths.ledger).unwrap());
        let at = Utc.with_ymd_and_hms(2024, 6, 2, 3, 0, 0).unwrap();

        // A directory cannot be opened for appending.
        let unwritable = RunPaths {
            queue: dir.path().to_path_buf(),
            ledger: paths.ledger.clone(),
        };
        assert!(tick(&schedule, &graph, &ledger, &unwritable, at).await.is_err());
        assert!(!ledger.lock().await.is_submitted("cloud_usage_metrics_schedule", "2024-06-01"));
        assert!(!paths.ledger.exists());

        assert_eq!(tick(&schedule, &graph, &ledger, &paths, at).await.unwrap(), 1);
        let requests = queued(&paths);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].run_key.as_deref(), Some("2024-06-01"));
        assert!(RunKeyLedger::load(&paths.ledger)
            .unwrap()
            .is_submitted("cloud_usage_metrics_schedule", "2024-06-01"));
    }

    #[tokio::test]
    async fn test_plain_schedule_queues_every_tick() {
        let (_dir, graph, paths) = fixture();
        let schedule = find_schedule(definitions::schedules().unwrap(), "support_bot_schedule").unwrap();
        let ledger = Mutex::new(RunKeyLedger::new());
        let at = Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap();

        tick(&schedule, &graph, &ledger, &paths, at).await.unwrap();
        tick(&schedule, &graph, &ledger, &paths, at).await.unwrap();

        assert_eq!(queued(&paths).len(), 2);
        assert!(!paths.ledger.exists());
    }

    #[tokio::test]
    async fn test_selection_naming_missing_assets_fails_the_tick() {
        let (_dir, graph, paths) = fixture();
        let schedule = find_schedule(definitions::schedules().unwrap(), "purina_clone_cleanup_schedule").unwrap();
        let ledger = Mutex::new(RunKeyLedger::new());

        let err = tick(&schedule, &graph, &ledger, &paths, Utc::now()).await.unwrap_err();
        assert!(err.to_string().contains("inactive_snowflake_clones"));
        assert!(queued(&paths).is_empty());
    }

    #[test]
    fn test_listing_shows_schedules_and_standalone_jobs() {
        let (_dir, graph, _) = fixture();
        let out = listing(&graph, Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap()).unwrap();

        assert!(out.contains("cloud_usage_metrics_schedule"));
        assert!(out.contains("next=2024-06-02T03:00:00+00:00"));
        let jobs = &out[out.find("Jobs").unwrap()..];
        assert!(jobs.contains("insights_job (daily partitions)"));
        assert!(jobs.contains("support_bot_job"));
        assert!(jobs.contains("github_issues"));
    }

    #[test]
    fn test_unknown_schedule_lists_known_names() {
        let err = find_schedule(definitions::schedules().unwrap(), "nope").unwrap_err();
        assert!(err.to_string().contains("support_bot_schedule"));
    }
}
