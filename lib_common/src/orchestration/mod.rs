//! # Orchestration Module
//!
//! Asset graph, selection algebra, partitions, jobs and schedules.
//!
//! ## Contained Modules:
//!
//! - **`graph`**: the asset dependency DAG, loaded from a JSON manifest.
//! - **`selection`**: set algebra over the graph (`|`, `-`, `&`, upstream,
//!   downstream, required multi-asset neighbours, dbt selectors).
//! - **`partitions`**: daily partitions and the `PartitionRegistry` seam.
//! - **`jobs`**: named selections with run tags.
//! - **`schedules`**: cron triggers and their tick evaluators.
//! - **`run_keys`**: per-schedule run-key deduplication.
//! - **`definitions`**: the platform's concrete jobs and schedules.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod definitions;
pub mod graph;
pub mod jobs;
pub mod partitions;
pub mod run_keys;
pub mod schedules;
pub mod selection;

pub use graph::{AssetGraph, AssetNode, DbtInfo, GraphError, MultiAssetMembership};
pub use jobs::JobDefinition;
pub use partitions::{DailyPartitionsDefinition, PartitionRegistry};
pub use run_keys::{RunKeyError, RunKeyLedger};
pub use schedules::{
    RunRequest, ScheduleDefinition, ScheduleError, ScheduleEvaluationContext, ScheduleKind,
};
pub use selection::{AssetSelection, SelectionError};
