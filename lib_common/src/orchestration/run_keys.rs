//! Run-key deduplication.
//!
//! Remembers, per schedule, every run key already submitted and drops
//! requests that repeat one. Requests without a run key always pass.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::schedules::RunRequest;

#[derive(Debug, Error)]
pub enum RunKeyError {
    #[error("Run key ledger IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Run key ledger is corrupt: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunKeyLedger {
    submitted: BTreeMap<String, BTreeSet<String>>,
}

impl RunKeyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_submitted(&self, schedule: &str, run_key: &str) -> bool {
        self.submitted
            .get(schedule)
            .is_some_and(|keys| keys.contains(run_key))
    }

    /// The requests whose run key has not been submitted yet, without recording
    /// anything. A key repeated within `requests` passes once.
    pub fn pending(&self, requests: Vec<RunRequest>) -> Vec<RunRequest> {
        let mut seen: BTreeSet<(String, String)> = BTreeSet::new();
        requests
            .into_iter()
            .filter(|request| match &request.run_key {
                None => true,
                Some(run_key) if self.is_submitted(&request.schedule_name, run_key) => {
                    debug!(schedule = %request.schedule_name, %run_key, "duplicate run key skipped");
                    false
                }
                Some(run_key) => seen.insert((request.schedule_name.clone(), run_key.clone())),
            })
            .collect()
    }

    /// Marks the run keys of requests that have been queued as submitted.
    pub fn record(&mut self, requests: &[RunRequest]) {
        for request in requests {
            if let Some(run_key) = &request.run_key {
                self.submitted
                    .entry(request.schedule_name.clone())
                    .or_default()
                    .insert(run_key.clone());
            }
        }
    }

    /// Reads a ledger saved by [`RunKeyLedger::save`]. A missing file is an empty ledger.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RunKeyError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(source) => Err(RunKeyError::Io {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), RunKeyError> {
        let path = path.as_ref();
        let io_error = |source| RunKeyError::Io {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?).map_err(io_error)?;
        info!(path = %path.display(), "run key ledger saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn request(schedule: &str, run_key: Option<&str>) -> RunRequest {
        RunRequest {
            schedule_name: schedule.to_string(),
            job_name: "job".to_string(),
            run_key: run_key.map(str::to_string),
            partition_key: run_key.map(str::to_string),
            tags: Default::default(),
            asset_selection: Vec::new(),
            scheduled_execution_time: Utc::now(),
        }
    }

    #[test]
    fn test_recorded_key_is_no_longer_pending() {
        let mut ledger = RunKeyLedger::new();
        let first = ledger.pending(vec![request("cloud_usage", Some("2024-03-09"))]);
        assert_eq!(first.len(), 1);
        assert!(!ledger.is_submitted("cloud_usage", "2024-03-09"));

        ledger.record(&first);
        assert!(ledger.is_submitted("cloud_usage", "2024-03-09"));
        assert!(ledger.pending(vec![request("cloud_usage", Some("2024-03-09"))]).is_empty());
        assert_eq!(ledger.pending(vec![request("cloud_usage", Some("2024-03-10"))]).len(), 1);
    }

    #[test]
    fn test_pending_without_record_keeps_key_available() {
        let ledger = RunKeyLedger::new();
        assert_eq!(ledger.pending(vec![request("cloud_usage", Some("2024-03-09"))]).len(), 1);
        assert_eq!(ledger.pending(vec![request("cloud_usage", Some("2024-03-09"))]).len(), 1);
    }

    #[test]
    fn test_keys_are_scoped_per_schedule() {
        let ledger = RunKeyLedger::new();
        let pending = ledger.pending(vec![
            request("a", Some("2024-03-09")),
            request("b", Some("2024-03-09")),
            request("a", Some("2024-03-09")),
        ]);
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn test_requests_without_key_always_pass() {
        let mut ledger = RunKeyLedger::new();
        let pending = ledger.pending(vec![request("a", None), request("a", None)]);
        ledger.record(&pending);
        assert_eq!(ledger.pending(vec![request("a", None), request("a", None)]).len(), 2);
    }

    #[test]
    fn test_save_and_load_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("run_keys.json");

        assert_eq!(RunKeyLedger::load(&path).unwrap(), RunKeyLedger::new());

        let mut ledger = RunKeyLedger::new();
        ledger.record(&[request("cloud_usage", Some("2024-03-09"))]);
        ledger.save(&path).unwrap();

        let reloaded = RunKeyLedger::load(&path).unwrap();
        assert!(reloaded.pending(vec![request("cloud_usage", Some("2024-03-09"))]).is_empty());
    }
}
