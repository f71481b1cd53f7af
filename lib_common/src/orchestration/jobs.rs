//! Asset jobs: a named selection with run tags and optional partitions.

use std::collections::{BTreeMap, BTreeSet};

use super::graph::AssetGraph;
use super::partitions::DailyPartitionsDefinition;
use super::selection::{AssetSelection, SelectionError};
use crate::assets::AssetKey;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDefinition {
    pub name: String,
    pub selection: AssetSelection,
    pub tags: BTreeMap<String, String>,
    pub partitions: Option<DailyPartitionsDefinition>,
}

impl JobDefinition {
    pub fn new(name: &str, selection: AssetSelection) -> Self {
        Self {
            name: name.to_string(),
            selection,
            tags: BTreeMap::new(),
            partitions: None,
        }
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_partitions(mut self, partitions: DailyPartitionsDefinition) -> Self {
        self.partitions = Some(partitions);
        self
    }

    /// The assets this job would materialize. Never empty.
    pub fn resolve(&self, graph: &AssetGraph) -> Result<BTreeSet<AssetKey>, SelectionError> {
        self.selection.resolve_non_empty(graph)
    }
}
