//! # Asset Graph
//!
//! The dependency DAG the selection algebra runs over. Most of it is defined
//! outside this workspace and loaded from a JSON manifest:
//!
//! ```json
//! { "assets": [
//!     { "key": ["purina", "orgs"], "group_name": "purina", "deps": [] },
//!     { "key": "dim_orgs", "deps": [["purina", "orgs"]],
//!       "dbt": { "name": "dim_orgs", "fqn": ["cloud_analytics", "dims", "dim_orgs"], "tags": ["insights"] } }
//! ] }
//! ```
//!
//! Locally defined assets are added on top with [`AssetGraph::with_assets`].

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::assets::{AssetKey, AssetSpec};

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Failed to read asset manifest {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse asset manifest: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Asset {0} is defined more than once")]
    DuplicateAsset(AssetKey),

    #[error("Asset dependency cycle through {0}")]
    Cycle(AssetKey),
}

/// dbt model information attached to assets built by dbt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbtInfo {
    pub name: String,
    #[serde(default)]
    pub fqn: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Membership of an asset in an operation producing several assets at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiAssetMembership {
    pub name: String,
    /// Whether members can be materialized individually.
    #[serde(default)]
    pub can_subset: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetNode {
    pub key: AssetKey,
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub deps: Vec<AssetKey>,
    #[serde(default)]
    pub dbt: Option<DbtInfo>,
    #[serde(default)]
    pub multi_asset: Option<MultiAssetMembership>,
}

impl AssetNode {
    pub fn new(key: impl Into<AssetKey>) -> Self {
        Self {
            key: key.into(),
            group_name: None,
            tags: BTreeMap::new(),
            deps: Vec::new(),
            dbt: None,
            multi_asset: None,
        }
    }

    /// Node for a locally declared spec produced by the multi-asset `op_name`.
    pub fn from_spec(spec: &AssetSpec, op_name: &str, can_subset: bool) -> Self {
        Self {
            key: spec.key.clone(),
            group_name: spec.group_name.clone(),
            tags: spec.tags.clone(),
            deps: spec.deps.clone(),
            dbt: None,
            multi_asset: Some(MultiAssetMembership {
                name: op_name.to_string(),
                can_subset,
            }),
        }
    }

    pub fn with_group(mut self, group: &str) -> Self {
        self.group_name = Some(group.to_string());
        self
    }

    pub fn with_deps<I, K>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<AssetKey>,
    {
        self.deps.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_dbt(mut self, name: &str, fqn: &[&str], tags: &[&str]) -> Self {
        self.dbt = Some(DbtInfo {
            name: name.to_string(),
            fqn: fqn.iter().map(|s| s.to_string()).collect(),
            tags: tags.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    pub fn in_multi_asset(mut self, name: &str, can_subset: bool) -> Self {
        self.multi_asset = Some(MultiAssetMembership {
            name: name.to_string(),
            can_subset,
        });
        self
    }
}

#[derive(Debug, Deserialize)]
struct Manifest {
    assets: Vec<AssetNode>,
}

/// Acyclic asset dependency graph.
///
/// Dependencies on keys that are not part of the graph are kept on the node
/// but ignored by traversals.
#[derive(Debug, Clone, Default)]
pub struct AssetGraph {
    nodes: BTreeMap<AssetKey, AssetNode>,
    children: BTreeMap<AssetKey, BTreeSet<AssetKey>>,
}

impl AssetGraph {
    pub fn new(nodes: Vec<AssetNode>) -> Result<Self, GraphError> {
        AssetGraph::default().with_assets(nodes)
    }

    pub fn from_manifest_str(manifest: &str) -> Result<Self, GraphError> {
        let manifest: Manifest = serde_json::from_str(manifest)?;
        AssetGraph::new(manifest.assets)
    }

    pub fn from_manifest_file(path: impl AsRef<Path>) -> Result<Self, GraphError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| GraphError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let graph = AssetGraph::from_manifest_str(&text)?;
        debug!(path = %path.display(), assets = graph.len(), "asset manifest loaded");
        Ok(graph)
    }

    /// Adds nodes and re-validates the whole graph.
    pub fn with_assets(mut self, nodes: impl IntoIterator<Item = AssetNode>) -> Result<Self, GraphError> {
        for node in nodes {
            if self.nodes.contains_key(&node.key) {
                return Err(GraphError::DuplicateAsset(node.key));
            }
            self.nodes.insert(node.key.clone(), node);
        }
        self.rebuild_children();
        self.check_acyclic()?;
        Ok(self)
    }

    fn rebuild_children(&mut self) {
        self.children.clear();
        for node in self.nodes.values() {
            for dep in node.deps.iter().filter(|d| self.nodes.contains_key(*d)) {
                self.children
                    .entry(dep.clone())
                    .or_default()
                    .insert(node.key.clone());
            }
        }
    }

    /// Kahn's algorithm; whatever cannot be ordered sits on a cycle.
    fn check_acyclic(&self) -> Result<(), GraphError> {
        let mut in_degree: BTreeMap<&AssetKey, usize> = self
            .nodes
            .keys()
            .map(|key| (key, self.parents(key).count()))
            .collect();
        let mut ready: VecDeque<&AssetKey> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(key, _)| *key)
            .collect();

        let mut ordered = 0;
        while let Some(key) = ready.pop_front() {
            ordered += 1;
            for child in self.children(key) {
                if let Some(degree) = in_degree.get_mut(child) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push_back(child);
                    }
                }
            }
        }

        if ordered == self.nodes.len() {
            return Ok(());
        }
        let stuck = in_degree
            .into_iter()
            .find(|(_, degree)| *degree > 0)
            .map(|(key, _)| key.clone());
        match stuck {
            Some(key) => Err(GraphError::Cycle(key)),
            None => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, key: &AssetKey) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn get(&self, key: &AssetKey) -> Option<&AssetNode> {
        self.nodes.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &AssetKey> {
        self.nodes.keys()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &AssetNode> {
        self.nodes.values()
    }

    /// Direct upstream dependencies that are part of the graph.
    pub fn parents<'a>(&'a self, key: &AssetKey) -> impl Iterator<Item = &'a AssetKey> + 'a {
        self.nodes
            .get(key)
            .into_iter()
            .flat_map(|node| node.deps.iter())
            .filter(move |dep| self.nodes.contains_key(*dep))
    }

    /// Direct downstream dependents.
    pub fn children<'a>(&'a self, key: &AssetKey) -> impl Iterator<Item = &'a AssetKey> + 'a {
        self.children.get(key).into_iter().flatten()
    }

    /// Every other member of the multi-asset `key` belongs to, when that
    /// multi-asset cannot be subset.
    pub fn required_neighbors(&self, key: &AssetKey) -> Vec<&AssetKey> {
        let Some(membership) = self.nodes.get(key).and_then(|n| n.multi_asset.as_ref()) else {
            return Vec::new();
        };
        if membership.can_subset {
            return Vec::new();
        }
        self.nodes
            .values()
            .filter(|node| node.key != *key)
            .filter(|node| node.multi_asset.as_ref().map(|m| &m.name) == Some(&membership.name))
            .map(|node| &node.key)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_parses_both_key_forms() {
        let graph = AssetGraph::from_manifest_str(
            r#"{ "assets": [
                { "key": ["purina", "orgs"], "group_name": "purina" },
                { "key": "dim_orgs", "deps": ["purina/orgs"],
                  "dbt": { "name": "dim_orgs", "fqn": ["cloud_analytics", "dim_orgs"], "tags": ["insights"] } }
            ] }"#,
        )
        .unwrap();

        assert_eq!(graph.len(), 2);
        let parents: Vec<String> = graph
            .parents(&AssetKey::from("dim_orgs"))
            .map(ToString::to_string)
            .collect();
        assert_eq!(parents, vec!["purina/orgs"]);
        let children: Vec<String> = graph
            .children(&AssetKey::from("purina/orgs"))
            .map(ToString::to_string)
            .collect();
        assert_eq!(children, vec!["dim_orgs"]);
    }

    #[test]
    fn test_duplicate_keys_are_rejected() {
        let err = AssetGraph::new(vec![AssetNode::new("a"), AssetNode::new("a")]).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateAsset(key) if key.to_string() == "a"));
    }

    #[test]
    fn test_cycles_are_rejected() {
        let err = AssetGraph::new(vec![
            AssetNode::new("a").with_deps(["c"]),
            AssetNode::new("b").with_deps(["a"]),
            AssetNode::new("c").with_deps(["b"]),
            AssetNode::new("d"),
        ])
        .unwrap_err();
        assert!(matches!(err, GraphError::Cycle(_)));
    }

    #[test]
    fn test_external_deps_are_ignored_by_traversal() {
        let graph = AssetGraph::new(vec![AssetNode::new("a").with_deps(["not_in_graph"])]).unwrap();
        assert_eq!(graph.parents(&AssetKey::from("a")).count(), 0);
    }

    #[test]
    fn test_required_neighbors_only_for_non_subsettable() {
        let graph = AssetGraph::new(vec![
            AssetNode::new("x1").in_multi_asset("fixed", false),
            AssetNode::new("x2").in_multi_asset("fixed", false),
            AssetNode::new("y1").in_multi_asset("flexible", true),
            AssetNode::new("y2").in_multi_asset("flexible", true),
        ])
        .unwrap();

        let fixed: Vec<String> = graph
            .required_neighbors(&AssetKey::from("x1"))
            .into_iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(fixed, vec!["x2"]);
        assert!(graph.required_neighbors(&AssetKey::from("y1")).is_empty());
    }
}
