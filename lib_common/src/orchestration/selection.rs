//! # Asset Selection Algebra
//!
//! A selection is an expression tree that resolves to a set of asset keys
//! against an [`AssetGraph`]. Leaves pick assets by key, group, key prefix,
//! tag or dbt selector; `|`, `-` and `&` combine selections, and the graph
//! operators widen them along dependency edges.

use std::collections::{BTreeSet, VecDeque};
use std::ops::{BitAnd, BitOr, Sub};

use thiserror::Error;

use super::graph::{AssetGraph, AssetNode};
use crate::assets::AssetKey;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("Selection references unknown asset {0}")]
    UnknownAsset(AssetKey),

    #[error("Unsupported dbt selector '{0}'")]
    UnsupportedDbtSelector(String),

    #[error("Selection {0} resolved to no assets")]
    Empty(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Upstream,
    Downstream,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetSelection {
    All,
    Keys(Vec<AssetKey>),
    Groups(Vec<String>),
    KeyPrefixes(Vec<Vec<String>>),
    Tag { key: String, value: String },
    Dbt(String),
    Upstream { inner: Box<AssetSelection>, depth: Option<usize> },
    Downstream { inner: Box<AssetSelection>, depth: Option<usize> },
    RequiredMultiAssetNeighbors(Box<AssetSelection>),
    Union(Box<AssetSelection>, Box<AssetSelection>),
    Difference(Box<AssetSelection>, Box<AssetSelection>),
    Intersection(Box<AssetSelection>, Box<AssetSelection>),
}

impl AssetSelection {
    pub fn all() -> Self {
        AssetSelection::All
    }

    pub fn keys<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<AssetKey>,
    {
        AssetSelection::Keys(keys.into_iter().map(Into::into).collect())
    }

    pub fn groups<I, S>(groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AssetSelection::Groups(groups.into_iter().map(Into::into).collect())
    }

    /// Each prefix is a single leading key segment or a slash-separated path.
    pub fn key_prefixes<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        AssetSelection::KeyPrefixes(
            prefixes
                .into_iter()
                .map(|p| AssetKey::from_user_string(p.as_ref()).path().to_vec())
                .collect(),
        )
    }

    pub fn tag(key: &str, value: &str) -> Self {
        AssetSelection::Tag {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    /// dbt-built assets matching a dbt `--select` string.
    ///
    /// Supported: `fqn:*`, `fqn:<dotted prefix>` with an optional trailing
    /// `.*`, `tag:<tag>`, bare model names, and space-separated unions of those.
    pub fn dbt(select: &str) -> Self {
        AssetSelection::Dbt(select.to_string())
    }

    /// Adds every transitive upstream dependency.
    pub fn upstream(self) -> Self {
        AssetSelection::Upstream { inner: Box::new(self), depth: None }
    }

    pub fn upstream_depth(self, depth: usize) -> Self {
        AssetSelection::Upstream { inner: Box::new(self), depth: Some(depth) }
    }

    /// Adds every transitive downstream dependent.
    pub fn downstream(self) -> Self {
        AssetSelection::Downstream { inner: Box::new(self), depth: None }
    }

    pub fn downstream_depth(self, depth: usize) -> Self {
        AssetSelection::Downstream { inner: Box::new(self), depth: Some(depth) }
    }

    /// Adds the co-members of any non-subsettable multi-asset in the selection.
    pub fn required_multi_asset_neighbors(self) -> Self {
        AssetSelection::RequiredMultiAssetNeighbors(Box::new(self))
    }

    pub fn resolve(&self, graph: &AssetGraph) -> Result<BTreeSet<AssetKey>, SelectionError> {
        match self {
            AssetSelection::All => Ok(graph.keys().cloned().collect()),
            AssetSelection::Keys(keys) => keys
                .iter()
                .map(|key| {
                    if graph.contains(key) {
                        Ok(key.clone())
                    } else {
                        Err(SelectionError::UnknownAsset(key.clone()))
                    }
                })
                .collect(),
            AssetSelection::Groups(groups) => Ok(matching(graph, |node| {
                node.group_name.as_ref().is_some_and(|g| groups.contains(g))
            })),
            AssetSelection::KeyPrefixes(prefixes) => Ok(matching(graph, |node| {
                prefixes.iter().any(|prefix| node.key.has_prefix(prefix))
            })),
            AssetSelection::Tag { key, value } => Ok(matching(graph, |node| {
                node.tags.get(key) == Some(value)
            })),
            AssetSelection::Dbt(select) => resolve_dbt(graph, select),
            AssetSelection::Upstream { inner, depth } => {
                Ok(traverse(graph, inner.resolve(graph)?, Direction::Upstream, *depth))
            }
            AssetSelection::Downstream { inner, depth } => {
                Ok(traverse(graph, inner.resolve(graph)?, Direction::Downstream, *depth))
            }
            AssetSelection::RequiredMultiAssetNeighbors(inner) => {
                let mut selected = inner.resolve(graph)?;
                let neighbors: Vec<AssetKey> = selected
                    .iter()
                    .flat_map(|key| graph.required_neighbors(key))
                    .cloned()
                    .collect();
                selected.extend(neighbors);
                Ok(selected)
            }
            AssetSelection::Union(left, right) => {
                let mut keys = left.resolve(graph)?;
                keys.extend(right.resolve(graph)?);
                Ok(keys)
            }
            AssetSelection::Difference(left, right) => {
                let removed = right.resolve(graph)?;
                Ok(left
                    .resolve(graph)?
                    .into_iter()
                    .filter(|key| !removed.contains(key))
                    .collect())
            }
            AssetSelection::Intersection(left, right) => {
                let right = right.resolve(graph)?;
                Ok(left
                    .resolve(graph)?
                    .into_iter()
                    .filter(|key| right.contains(key))
                    .collect())
            }
        }
    }

    /// Like [`AssetSelection::resolve`], but an empty result is an error.
    pub fn resolve_non_empty(&self, graph: &AssetGraph) -> Result<BTreeSet<AssetKey>, SelectionError> {
        let keys = self.resolve(graph)?;
        if keys.is_empty() {
            return Err(SelectionError::Empty(format!("{:?}", self)));
        }
        Ok(keys)
    }
}

impl BitOr for AssetSelection {
    type Output = AssetSelection;

    fn bitor(self, rhs: Self) -> Self::Output {
        AssetSelection::Union(Box::new(self), Box::new(rhs))
    }
}

impl Sub for AssetSelection {
    type Output = AssetSelection;

    fn sub(self, rhs: Self) -> Self::Output {
        AssetSelection::Difference(Box::new(self), Box::new(rhs))
    }
}

impl BitAnd for AssetSelection {
    type Output = AssetSelection;

    fn bitand(self, rhs: Self) -> Self::Output {
        AssetSelection::Intersection(Box::new(self), Box::new(rhs))
    }
}

fn matching(graph: &AssetGraph, predicate: impl Fn(&AssetNode) -> bool) -> BTreeSet<AssetKey> {
    graph
        .nodes()
        .filter(|node| predicate(node))
        .map(|node| node.key.clone())
        .collect()
}

/// Breadth-first walk from `start`. The start set is always part of the result.
fn traverse(
    graph: &AssetGraph,
    start: BTreeSet<AssetKey>,
    direction: Direction,
    depth: Option<usize>,
) -> BTreeSet<AssetKey> {
    let mut queue: VecDeque<(AssetKey, usize)> = start.iter().map(|k| (k.clone(), 0)).collect();
    let mut visited = start;

    while let Some((key, distance)) = queue.pop_front() {
        if depth.is_some_and(|max| distance >= max) {
            continue;
        }
        let next: Vec<&AssetKey> = match direction {
            Direction::Upstream => graph.parents(&key).collect(),
            Direction::Downstream => graph.children(&key).collect(),
        };
        for neighbor in next {
            if visited.insert(neighbor.clone()) {
                queue.push_back((neighbor.clone(), distance + 1));
            }
        }
    }
    visited
}

fn resolve_dbt(graph: &AssetGraph, select: &str) -> Result<BTreeSet<AssetKey>, SelectionError> {
    let mut keys = BTreeSet::new();
    for term in select.split_whitespace() {
        let matcher = DbtTerm::parse(term)?;
        keys.extend(
            graph
                .nodes()
                .filter(|node| node.dbt.as_ref().is_some_and(|dbt| matcher.matches(dbt)))
                .map(|node| node.key.clone()),
        );
    }
    Ok(keys)
}

enum DbtTerm<'a> {
    AnyModel,
    FqnPrefix(Vec<&'a str>),
    Tag(&'a str),
    Name(&'a str),
}

impl<'a> DbtTerm<'a> {
    fn parse(term: &'a str) -> Result<Self, SelectionError> {
        match term.split_once(':') {
            Some(("fqn", "*")) => Ok(DbtTerm::AnyModel),
            Some(("fqn", path)) => {
                let path = path.strip_suffix(".*").unwrap_or(path);
                if path.is_empty() || path.contains('*') {
                    return Err(SelectionError::UnsupportedDbtSelector(term.to_string()));
                }
                Ok(DbtTerm::FqnPrefix(path.split('.').collect()))
            }
            Some(("tag", tag)) if !tag.is_empty() => Ok(DbtTerm::Tag(tag)),
            None if !term.contains(['+', '@', '*', ',']) => Ok(DbtTerm::Name(term)),
            _ => Err(SelectionError::UnsupportedDbtSelector(term.to_string())),
        }
    }

    fn matches(&self, dbt: &super::graph::DbtInfo) -> bool {
        match self {
            DbtTerm::AnyModel => true,
            DbtTerm::FqnPrefix(prefix) => {
                // A single segment also matches the model name, as dbt does.
                dbt.fqn.len() >= prefix.len() && dbt.fqn.iter().zip(prefix).all(|(a, b)| a == b)
                    || prefix.len() == 1 && dbt.name == prefix[0]
            }
            DbtTerm::Tag(tag) => dbt.tags.iter().any(|t| t == tag),
            DbtTerm::Name(name) => dbt.name == *name,
        }
    }
}
