//! # Assets Module
//!
//! Orchestration-facing vocabulary: asset keys, the declared specs of locally
//! defined assets, and the materialization records reported after a run.
//!
//! ## Contained Modules:
//!
//! - **`thinkific_pipeline`**: the multi-asset wrapping the course platform
//!   ingestion pipeline.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[cfg(feature = "ingest")]
pub mod thinkific_pipeline;

/// Path identifying an asset, displayed as `a/b/c`.
///
/// Deserializes from either a list of segments or a slash-separated string;
/// always serializes as a list.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "AssetKeyRepr", into = "Vec<String>")]
pub struct AssetKey(Vec<String>);

#[derive(Deserialize)]
#[serde(untagged)]
enum AssetKeyRepr {
    Path(Vec<String>),
    Slashed(String),
}

impl From<AssetKeyRepr> for AssetKey {
    fn from(repr: AssetKeyRepr) -> Self {
        match repr {
            AssetKeyRepr::Path(path) => AssetKey(path),
            AssetKeyRepr::Slashed(s) => AssetKey::from_user_string(&s),
        }
    }
}

impl From<AssetKey> for Vec<String> {
    fn from(key: AssetKey) -> Self {
        key.0
    }
}

impl AssetKey {
    pub fn new<I, S>(path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AssetKey(path.into_iter().map(Into::into).collect())
    }

    /// Parses the `a/b/c` form.
    pub fn from_user_string(s: &str) -> Self {
        AssetKey::new(s.split('/').filter(|segment| !segment.is_empty()))
    }

    pub fn path(&self) -> &[String] {
        &self.0
    }

    /// Whether the first segments of this key equal `prefix`.
    pub fn has_prefix(&self, prefix: &[String]) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

impl From<&str> for AssetKey {
    fn from(s: &str) -> Self {
        AssetKey::from_user_string(s)
    }
}

/// Declaration of an asset produced by local code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetSpec {
    pub key: AssetKey,
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub deps: Vec<AssetKey>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub compute_kind: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl AssetSpec {
    pub fn new(key: impl Into<AssetKey>) -> Self {
        Self {
            key: key.into(),
            group_name: None,
            deps: Vec::new(),
            tags: BTreeMap::new(),
            compute_kind: None,
            description: None,
        }
    }

    pub fn with_group(mut self, group: &str) -> Self {
        self.group_name = Some(group.to_string());
        self
    }

    pub fn with_compute_kind(mut self, kind: &str) -> Self {
        self.compute_kind = Some(kind.to_string());
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }
}

/// Reported once per asset after a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializeResult {
    pub asset_key: AssetKey,
    pub metadata: BTreeMap<String, String>,
}
