//! # Resources and Sources
//!
//! A resource is one named producer of records together with the write
//! semantics the destination must apply to it. A source groups resources and
//! knows how to extract all of them.

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::retrieve::{FetchError, Page, Record};

/// How a destination reconciles a resource's rows with what it already holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteDisposition {
    /// Every run adds its rows.
    Append,
    /// Every run replaces the whole table.
    Replace,
    /// Rows sharing the primary key overwrite each other; the last write wins.
    Merge,
}

impl fmt::Display for WriteDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WriteDisposition::Append => "append",
            WriteDisposition::Replace => "replace",
            WriteDisposition::Merge => "merge",
        };
        f.write_str(name)
    }
}

/// Declared name and write semantics of one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub name: String,
    pub primary_key: Option<String>,
    pub write_disposition: WriteDisposition,
}

impl ResourceSpec {
    pub fn merge(name: &str, primary_key: &str) -> Self {
        Self {
            name: name.to_string(),
            primary_key: Some(primary_key.to_string()),
            write_disposition: WriteDisposition::Merge,
        }
    }

    pub fn append(name: &str) -> Self {
        Self {
            name: name.to_string(),
            primary_key: None,
            write_disposition: WriteDisposition::Append,
        }
    }

    pub fn replace(name: &str) -> Self {
        Self {
            name: name.to_string(),
            primary_key: None,
            write_disposition: WriteDisposition::Replace,
        }
    }
}

/// Everything one resource produced during an extraction, page by page.
#[derive(Debug, Clone)]
pub struct ExtractedTable {
    pub resource: ResourceSpec,
    pub pages: Vec<Page>,
}

impl ExtractedTable {
    pub fn new(resource: ResourceSpec, pages: Vec<Page>) -> Self {
        Self { resource, pages }
    }

    pub fn row_count(&self) -> usize {
        self.pages.iter().map(Vec::len).sum()
    }

    /// Records in the order they were fetched.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.pages.iter().flatten()
    }
}

/// A group of resources extracted together.
pub trait Source {
    fn name(&self) -> &str;

    fn resources(&self) -> Vec<ResourceSpec>;

    /// Extracts every resource. Fails fast: the first error aborts the whole extraction.
    fn extract(&self) -> impl Future<Output = Result<Vec<ExtractedTable>, FetchError>> + Send;
}

/// Renders a primary key value as text. Strings are used as-is, numbers in
/// their JSON form; anything else (including a missing field) has no key.
pub fn primary_key_value(record: &Record, key: &str) -> Option<String> {
    match record.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_primary_key_value_accepts_strings_and_numbers() {
        assert_eq!(primary_key_value(&record(json!({ "id": 42 })), "id"), Some("42".to_string()));
        assert_eq!(primary_key_value(&record(json!({ "id": "c-1" })), "id"), Some("c-1".to_string()));
        assert_eq!(primary_key_value(&record(json!({ "id": null })), "id"), None);
        assert_eq!(primary_key_value(&record(json!({ "name": "x" })), "id"), None);
    }

    #[test]
    fn test_row_count_spans_pages() {
        let table = ExtractedTable::new(
            ResourceSpec::merge("users", "id"),
            vec![
                vec![record(json!({ "id": 1 })), record(json!({ "id": 2 }))],
                vec![record(json!({ "id": 3 }))],
            ],
        );
        assert_eq!(table.row_count(), 3);
        assert_eq!(table.records().count(), 3);
    }
}
