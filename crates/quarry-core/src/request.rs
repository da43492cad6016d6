//! Wire types: the request posted to the search proxy and its responses.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clause::FilterClause;

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Sort entry for a single field.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SortField {
    pub order: SortOrder,
}

/// Ordered mapping of field name to sort order.
pub type SortSpec = IndexMap<String, SortField>;

/// A complete search request.
///
/// Once built, a request is only ever serialized; its compact JSON form is the
/// signature used to skip duplicate requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Request {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<u64>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub sort: SortSpec,

    #[serde(default)]
    pub bool_queries: Vec<FilterClause>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub text_filters: IndexMap<String, String>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub numeric_filters: IndexMap<String, String>,

    #[serde(default)]
    pub user_filters: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions_filter: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggs: Option<Value>,
}

impl Request {
    /// Compact JSON serialization used for duplicate detection.
    pub fn signature(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Total hit count. Older backends send a bare number.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum HitTotal {
    Count(u64),
    Object { value: u64 },
}

impl HitTotal {
    pub fn value(&self) -> u64 {
        match self {
            HitTotal::Count(v) => *v,
            HitTotal::Object { value } => *value,
        }
    }
}

impl Default for HitTotal {
    fn default() -> Self {
        HitTotal::Count(0)
    }
}

/// A matching document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Hit {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(rename = "_source", default)]
    pub source: Value,
}

/// The hits section of a response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Hits {
    #[serde(default)]
    pub hits: Vec<Hit>,

    #[serde(default)]
    pub total: HitTotal,
}

/// A table pivoted out of a two-level aggregation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PivotTable {
    /// Outer bucket keys, in bucket order.
    pub columns: Vec<String>,

    /// One row per inner bucket key, in first-seen order.
    pub rows: Vec<PivotRow>,
}

/// A pivot table row. Every column has a cell; absent buckets count zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PivotRow {
    pub key: String,
    pub cells: IndexMap<String, u64>,
}

/// Search response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Response {
    #[serde(default)]
    pub hits: Hits,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregations: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,

    /// Pivot tables built by the data source, keyed by table name.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub tables: IndexMap<String, PivotTable>,
}

impl Response {
    /// Whether the payload reports a failed query.
    pub fn failure(&self) -> Option<String> {
        if let Some(error) = &self.error {
            return Some(match error {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            });
        }
        match self.code {
            Some(code) if code != 200 => Some(format!("backend returned code {}", code)),
            _ => None,
        }
    }
}

/// One chunk of a bulk download.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DownloadChunk {
    #[serde(default)]
    pub scroll_id: Option<String>,

    #[serde(default)]
    pub done: u64,

    #[serde(default)]
    pub total: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
}

impl DownloadChunk {
    /// True once every document has been written to the file.
    pub fn is_complete(&self) -> bool {
        self.done >= self.total
    }
}
