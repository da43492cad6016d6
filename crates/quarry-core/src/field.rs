//! Field mappings, special field tokens and document value lookup.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Backend type of a mapped field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Keyword,
    Integer,
    Long,
    Float,
    Double,
    Date,
    Boolean,
    GeoPoint,
}

impl FieldType {
    /// Text-like fields are filtered through `text_filters`.
    pub fn is_textual(&self) -> bool {
        matches!(self, FieldType::Text | FieldType::Keyword)
    }
}

/// Mapping metadata for one field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldMapping {
    #[serde(rename = "type")]
    pub field_type: FieldType,

    /// Field to sort on, e.g. a keyword sub-field of a text field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_field: Option<String>,
}

/// A synthetic field written as `#name:param1:param2#`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecialFieldRef {
    pub name: String,
    pub params: Vec<String>,
}

impl SpecialFieldRef {
    /// Parse a special field token. Returns `None` for plain field paths.
    pub fn parse(field: &str) -> Option<Self> {
        let inner = field.strip_prefix('#')?.strip_suffix('#')?;
        let mut parts = inner.split(':').map(str::to_string);
        let name = parts.next().filter(|n| !n.is_empty())?;
        Some(Self {
            name,
            params: parts.collect(),
        })
    }
}

/// The bare field name, without `#` markers or parameters.
pub fn simple_field_name(field: &str) -> &str {
    let trimmed = field.trim_matches('#');
    trimmed.split(':').next().unwrap_or(trimmed)
}

/// Walk a dotted path through a document.
pub fn value_at_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |node, key| node.get(key))
}

/// Render a document value as the string a filter compares against.
pub fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
