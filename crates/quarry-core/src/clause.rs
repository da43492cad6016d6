//! Filter clauses sent in the `bool_queries` list of a request.

use serde::{Deserialize, Serialize};

/// Boolean occurrence of a clause in the backend's bool query.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BoolClause {
    #[default]
    Must,
    Should,
    MustNot,
    Filter,
}

/// Query types understood by the search proxy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Term,
    Terms,
    Match,
    MatchPhrase,
    MatchPhrasePrefix,
    QueryString,
    SimpleQueryString,
    Exists,
    Range,
    MatchAll,
    MatchNone,
    /// A query on nested documents; `nested` holds the path, `query` the inner query.
    Nested,
}

/// One normalized filter clause.
///
/// Either `query` (a JSON query body or template) or `value` carries the
/// payload, depending on `query_type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilterClause {
    pub bool_clause: BoolClause,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    pub query_type: QueryType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Nested document path, for clauses on nested mappings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nested: Option<String>,
}

impl FilterClause {
    /// Create a clause with no field or payload.
    pub fn new(bool_clause: BoolClause, query_type: QueryType) -> Self {
        Self {
            bool_clause,
            field: None,
            query_type,
            query: None,
            value: None,
            nested: None,
        }
    }

    /// A `term` must clause on a field.
    pub fn term(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(BoolClause::Must, QueryType::Term)
            .with_field(field)
            .with_value(value)
    }

    /// A `query_string` must clause.
    pub fn query_string(value: impl Into<String>) -> Self {
        Self::new(BoolClause::Must, QueryType::QueryString).with_value(value)
    }

    /// A `must_not terms` clause excluding documents by id.
    pub fn exclude_ids(ids: &[String]) -> Self {
        let list = serde_json::to_string(ids).unwrap_or_else(|_| "[]".to_string());
        Self::new(BoolClause::MustNot, QueryType::Terms)
            .with_field("_id")
            .with_value(list)
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_nested(mut self, nested: impl Into<String>) -> Self {
        self.nested = Some(nested.into());
        self
    }
}

/// Token in query templates that is replaced by the input's value.
pub const VALUE_TOKEN: &str = "#value#";

/// Substitute `#value#` in a JSON query template.
///
/// The value is escaped as JSON string content, since templates place the
/// token inside string literals.
pub fn fill_template(template: &str, value: &str) -> String {
    let escaped = serde_json::to_string(value).unwrap_or_default();
    let inner = escaped
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(value);
    template.replace(VALUE_TOKEN, inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clause_serialization_skips_empty() {
        let clause = FilterClause::term("taxon.family", "Apidae");
        let json = serde_json::to_value(&clause).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "bool_clause": "must",
                "field": "taxon.family",
                "query_type": "term",
                "value": "Apidae"
            })
        );
    }

    #[test]
    fn test_exclude_ids_lists_ids() {
        let clause = FilterClause::exclude_ids(&["a1".to_string(), "b2".to_string()]);
        assert_eq!(clause.bool_clause, BoolClause::MustNot);
        assert_eq!(clause.query_type, QueryType::Terms);
        assert_eq!(clause.field.as_deref(), Some("_id"));
        assert_eq!(clause.value.as_deref(), Some(r#"["a1","b2"]"#));
    }

    #[test]
    fn test_fill_template_escapes() {
        let template = r##"{"match":{"location.name":"#value#"}}"##;
        assert_eq!(
            fill_template(template, "St \"Ives\""),
            r#"{"match":{"location.name":"St \"Ives\""}}"#
        );
    }

    #[test]
    fn test_query_type_names() {
        let qt: QueryType = serde_json::from_str("\"match_phrase_prefix\"").unwrap();
        assert_eq!(qt, QueryType::MatchPhrasePrefix);
        assert!(serde_json::from_str::<QueryType>("\"fuzzy_magic\"").is_err());
    }
}
