//! Query builders for synthetic columns.
//!
//! Special fields such as `#event_date#` do not exist in the index. A builder
//! turns the text typed into such a column's filter cell into something the
//! backend understands.

use once_cell::sync::Lazy;
use quarry_core::{BoolClause, FilterClause, QueryType};
use regex::Regex;
use serde_json::json;
use std::collections::HashMap;

/// What a builder made of the filter text.
#[derive(Debug, Clone, PartialEq)]
pub enum SpecialQuery {
    /// The text is not a valid filter for this field.
    Invalid,
    /// A query string fragment, sent as a `query_string` must clause.
    QueryString(String),
    /// A complete clause, used as is.
    Clause(FilterClause),
}

/// Builds a query from trimmed filter text and the field token's parameters.
pub type SpecialFieldBuilder = Box<dyn Fn(&str, &[String]) -> SpecialQuery + Send + Sync>;

/// Registry of builders and sort fields keyed by special field name.
pub struct SpecialFields {
    builders: HashMap<String, SpecialFieldBuilder>,
    sort_fields: HashMap<String, Vec<String>>,
}

impl SpecialFields {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            builders: HashMap::new(),
            sort_fields: HashMap::new(),
        }
    }

    /// The registry with the built-in fields.
    pub fn with_defaults() -> Self {
        let mut fields = Self::new();
        fields.register("event_date", event_date);
        fields.register("datasource_code", datasource_code);
        fields.register("higher_geography", higher_geography);
        fields.register_sort("event_date", &["event.date_start"]);
        fields.register_sort("datasource_code", &["metadata.website.id", "metadata.survey.id"]);
        fields
    }

    /// Register a builder, replacing any previous one of the same name.
    pub fn register<F>(&mut self, name: &str, builder: F)
    where
        F: Fn(&str, &[String]) -> SpecialQuery + Send + Sync + 'static,
    {
        self.builders.insert(name.to_string(), Box::new(builder));
    }

    /// Register the underlying fields a special field sorts on.
    pub fn register_sort(&mut self, name: &str, fields: &[&str]) {
        self.sort_fields
            .insert(name.to_string(), fields.iter().map(|f| f.to_string()).collect());
    }

    pub fn has_builder(&self, name: &str) -> bool {
        self.builders.contains_key(name)
    }

    /// Run the builder for `name`. Returns `None` when none is registered.
    pub fn build(&self, name: &str, text: &str, params: &[String]) -> Option<SpecialQuery> {
        self.builders.get(name).map(|builder| builder(text, params))
    }

    pub fn sort_fields(&self, name: &str) -> Option<&[String]> {
        self.sort_fields.get(name).map(Vec::as_slice)
    }
}

impl Default for SpecialFields {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ===== Built-in builders =====

static YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{4})$").unwrap());
static DAY_MONTH_YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{2})/(\d{2})/(\d{4})$").unwrap());
static ISO_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{4})-(\d{2})-(\d{2})$").unwrap());
static DATASOURCE_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+(\s*\|\s*\d*)?$").unwrap());

/// `yyyy`, `dd/mm/yyyy` or `yyyy-mm-dd`.
pub fn event_date(text: &str, _params: &[String]) -> SpecialQuery {
    if let Some(caps) = YEAR.captures(text) {
        return SpecialQuery::QueryString(format!("event.year:{}", &caps[1]));
    }
    if let Some(caps) = DAY_MONTH_YEAR.captures(text) {
        return SpecialQuery::QueryString(format!(
            "event.date_start:{}-{}-{}",
            &caps[3], &caps[2], &caps[1]
        ));
    }
    if let Some(caps) = ISO_DATE.captures(text) {
        return SpecialQuery::QueryString(format!(
            "event.date_start:{}-{}-{}",
            &caps[1], &caps[2], &caps[3]
        ));
    }
    SpecialQuery::Invalid
}

/// `website_id` optionally followed by `| survey_id`.
pub fn datasource_code(text: &str, _params: &[String]) -> SpecialQuery {
    if !DATASOURCE_CODE.is_match(text) {
        return SpecialQuery::Invalid;
    }
    let mut parts = text.split('|').map(str::trim);
    let website = parts.next().unwrap_or_default();
    let mut query = format!("metadata.website.id:{}", website);
    if let Some(survey) = parts.next().filter(|s| !s.is_empty()) {
        query.push_str(&format!(" AND metadata.survey.id:{}", survey));
    }
    SpecialQuery::QueryString(query)
}

/// Nested match on a higher geography entry. Params are the geography type
/// and the attribute to match, e.g. `#higher_geography:Vice County:code#`.
pub fn higher_geography(text: &str, params: &[String]) -> SpecialQuery {
    let (geo_type, attr) = match params {
        [geo_type, attr, ..] => (geo_type, attr),
        _ => return SpecialQuery::Invalid,
    };
    let mut attr_match = serde_json::Map::new();
    attr_match.insert(format!("location.higher_geography.{}", attr), json!(text));
    let inner = json!({
        "bool": {
            "must": [
                { "match": { "location.higher_geography.type": geo_type } },
                { "match": attr_match }
            ]
        }
    });
    SpecialQuery::Clause(
        FilterClause::new(BoolClause::Must, QueryType::Nested)
            .with_nested("location.higher_geography")
            .with_query(inner.to_string()),
    )
}
