//! Filter inputs and the collector that turns them into request filters.
//!
//! Filter participants:
//! - standalone inputs on the `FilterBoard` (params, user filters, permissions)
//! - the filter row of each grid bound to a source, plus grids that forward
//!   their filter row to it
//!
//! A collection pass first clears every error marker it owns, then walks the
//! participants in order. Empty values are skipped.

mod special;

pub use special::{
    datasource_code, event_date, higher_geography, SpecialFieldBuilder, SpecialFields,
    SpecialQuery,
};

use indexmap::IndexMap;
use parking_lot::RwLock;
use quarry_core::{
    fill_template, ConfigError, FilterClause, InputBinding, InputConfig, Request,
    SpecialFieldRef,
};

use crate::consumer::GridConsumer;
use crate::query::QueryContext;

/// Marker text shown on a filter cell the builder rejected.
pub const INVALID_FILTER_MESSAGE: &str = "Invalid search text";

// ===== Filter Board =====

/// A standalone filter input.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterInput {
    pub id: String,
    pub binding: InputBinding,
    pub value: String,
}

/// The standalone filter inputs of a page, in declaration order.
pub struct FilterBoard {
    inputs: RwLock<IndexMap<String, FilterInput>>,
}

impl FilterBoard {
    pub fn new() -> Self {
        Self {
            inputs: RwLock::new(IndexMap::new()),
        }
    }

    /// Add an input. Ids must be unique.
    pub fn add(&self, config: InputConfig) -> Result<(), ConfigError> {
        let mut inputs = self.inputs.write();
        if inputs.contains_key(&config.id) {
            return Err(ConfigError::DuplicateId(config.id));
        }
        tracing::debug!("Registered filter input: {}", config.id);
        inputs.insert(
            config.id.clone(),
            FilterInput {
                id: config.id,
                binding: config.binding,
                value: config.value,
            },
        );
        Ok(())
    }

    /// Set an input's value. Returns false for unknown inputs.
    pub fn set_value(&self, id: &str, value: &str) -> bool {
        match self.inputs.write().get_mut(id) {
            Some(input) => {
                input.value = value.to_string();
                true
            }
            None => false,
        }
    }

    pub fn value(&self, id: &str) -> Option<String> {
        self.inputs.read().get(id).map(|i| i.value.clone())
    }

    /// Snapshot of every input.
    pub fn inputs(&self) -> Vec<FilterInput> {
        self.inputs.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inputs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FilterBoard {
    fn default() -> Self {
        Self::new()
    }
}

// ===== Collection =====

/// Filters gathered in one collection pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectedFilters {
    pub bool_queries: Vec<FilterClause>,
    pub text_filters: IndexMap<String, String>,
    pub numeric_filters: IndexMap<String, String>,
    pub user_filters: Vec<String>,
    pub permissions_filter: Option<String>,
    /// Grid cells flagged invalid, as `grid_id:field`.
    pub invalid: Vec<String>,
}

impl CollectedFilters {
    /// Move the filters into a request.
    pub fn apply_to(self, request: &mut Request) {
        request.bool_queries.extend(self.bool_queries);
        request.text_filters.extend(self.text_filters);
        request.numeric_filters.extend(self.numeric_filters);
        request.user_filters.extend(self.user_filters);
        if self.permissions_filter.is_some() {
            request.permissions_filter = self.permissions_filter;
        }
    }
}

/// How one filter cell contributes to a request.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnFilter {
    Clause(FilterClause),
    Text(String),
    Numeric(String),
    Invalid,
}

/// Converts filter participants into request filters.
pub struct FilterCollector<'a> {
    context: &'a QueryContext,
}

impl<'a> FilterCollector<'a> {
    pub fn new(context: &'a QueryContext) -> Self {
        Self { context }
    }

    /// Collect the standalone inputs and the given grids' filter rows.
    pub fn collect(&self, board: &FilterBoard, grids: &[&GridConsumer]) -> CollectedFilters {
        let mut out = CollectedFilters::default();
        for grid in grids {
            grid.clear_filter_errors();
        }
        self.collect_inputs(board, &mut out);
        for grid in grids {
            self.collect_grid_row(grid, &mut out);
        }
        if !out.invalid.is_empty() {
            tracing::debug!("Skipped invalid filter cells: {:?}", out.invalid);
        }
        out
    }

    fn collect_inputs(&self, board: &FilterBoard, out: &mut CollectedFilters) {
        for input in board.inputs() {
            let value = input.value.trim();
            if value.is_empty() {
                continue;
            }
            match input.binding {
                InputBinding::Param {
                    bool_clause,
                    query_type,
                    field,
                    query,
                    nested,
                } => out.bool_queries.push(FilterClause {
                    bool_clause,
                    field,
                    query_type,
                    query: query.map(|template| fill_template(&template, value)),
                    value: Some(value.to_string()),
                    nested,
                }),
                InputBinding::UserFilter => out.user_filters.push(value.to_string()),
                InputBinding::Permissions => out.permissions_filter = Some(value.to_string()),
            }
        }
    }

    fn collect_grid_row(&self, grid: &GridConsumer, out: &mut CollectedFilters) {
        for (field, text) in grid.filter_values() {
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            match self.column_filter(&field, text) {
                ColumnFilter::Clause(clause) => out.bool_queries.push(clause),
                ColumnFilter::Text(value) => {
                    out.text_filters.insert(field, value);
                }
                ColumnFilter::Numeric(value) => {
                    out.numeric_filters.insert(field, value);
                }
                ColumnFilter::Invalid => {
                    grid.flag_filter_error(&field, INVALID_FILTER_MESSAGE);
                    out.invalid.push(format!("{}:{}", grid.config().id, field));
                }
            }
        }
    }

    /// Convert the trimmed text of one filter cell.
    ///
    /// Special field tokens go to their builder; a builder registered under a
    /// plain field's name overrides the mapping. Special fields with no
    /// builder cannot be searched.
    pub fn column_filter(&self, field: &str, text: &str) -> ColumnFilter {
        let (name, params) = match SpecialFieldRef::parse(field) {
            Some(special) => (special.name, special.params),
            None => (field.to_string(), Vec::new()),
        };
        match self.context.special.build(&name, text, &params) {
            Some(SpecialQuery::Invalid) => ColumnFilter::Invalid,
            Some(SpecialQuery::QueryString(query)) => {
                ColumnFilter::Clause(FilterClause::query_string(query))
            }
            Some(SpecialQuery::Clause(clause)) => ColumnFilter::Clause(clause),
            None if field.starts_with('#') => {
                tracing::debug!("No query builder for special field {}", field);
                ColumnFilter::Invalid
            }
            None => match self.context.mappings.get(field) {
                Some(mapping) if !mapping.field_type.is_textual() => {
                    ColumnFilter::Numeric(text.to_string())
                }
                Some(_) => ColumnFilter::Text(text.to_string()),
                None => ColumnFilter::Numeric(text.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::{BoolClause, ColumnConfig, FieldMapping, FieldType, GridConfig, QueryType};

    fn context() -> QueryContext {
        let mut context = QueryContext::default();
        context.mappings.insert(
            "taxon.accepted_name".to_string(),
            FieldMapping {
                field_type: FieldType::Keyword,
                sort_field: None,
            },
        );
        context.mappings.insert(
            "event.year".to_string(),
            FieldMapping {
                field_type: FieldType::Integer,
                sort_field: None,
            },
        );
        context
    }

    fn grid() -> GridConsumer {
        GridConsumer::new(GridConfig {
            id: "records-grid".to_string(),
            sources: [("records".to_string(), "Records".to_string())].into_iter().collect(),
            columns: vec![
                ColumnConfig {
                    field: "taxon.accepted_name".to_string(),
                    caption: "Species".to_string(),
                },
                ColumnConfig {
                    field: "event.year".to_string(),
                    caption: "Year".to_string(),
                },
                ColumnConfig {
                    field: "#event_date#".to_string(),
                    caption: "Date".to_string(),
                },
            ],
            panel: None,
            apply_filter_row_to_sources: vec![],
            source_table: None,
            include_filter_row: true,
        })
    }

    fn param(id: &str, query: Option<&str>, value: &str) -> InputConfig {
        InputConfig {
            id: id.to_string(),
            binding: InputBinding::Param {
                bool_clause: BoolClause::Must,
                query_type: QueryType::QueryString,
                field: None,
                query: query.map(str::to_string),
                nested: None,
            },
            value: value.to_string(),
        }
    }

    #[test]
    fn test_param_template_substitution() {
        let board = FilterBoard::new();
        board
            .add(param("site", Some(r##"{"match":{"location.name":"#value#"}}"##), "  Kew  "))
            .unwrap();
        board.add(param("empty", None, "   ")).unwrap();

        let context = context();
        let collected = FilterCollector::new(&context).collect(&board, &[]);
        assert_eq!(collected.bool_queries.len(), 1);
        let clause = &collected.bool_queries[0];
        assert_eq!(clause.query.as_deref(), Some(r#"{"match":{"location.name":"Kew"}}"#));
        assert_eq!(clause.value.as_deref(), Some("Kew"));
    }

    #[test]
    fn test_user_and_permission_inputs() {
        let board = FilterBoard::new();
        board
            .add(InputConfig {
                id: "saved".to_string(),
                binding: InputBinding::UserFilter,
                value: "f12".to_string(),
            })
            .unwrap();
        board
            .add(InputConfig {
                id: "perms".to_string(),
                binding: InputBinding::Permissions,
                value: "my".to_string(),
            })
            .unwrap();

        let context = context();
        let collected = FilterCollector::new(&context).collect(&board, &[]);
        assert_eq!(collected.user_filters, vec!["f12".to_string()]);
        assert_eq!(collected.permissions_filter.as_deref(), Some("my"));
    }

    #[test]
    fn test_duplicate_input_rejected() {
        let board = FilterBoard::new();
        board.add(param("a", None, "")).unwrap();
        assert!(matches!(
            board.add(param("a", None, "")),
            Err(ConfigError::DuplicateId(id)) if id == "a"
        ));
    }

    #[test]
    fn test_grid_row_buckets_by_mapping() {
        let grid = grid();
        grid.set_filter("taxon.accepted_name", "Bombus");
        grid.set_filter("event.year", "2020");
        grid.set_filter("#event_date#", "2024-03-15");

        let context = context();
        let collected = FilterCollector::new(&context).collect(&FilterBoard::new(), &[&grid]);
        assert_eq!(collected.text_filters["taxon.accepted_name"], "Bombus");
        assert_eq!(collected.numeric_filters["event.year"], "2020");
        assert_eq!(
            collected.bool_queries,
            vec![FilterClause::query_string("event.date_start:2024-03-15")]
        );
    }

    #[test]
    fn test_invalid_cell_flagged_then_cleared() {
        let grid = grid();
        grid.set_filter("#event_date#", "15-2024");

        let context = context();
        let collector = FilterCollector::new(&context);
        let collected = collector.collect(&FilterBoard::new(), &[&grid]);
        assert!(collected.bool_queries.is_empty());
        assert_eq!(collected.invalid, vec!["records-grid:#event_date#".to_string()]);
        assert_eq!(
            grid.filter_error("#event_date#").as_deref(),
            Some(INVALID_FILTER_MESSAGE)
        );

        grid.set_filter("#event_date#", "");
        collector.collect(&FilterBoard::new(), &[&grid]);
        assert_eq!(grid.filter_error("#event_date#"), None);
    }

    #[test]
    fn test_unmapped_and_unsearchable_fields() {
        let context = context();
        let collector = FilterCollector::new(&context);
        assert_eq!(
            collector.column_filter("location.name", "Kew"),
            ColumnFilter::Numeric("Kew".to_string())
        );
        assert_eq!(collector.column_filter("#locality#", "Kew"), ColumnFilter::Invalid);
    }
}
