//! Request assembly.
//!
//! Order of the `bool_queries` list:
//! 1. static clauses of the source, including temporary exclusions
//! 2. the row filter term, when the source follows a grid's selected row
//! 3. otherwise everything the filter collector gathers
//!
//! The aggregation template is instantiated last, with the map viewport and
//! the composite cursor of the current page.

use indexmap::IndexMap;
use quarry_core::{
    simple_field_name, FieldMapping, FilterClause, Request, SortField, SortOrder, SortSpec,
    SourceConfig, SpecialFieldRef, Viewport,
};

use crate::consumer::GridConsumer;
use crate::filters::{FilterBoard, FilterCollector, SpecialFields};
use crate::pagination::{PagingMode, PaginationState};

/// Field knowledge shared by every source on a page.
#[derive(Default)]
pub struct QueryContext {
    pub mappings: IndexMap<String, FieldMapping>,
    pub special: SpecialFields,
}

impl QueryContext {
    pub fn new(mappings: IndexMap<String, FieldMapping>, special: SpecialFields) -> Self {
        Self { mappings, special }
    }

    /// Sort spec for a click on a column header.
    ///
    /// Mapped fields sort on their mapping's sort field. Special fields sort
    /// on their registered underlying fields. Anything else cannot be sorted.
    pub fn sort_for(&self, field: &str, order: SortOrder) -> Option<SortSpec> {
        let name = simple_field_name(field);
        if SpecialFieldRef::parse(field).is_none() {
            if let Some(mapping) = self.mappings.get(name) {
                let target = mapping.sort_field.clone().unwrap_or_else(|| name.to_string());
                return Some([(target, SortField { order })].into_iter().collect());
            }
        }
        self.special.sort_fields(name).map(|fields| {
            fields
                .iter()
                .map(|f| (f.clone(), SortField { order }))
                .collect()
        })
    }
}

/// State of a source's row filter binding.
#[derive(Debug, Clone, PartialEq)]
pub enum RowFilter {
    /// The source is not bound to a grid's selection.
    Unbound,
    /// Filter on this value of the selected row.
    Selected { field: String, value: String },
    /// Bound, but nothing selected.
    NothingSelected,
}

/// Everything a source knows at build time.
pub struct QueryInputs<'a> {
    pub settings: &'a SourceConfig,
    pub paging: &'a PaginationState,
    pub row_filter: RowFilter,
    pub viewport: Option<Viewport>,
    pub board: &'a FilterBoard,
    pub filter_grids: &'a [&'a GridConsumer],
}

/// Output of the builder.
#[derive(Debug, Clone, PartialEq)]
pub enum BuiltQuery {
    Request(Request),
    /// The source follows a grid selection and nothing is selected.
    NoQuery,
}

/// Build a source's request from its current inputs.
pub fn build_query(context: &QueryContext, inputs: QueryInputs<'_>) -> BuiltQuery {
    let settings = inputs.settings;
    let mut request = Request {
        size: settings.size,
        sort: settings.sort.clone(),
        ..Default::default()
    };
    if inputs.paging.mode() == PagingMode::Offset {
        request.from = Some(inputs.paging.from());
    }

    request
        .bool_queries
        .extend(settings.filter_bool_clauses.to_filter_clauses());

    match inputs.row_filter {
        RowFilter::Selected { field, value } => {
            request.bool_queries.push(FilterClause::term(field, value));
        }
        RowFilter::NothingSelected => return BuiltQuery::NoQuery,
        RowFilter::Unbound => {
            FilterCollector::new(context)
                .collect(inputs.board, inputs.filter_grids)
                .apply_to(&mut request);
        }
    }

    if let Some(template) = &settings.aggregation {
        request.aggs = Some(template.instantiate(inputs.viewport.as_ref(), inputs.paging.cursor()));
    }

    BuiltQuery::Request(request)
}
