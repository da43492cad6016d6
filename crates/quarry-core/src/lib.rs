//! Core types for Quarry.
//!
//! This crate contains shared data structures that are used across all Quarry crates:
//! - Filter clauses and query types
//! - Request, response and download chunk wire types
//! - Aggregation templates with named insertion points
//! - Field mappings and special field tokens
//! - Page configuration
//! - Error types

mod aggregation;
mod clause;
mod config;
mod error;
mod field;
mod request;

pub use aggregation::{AggregationTemplate, Viewport};
pub use clause::{fill_template, BoolClause, FilterClause, QueryType, VALUE_TOKEN};
pub use config::{
    config_dir, default_page_path, AggregationMapMode, BackendConfig, BoolClauses, ColumnConfig,
    DownloadConfig, GridConfig, InputBinding, InputConfig, LayerConfig, LayerKind, MapConfig,
    PageConfig, PivotConfig, RowFilterConfig, SourceConfig, StaticClause,
};
pub use error::{BackendError, ConfigError};
pub use field::{
    simple_field_name, value_as_text, value_at_path, FieldMapping, FieldType, SpecialFieldRef,
};
pub use request::{
    DownloadChunk, Hit, HitTotal, Hits, PivotRow, PivotTable, Request, Response, SortField,
    SortOrder, SortSpec,
};
