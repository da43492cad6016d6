//! Query orchestration for Quarry.
//!
//! This crate turns filter state into search requests and feeds the
//! responses to widgets:
//! - Filter collection with special field builders
//! - Request building, offset and composite paging
//! - Data sources with duplicate suppression and stale response handling
//! - Grid, map and download consumers
//! - Panel-deferred population and the row removal workaround
//! - The page context that wires it all from configuration

pub mod backend;
pub mod consumer;
pub mod error;
pub mod filters;
pub mod notice;
pub mod page;
pub mod pagination;
pub mod panels;
pub mod query;
pub mod registry;
pub mod rows;
pub mod source;

// Re-export commonly used types
pub use backend::{SearchBackend, TimeoutBackend};
pub use consumer::{
    Consumer, ConsumerKind, DownloadConsumer, DownloadProgress, DownloadState, GridConsumer,
    GridRow, MapConsumer, MapFeature, MapLayer, Pager,
};
pub use error::{EngineError, EngineResult};
pub use filters::{FilterBoard, SpecialFields, SpecialQuery};
pub use notice::{LogNotifier, Notifier};
pub use page::{Outcomes, Page};
pub use pagination::{CursorOutcome, PaginationState, PagingMode};
pub use panels::PanelTracker;
pub use query::{build_query, BuiltQuery, QueryContext};
pub use registry::{Registry, WidgetRegistry};
pub use rows::{hide_rows_and_move_next, RemovalOutcome};
pub use source::{DataSource, PopulateOutcome, SkipReason, SourceStatus};

// Re-export quarry_core types for convenience
pub use quarry_core::{FilterClause, PageConfig, Request, Response, Viewport};
