//! Consumers: widgets fed by data sources.
//!
//! A source distributes each response to its consumers in registration
//! order. Each consumer decides whether it needs data at all; a download, for
//! instance, only fetches on explicit request.

mod download;
mod grid;
mod map;

pub use download::{DownloadConsumer, DownloadProgress, DownloadState};
pub use grid::{GridConsumer, GridRow, Pager, RowRemoval};
pub use map::{MapConsumer, MapFeature, MapLayer};

use quarry_core::{Request, Response, SourceConfig};

/// Widget variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsumerKind {
    Grid,
    Map,
    Download,
}

impl std::fmt::Display for ConsumerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsumerKind::Grid => write!(f, "grid"),
            ConsumerKind::Map => write!(f, "map"),
            ConsumerKind::Download => write!(f, "download"),
        }
    }
}

/// The contract between a data source and a widget.
pub trait Consumer: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> ConsumerKind;

    /// Tab panel the widget sits in. Widgets on hidden panels are deferred.
    fn panel(&self) -> Option<String> {
        None
    }

    /// Whether a response from `source` would be used.
    fn needs_population(&self, source: &str) -> bool;

    /// Render a response.
    fn populate(&self, settings: &SourceConfig, response: &Response, request: &Request);

    /// Show or hide the loading indicator.
    fn set_loading(&self, _loading: bool) {}

    /// The source has no further page after the one rendered.
    fn last_page_reached(&self) {}
}
