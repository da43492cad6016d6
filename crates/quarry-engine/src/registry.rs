//! Widget registries.
//!
//! The page owns one registry per widget type. Entries keep registration
//! order, which is also the order sources and consumers were wired in.

use indexmap::IndexMap;
use parking_lot::RwLock;
use quarry_core::ConfigError;
use std::sync::Arc;

use crate::consumer::{DownloadConsumer, GridConsumer, MapConsumer};
use crate::source::DataSource;

/// Id-keyed storage for one widget type.
pub struct Registry<T: ?Sized> {
    kind: &'static str,
    items: RwLock<IndexMap<String, Arc<T>>>,
}

impl<T: ?Sized> Registry<T> {
    /// Create an empty registry for widgets of `kind` (used in log lines).
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            items: RwLock::new(IndexMap::new()),
        }
    }

    /// Register a widget.
    ///
    /// Returns an error if a widget with the same ID already exists.
    pub fn add(&self, id: &str, item: Arc<T>) -> Result<(), ConfigError> {
        let mut items = self.items.write();
        if items.contains_key(id) {
            return Err(ConfigError::DuplicateId(id.to_string()));
        }
        items.insert(id.to_string(), item);
        tracing::info!("Registered {}: {}", self.kind, id);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<T>> {
        self.items.read().get(id).cloned()
    }

    pub fn exists(&self, id: &str) -> bool {
        self.items.read().contains_key(id)
    }

    /// Registered IDs, in registration order.
    pub fn list(&self) -> Vec<String> {
        self.items.read().keys().cloned().collect()
    }

    /// Registered widgets, in registration order.
    pub fn all(&self) -> Vec<Arc<T>> {
        self.items.read().values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.items.read().len()
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }
}

/// The registries of one page.
pub struct WidgetRegistry {
    pub sources: Registry<DataSource>,
    pub grids: Registry<GridConsumer>,
    pub maps: Registry<MapConsumer>,
    pub downloads: Registry<DownloadConsumer>,
}

impl WidgetRegistry {
    pub fn new() -> Self {
        Self {
            sources: Registry::new("source"),
            grids: Registry::new("grid"),
            maps: Registry::new("map"),
            downloads: Registry::new("download"),
        }
    }

    /// Whether any consumer (grid, map or download) already uses `id`.
    pub fn consumer_exists(&self, id: &str) -> bool {
        self.grids.exists(id) || self.maps.exists(id) || self.downloads.exists(id)
    }
}

impl Default for WidgetRegistry {
    fn default() -> Self {
        Self::new()
    }
}
