//! Page context.
//!
//! A `Page` is built once from a `PageConfig`. It owns the widget
//! registries and the services every source shares, wires each widget to the
//! sources it reads from, and exposes the UI event entry points.
//!
//! ## Event Flow
//!
//! ```text
//! UI event (filter, page, sort, row, map, panel)
//!        │
//!        ▼
//! Mutate widget / source state
//!        │
//!        ▼
//! prepare() every affected source     (synchronous)
//!        │
//!        ▼
//! dispatch() all prepared requests    (concurrent)
//!        │
//!        ▼
//! Outcomes keyed by source id
//! ```
//!
//! ## Configuration Errors
//!
//! A widget with missing or dangling settings is skipped and logged. Its
//! siblings are built as usual; the errors are kept for `skipped()`.

use futures::future::join_all;
use indexmap::IndexMap;
use quarry_core::{
    ConfigError, DownloadChunk, DownloadConfig, GridConfig, MapConfig, PageConfig, SortOrder,
    SourceConfig, Viewport,
};
use std::collections::HashSet;
use std::sync::Arc;

use crate::backend::{SearchBackend, TimeoutBackend};
use crate::consumer::{DownloadConsumer, GridConsumer, MapConsumer};
use crate::error::{EngineError, EngineResult};
use crate::filters::{FilterBoard, SpecialFields};
use crate::notice::Notifier;
use crate::panels::PanelTracker;
use crate::query::{BuiltQuery, QueryContext};
use crate::registry::{Registry, WidgetRegistry};
use crate::rows::{hide_rows_and_move_next, RemovalOutcome};
use crate::source::{DataSource, PopulateOutcome, Prepared, SourceServices};

/// Population outcome per source id.
pub type Outcomes = IndexMap<String, PopulateOutcome>;

/// Id for a widget configured without one.
fn widget_id(id: &str, kind: &str) -> String {
    if id.is_empty() {
        format!("{}:{}", kind, uuid::Uuid::new_v4())
    } else {
        id.to_string()
    }
}

fn lookup<T: ?Sized>(registry: &Registry<T>, id: &str) -> EngineResult<Arc<T>> {
    registry.get(id).ok_or_else(|| EngineError::UnknownWidget {
        kind: registry.kind(),
        id: id.to_string(),
    })
}

// =============================================================================
// Page
// =============================================================================

pub struct Page {
    services: SourceServices,
    widgets: WidgetRegistry,
    skipped: Vec<ConfigError>,
}

impl Page {
    /// Build a page with the built-in special fields.
    pub fn build(
        config: PageConfig,
        backend: Arc<dyn SearchBackend>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self::build_with(config, backend, notifier, SpecialFields::with_defaults())
    }

    /// Build a page with a custom set of special field builders.
    pub fn build_with(
        config: PageConfig,
        backend: Arc<dyn SearchBackend>,
        notifier: Arc<dyn Notifier>,
        special: SpecialFields,
    ) -> Self {
        let timeout = config.backend.timeout();
        let services = SourceServices {
            backend: Arc::new(TimeoutBackend::new(backend, timeout)),
            board: Arc::new(FilterBoard::new()),
            query: Arc::new(QueryContext::new(config.mappings.clone(), special)),
            panels: Arc::new(PanelTracker::new()),
            notifier,
        };
        let mut page = Self {
            services,
            widgets: WidgetRegistry::new(),
            skipped: Vec::new(),
        };

        for panel in &config.hidden_panels {
            page.services.panels.hide(panel);
        }
        for input in config.inputs.iter().cloned() {
            if let Err(e) = page.services.board.add(input) {
                page.skip(e);
            }
        }

        let grid_ids: HashSet<&str> = config.grids.iter().map(|g| g.id.as_str()).collect();
        let map_ids: HashSet<&str> = config.maps.iter().map(|m| m.id.as_str()).collect();
        for settings in &config.sources {
            if let Err(e) = page.add_source(settings, &grid_ids, &map_ids) {
                page.skip(e);
            }
        }

        // Consumers register in this order: grids, maps, downloads.
        for grid in &config.grids {
            if let Err(e) = page.add_grid(grid.clone()) {
                page.skip(e);
            }
        }
        for map in &config.maps {
            if let Err(e) = page.add_map(map.clone()) {
                page.skip(e);
            }
        }
        for download in &config.downloads {
            if let Err(e) = page.add_download(download.clone()) {
                page.skip(e);
            }
        }

        page.link_sources();
        tracing::info!(
            "Page built: {} sources, {} grids, {} maps, {} downloads ({} skipped)",
            page.widgets.sources.count(),
            page.widgets.grids.count(),
            page.widgets.maps.count(),
            page.widgets.downloads.count(),
            page.skipped.len()
        );
        page
    }

    fn skip(&mut self, error: ConfigError) {
        tracing::warn!("Skipping widget: {}", error);
        self.skipped.push(error);
    }

    // =========================================================================
    // Wiring
    // =========================================================================

    fn add_source(
        &self,
        settings: &SourceConfig,
        grid_ids: &HashSet<&str>,
        map_ids: &HashSet<&str>,
    ) -> Result<(), ConfigError> {
        if settings.id.is_empty() {
            return Err(ConfigError::MissingSetting {
                widget: "source".to_string(),
                setting: "id".to_string(),
            });
        }
        if let Some(template) = &settings.aggregation {
            template.validate(&settings.id)?;
        }
        if let Some(binding) = &settings.row_filter {
            if !grid_ids.contains(binding.grid.as_str()) {
                return Err(ConfigError::UnknownReference {
                    widget: settings.id.clone(),
                    kind: "grid",
                    target: binding.grid.clone(),
                });
            }
        }
        if let Some(map) = &settings.filter_bounds_using_map {
            if !map_ids.contains(map.as_str()) {
                return Err(ConfigError::UnknownReference {
                    widget: settings.id.clone(),
                    kind: "map",
                    target: map.clone(),
                });
            }
        }
        let source = DataSource::new(settings.clone(), self.services.clone());
        self.widgets.sources.add(&settings.id, Arc::new(source))
    }

    /// Resolve the sources a consumer reads from.
    fn bound_sources<'a>(
        &self,
        widget: &str,
        ids: impl IntoIterator<Item = &'a String>,
    ) -> Result<Vec<Arc<DataSource>>, ConfigError> {
        let sources = ids
            .into_iter()
            .map(|id| {
                self.widgets
                    .sources
                    .get(id)
                    .ok_or_else(|| ConfigError::UnknownReference {
                        widget: widget.to_string(),
                        kind: "source",
                        target: id.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sources)
    }

    fn check_consumer(&self, id: &str, source_count: usize) -> Result<(), ConfigError> {
        if self.widgets.consumer_exists(id) {
            return Err(ConfigError::DuplicateId(id.to_string()));
        }
        if source_count == 0 {
            return Err(ConfigError::MissingSetting {
                widget: id.to_string(),
                setting: "sources".to_string(),
            });
        }
        Ok(())
    }

    fn add_grid(&self, mut config: GridConfig) -> Result<(), ConfigError> {
        config.id = widget_id(&config.id, "grid");
        self.check_consumer(&config.id, config.sources.len())?;
        let sources = self.bound_sources(&config.id, config.sources.keys())?;
        let forwarded = self.bound_sources(&config.id, &config.apply_filter_row_to_sources)?;
        if let Some(table) = &config.source_table {
            if !sources.iter().any(|s| s.settings().tables.contains_key(table)) {
                return Err(ConfigError::UnknownReference {
                    widget: config.id.clone(),
                    kind: "table",
                    target: table.clone(),
                });
            }
        }

        let grid = Arc::new(GridConsumer::new(config));
        self.widgets.grids.add(&grid.config().id, grid.clone())?;
        for source in sources {
            source.add_grid(grid.clone());
        }
        for source in forwarded {
            source.link_filter_grid(grid.clone());
        }
        Ok(())
    }

    fn add_map(&self, mut config: MapConfig) -> Result<(), ConfigError> {
        config.id = widget_id(&config.id, "map");
        self.check_consumer(&config.id, config.sources.len())?;
        let sources = self.bound_sources(&config.id, config.sources.keys())?;

        let map = Arc::new(MapConsumer::new(config));
        self.widgets.maps.add(&map.config().id, map.clone())?;
        for source in sources {
            source.add_consumer(map.clone());
        }
        Ok(())
    }

    fn add_download(&self, mut config: DownloadConfig) -> Result<(), ConfigError> {
        config.id = widget_id(&config.id, "download");
        self.check_consumer(&config.id, config.sources.len())?;
        let sources = self.bound_sources(&config.id, config.sources.keys())?;

        let download = Arc::new(DownloadConsumer::new(config));
        self.widgets
            .downloads
            .add(&download.config().id, download.clone())?;
        for source in sources {
            source.add_consumer(download.clone());
        }
        Ok(())
    }

    /// Connect sources to the grid and map they follow.
    fn link_sources(&mut self) {
        let mut dangling = Vec::new();
        for source in self.widgets.sources.all() {
            let settings = source.settings();
            if let Some(binding) = &settings.row_filter {
                match self.widgets.grids.get(&binding.grid) {
                    Some(grid) => source.set_row_grid(grid),
                    None => dangling.push(ConfigError::UnknownReference {
                        widget: settings.id.clone(),
                        kind: "grid",
                        target: binding.grid.clone(),
                    }),
                }
            }
            if let Some(map_id) = &settings.filter_bounds_using_map {
                match self.widgets.maps.get(map_id) {
                    Some(map) => source.set_bounds_map(map),
                    None => dangling.push(ConfigError::UnknownReference {
                        widget: settings.id.clone(),
                        kind: "map",
                        target: map_id.clone(),
                    }),
                }
            }
        }
        for error in dangling {
            self.skip(error);
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn widgets(&self) -> &WidgetRegistry {
        &self.widgets
    }

    pub fn source(&self, id: &str) -> Option<Arc<DataSource>> {
        self.widgets.sources.get(id)
    }

    pub fn grid(&self, id: &str) -> Option<Arc<GridConsumer>> {
        self.widgets.grids.get(id)
    }

    pub fn map(&self, id: &str) -> Option<Arc<MapConsumer>> {
        self.widgets.maps.get(id)
    }

    pub fn download(&self, id: &str) -> Option<Arc<DownloadConsumer>> {
        self.widgets.downloads.get(id)
    }

    pub fn board(&self) -> &FilterBoard {
        &self.services.board
    }

    pub fn panels(&self) -> &PanelTracker {
        &self.services.panels
    }

    /// Configuration errors of the widgets left out of the page.
    pub fn skipped(&self) -> &[ConfigError] {
        &self.skipped
    }

    fn sources_of(&self, ids: impl IntoIterator<Item = impl AsRef<str>>) -> Vec<Arc<DataSource>> {
        ids.into_iter()
            .filter_map(|id| self.widgets.sources.get(id.as_ref()))
            .collect()
    }

    /// Sources following the selected row of `grid_id`.
    fn row_dependents(&self, grid_id: &str) -> Vec<Arc<DataSource>> {
        self.widgets
            .sources
            .all()
            .into_iter()
            .filter(|s| {
                s.settings()
                    .row_filter
                    .is_some_and(|binding| binding.grid == grid_id)
            })
            .collect()
    }

    // =========================================================================
    // Population
    // =========================================================================

    /// Prepare every source first, then send all requests together.
    async fn repopulate(&self, sources: Vec<Arc<DataSource>>, force: bool) -> Outcomes {
        let mut outcomes = Outcomes::new();
        let mut pending = Vec::new();
        for source in sources {
            match source.prepare(force) {
                Prepared::Dispatch(request) => pending.push((source, request)),
                Prepared::Skipped(reason) => {
                    outcomes.insert(source.id().to_string(), PopulateOutcome::Skipped(reason));
                }
            }
        }
        let dispatched = join_all(pending.into_iter().map(|(source, request)| async move {
            let outcome = source.dispatch(request).await;
            (source.id().to_string(), outcome)
        }))
        .await;
        outcomes.extend(dispatched);
        outcomes
    }

    /// Initial population of every source.
    pub async fn populate_all(&self) -> Outcomes {
        self.repopulate(self.widgets.sources.all(), false).await
    }

    /// A filter changed: back to the first page and refit maps.
    async fn filters_changed(&self, sources: Vec<Arc<DataSource>>) -> Outcomes {
        for source in &sources {
            source.reset_paging();
        }
        for map in self.widgets.maps.all() {
            map.reset_initial_bounds();
        }
        self.repopulate(sources, false).await
    }

    // =========================================================================
    // UI Events
    // =========================================================================

    /// A standalone filter input changed.
    pub async fn set_input(&self, id: &str, value: &str) -> EngineResult<Outcomes> {
        if !self.services.board.set_value(id, value) {
            return Err(EngineError::UnknownWidget {
                kind: "input",
                id: id.to_string(),
            });
        }
        tracing::debug!("Input '{}' changed", id);
        Ok(self.filters_changed(self.widgets.sources.all()).await)
    }

    /// A grid filter row cell changed.
    pub async fn set_grid_filter(
        &self,
        grid_id: &str,
        field: &str,
        value: &str,
    ) -> EngineResult<Outcomes> {
        let grid = lookup(&self.widgets.grids, grid_id)?;
        if !grid.set_filter(field, value) {
            return Err(EngineError::UnknownWidget {
                kind: "filter cell",
                id: field.to_string(),
            });
        }
        let config = grid.config();
        let sources = self.sources_of(
            config
                .sources
                .keys()
                .chain(config.apply_filter_row_to_sources.iter()),
        );
        Ok(self.filters_changed(sources).await)
    }

    /// Next or previous page of a grid.
    pub async fn move_page(&self, grid_id: &str, forward: bool) -> EngineResult<Outcomes> {
        let grid = lookup(&self.widgets.grids, grid_id)?;
        if forward && !grid.pager().can_go_forward {
            tracing::debug!("Grid '{}': already on the last page", grid_id);
            return Ok(Outcomes::new());
        }
        let rendered = grid.row_count();
        let moved: Vec<_> = self
            .sources_of(grid.source_ids())
            .into_iter()
            .filter(|source| {
                if forward {
                    source.page_forward(rendered)
                } else {
                    source.page_back()
                }
            })
            .collect();
        if moved.is_empty() {
            tracing::debug!("Grid '{}': no page to move to", grid_id);
        }
        Ok(self.repopulate(moved, false).await)
    }

    /// A column header was clicked.
    pub async fn sort_grid(
        &self,
        grid_id: &str,
        field: &str,
        order: SortOrder,
    ) -> EngineResult<Outcomes> {
        let grid = lookup(&self.widgets.grids, grid_id)?;
        let Some(sort) = self.services.query.sort_for(field, order) else {
            tracing::debug!("Grid '{}': column '{}' is not sortable", grid_id, field);
            return Ok(Outcomes::new());
        };
        let sources = self.sources_of(grid.source_ids());
        for source in &sources {
            source.set_sort(sort.clone());
            source.reset_paging();
        }
        Ok(self.repopulate(sources, false).await)
    }

    /// A grid row was selected. Sources following the selection repopulate.
    pub async fn select_row(&self, grid_id: &str, row_id: &str) -> EngineResult<Outcomes> {
        let grid = lookup(&self.widgets.grids, grid_id)?;
        if !grid.select_row(row_id) {
            return Err(EngineError::UnknownWidget {
                kind: "row",
                id: row_id.to_string(),
            });
        }
        let dependents = self.row_dependents(grid_id);
        for source in &dependents {
            source.reset_paging();
        }
        Ok(self.repopulate(dependents, false).await)
    }

    pub fn set_multiselect(&self, grid_id: &str, enabled: bool) -> EngineResult<()> {
        lookup(&self.widgets.grids, grid_id)?.set_multiselect(enabled);
        Ok(())
    }

    /// Tick a row in multiselect mode. Returns false if the row cannot be ticked.
    pub fn set_checked(&self, grid_id: &str, row_id: &str, checked: bool) -> EngineResult<bool> {
        Ok(lookup(&self.widgets.grids, grid_id)?.set_checked(row_id, checked))
    }

    /// Remove the selected or checked rows after a mutating action.
    pub async fn remove_rows(&self, grid_id: &str) -> EngineResult<RemovalOutcome> {
        let grid = lookup(&self.widgets.grids, grid_id)?;
        let sources = self.sources_of(grid.source_ids());
        let outcome = hide_rows_and_move_next(&grid, &sources).await;
        if outcome != RemovalOutcome::NothingRemoved {
            // The selection moved on.
            self.repopulate(self.row_dependents(grid_id), false).await;
        }
        Ok(outcome)
    }

    /// The map was panned or zoomed.
    pub async fn move_map(&self, map_id: &str, viewport: Viewport) -> EngineResult<Outcomes> {
        let map = lookup(&self.widgets.maps, map_id)?;
        map.set_viewport(viewport);
        let bound: Vec<_> = self
            .widgets
            .sources
            .all()
            .into_iter()
            .filter(|s| s.settings().filter_bounds_using_map.as_deref() == Some(map_id))
            .collect();
        for source in &bound {
            source.reset_paging();
        }
        Ok(self.repopulate(bound, false).await)
    }

    /// Switch a map layer. A layer switched on is filled straight away.
    pub async fn set_layer_enabled(
        &self,
        map_id: &str,
        source_id: &str,
        enabled: bool,
    ) -> EngineResult<Outcomes> {
        let map = lookup(&self.widgets.maps, map_id)?;
        if !map.set_layer_enabled(source_id, enabled) {
            return Err(EngineError::UnknownWidget {
                kind: "layer",
                id: source_id.to_string(),
            });
        }
        let sources = self.sources_of([source_id]);
        if !enabled {
            // The layer dropped its features.
            for source in &sources {
                source.release_consumer(map_id);
            }
            return Ok(Outcomes::new());
        }
        Ok(self.repopulate(sources, false).await)
    }

    /// A tab panel became visible. Deferred sources populate now.
    pub async fn panel_shown(&self, panel: &str) -> Outcomes {
        let waiting = self.services.panels.show(panel);
        self.repopulate(self.sources_of(waiting), false).await
    }

    pub fn panel_hidden(&self, panel: &str) {
        self.services.panels.hide(panel);
    }

    /// Run a bulk download of the widget's first source.
    pub async fn start_download(&self, id: &str) -> EngineResult<DownloadChunk> {
        let download = lookup(&self.widgets.downloads, id)?;
        let source_id = download
            .config()
            .sources
            .keys()
            .next()
            .cloned()
            .unwrap_or_default();
        let source = lookup(&self.widgets.sources, &source_id)?;
        let request = match source.build_request() {
            BuiltQuery::Request(request) => request,
            BuiltQuery::NoQuery => return Err(EngineError::NothingToDownload(id.to_string())),
        };
        download
            .run(self.services.backend.as_ref(), request)
            .await
    }
}
