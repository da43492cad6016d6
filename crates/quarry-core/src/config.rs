//! Page configuration.
//!
//! A page file declares the field mappings, the data sources and the widgets
//! bound to them. Everything is plain TOML:
//!
//! ```toml
//! [mappings."taxon.accepted_name"]
//! type = "keyword"
//!
//! [[sources]]
//! id = "records"
//! size = 30
//!
//! [[grids]]
//! id = "records-grid"
//! sources = { records = "Records" }
//! columns = [{ field = "taxon.accepted_name", caption = "Species" }]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::aggregation::{AggregationTemplate, Viewport};
use crate::clause::{BoolClause, FilterClause, QueryType};
use crate::error::ConfigError;
use crate::field::FieldMapping;
use crate::request::SortSpec;

/// A whole page of widgets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageConfig {
    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub mappings: IndexMap<String, FieldMapping>,

    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    #[serde(default)]
    pub grids: Vec<GridConfig>,

    #[serde(default)]
    pub maps: Vec<MapConfig>,

    #[serde(default)]
    pub downloads: Vec<DownloadConfig>,

    #[serde(default)]
    pub inputs: Vec<InputConfig>,

    /// Tab panels that start hidden.
    #[serde(default)]
    pub hidden_panels: Vec<String>,
}

/// Backend connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Per-request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// A statically configured filter, sent with every request of its source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StaticClause {
    pub query_type: QueryType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nested: Option<String>,
}

/// Static clauses grouped by boolean occurrence.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BoolClauses {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must: Vec<StaticClause>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub should: Vec<StaticClause>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must_not: Vec<StaticClause>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filter: Vec<StaticClause>,
}

impl BoolClauses {
    /// Clauses for one occurrence.
    pub fn get(&self, clause: BoolClause) -> &Vec<StaticClause> {
        match clause {
            BoolClause::Must => &self.must,
            BoolClause::Should => &self.should,
            BoolClause::MustNot => &self.must_not,
            BoolClause::Filter => &self.filter,
        }
    }

    pub fn get_mut(&mut self, clause: BoolClause) -> &mut Vec<StaticClause> {
        match clause {
            BoolClause::Must => &mut self.must,
            BoolClause::Should => &mut self.should,
            BoolClause::MustNot => &mut self.must_not,
            BoolClause::Filter => &mut self.filter,
        }
    }

    /// Every clause as a full filter clause, grouped in occurrence order.
    pub fn to_filter_clauses(&self) -> Vec<FilterClause> {
        [
            BoolClause::Must,
            BoolClause::Should,
            BoolClause::MustNot,
            BoolClause::Filter,
        ]
        .into_iter()
        .flat_map(|occurrence| {
            self.get(occurrence)
                .iter()
                .map(move |c| c.to_filter_clause(occurrence))
        })
        .collect()
    }

    pub fn len(&self) -> usize {
        self.must.len() + self.should.len() + self.must_not.len() + self.filter.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StaticClause {
    pub fn to_filter_clause(&self, bool_clause: BoolClause) -> FilterClause {
        FilterClause {
            bool_clause,
            field: self.field.clone(),
            query_type: self.query_type,
            query: self.query.clone(),
            value: self.value.clone(),
            nested: self.nested.clone(),
        }
    }

    /// Inverse of `to_filter_clause`.
    pub fn from_filter_clause(clause: &FilterClause) -> Self {
        Self {
            query_type: clause.query_type,
            field: clause.field.clone(),
            query: clause.query.clone(),
            value: clause.value.clone(),
            nested: clause.nested.clone(),
        }
    }
}

/// Filter a source by a field of the row selected in a grid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RowFilterConfig {
    /// Grid whose selected row provides the value.
    pub grid: String,

    /// Field path read from the row document and filtered with `term`.
    pub field: String,
}

/// A pivot table built from a two-level aggregation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PivotConfig {
    /// Name of the outer aggregation; its bucket keys become columns.
    pub outer: String,

    /// Path from each outer bucket to the inner aggregation.
    pub inner: Vec<String>,
}

/// How a map renders aggregation buckets.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMapMode {
    #[default]
    GeoHash,
    GridSquare,
}

/// One search data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,

    #[serde(default)]
    pub sort: SortSpec,

    #[serde(default)]
    pub filter_bool_clauses: BoolClauses,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_filter: Option<RowFilterConfig>,

    /// Map whose viewport limits an aggregation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_bounds_using_map: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<AggregationTemplate>,

    #[serde(default)]
    pub aggregation_map_mode: AggregationMapMode,

    #[serde(default)]
    pub tables: IndexMap<String, PivotConfig>,

    /// Fit maps to this source's features on first population.
    #[serde(default)]
    pub initial_map_bounds: bool,
}

/// A grid column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnConfig {
    /// Field path, or a special field token such as `#event_date#`.
    pub field: String,

    #[serde(default)]
    pub caption: String,
}

fn default_true() -> bool {
    true
}

/// A tabular grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    /// Generated when left empty.
    #[serde(default)]
    pub id: String,

    /// Source id → label.
    pub sources: IndexMap<String, String>,

    #[serde(default)]
    pub columns: Vec<ColumnConfig>,

    /// Tab panel the grid sits in, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub panel: Option<String>,

    /// Other sources that also filter on this grid's filter row.
    #[serde(default)]
    pub apply_filter_row_to_sources: Vec<String>,

    /// Read rows from a pivot table instead of hits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_table: Option<String>,

    #[serde(default = "default_true")]
    pub include_filter_row: bool,
}

/// Marker style of a map layer.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    #[default]
    Marker,
    Circle,
    Square,
    Heat,
}

/// A map layer bound to one source.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LayerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, rename = "type")]
    pub kind: LayerKind,

    /// Enabled unless set false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

/// A map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapConfig {
    /// Generated when left empty.
    #[serde(default)]
    pub id: String,

    pub sources: IndexMap<String, String>,

    /// Layers keyed by source id. Sources without an entry get a default layer.
    #[serde(default)]
    pub layers: IndexMap<String, LayerConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub panel: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_viewport: Option<Viewport>,

    /// Persisted list of layers the user switched off. Overrides `enabled`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_layers: Option<Vec<String>>,
}

/// A bulk download trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Generated when left empty.
    #[serde(default)]
    pub id: String,

    pub sources: IndexMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub panel: Option<String>,
}

/// What a standalone filter input contributes to requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputBinding {
    /// A filter parameter with explicit clause metadata.
    Param {
        #[serde(default)]
        bool_clause: BoolClause,
        query_type: QueryType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        field: Option<String>,
        /// Query template; `#value#` is replaced by the input value.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        query: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        nested: Option<String>,
    },
    /// Free-text user filter, sent in `user_filters`.
    UserFilter,
    /// Permissions context, sent as `permissions_filter`.
    Permissions,
}

/// A standalone filter input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputConfig {
    pub id: String,

    pub binding: InputBinding,

    /// Initial value.
    #[serde(default)]
    pub value: String,
}

impl PageConfig {
    /// Parse a page from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load a page file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!(
            "Loaded page {:?}: {} sources, {} grids, {} maps, {} downloads, {} inputs",
            path,
            config.sources.len(),
            config.grids.len(),
            config.maps.len(),
            config.downloads.len(),
            config.inputs.len()
        );
        Ok(config)
    }
}

/// Get the config directory path.
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("quarry"))
}

/// Get the default page file path.
pub fn default_page_path() -> Result<PathBuf, ConfigError> {
    config_dir()
        .map(|dir| dir.join("page.toml"))
        .ok_or(ConfigError::NoConfigDir)
}
