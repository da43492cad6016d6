//! Grid model: rows, selection, pager and filter row.

use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use quarry_core::{value_as_text, GridConfig, Request, Response, SourceConfig};
use serde_json::{Map, Value};

use super::{Consumer, ConsumerKind};

/// One rendered row.
#[derive(Debug, Clone, PartialEq)]
pub struct GridRow {
    /// Document id, bucket key or pivot row key.
    pub id: String,
    pub doc: Value,
}

/// Paging footer state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pager {
    /// Offset of the first row.
    pub from: u64,
    pub shown: usize,
    /// Hit total. Aggregation grids have none.
    pub total: Option<u64>,
    pub can_go_back: bool,
    pub can_go_forward: bool,
}

impl Pager {
    /// The "Showing X to Y of Z" footer text, for hit lists only.
    pub fn label(&self) -> Option<String> {
        let total = self.total?;
        if self.shown == 0 {
            return Some("No hits".to_string());
        }
        Some(format!(
            "Showing {} to {} of {}",
            self.from + 1,
            self.from + self.shown as u64,
            total
        ))
    }
}

/// Rows taken out of a grid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowRemoval {
    pub removed: Vec<String>,
    /// Row to select next: the one after the removed row, else the one before.
    pub replacement: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct FilterCell {
    value: String,
    error: Option<String>,
}

#[derive(Default)]
struct GridState {
    rows: Vec<GridRow>,
    selected: Option<String>,
    multiselect: bool,
    checked: IndexSet<String>,
    select_on_next_load: Vec<String>,
    pager: Pager,
    filter_row: IndexMap<String, FilterCell>,
    loading: bool,
}

pub struct GridConsumer {
    config: GridConfig,
    state: RwLock<GridState>,
}

impl GridConsumer {
    pub fn new(config: GridConfig) -> Self {
        let mut state = GridState::default();
        if config.include_filter_row {
            for column in &config.columns {
                state
                    .filter_row
                    .insert(column.field.clone(), FilterCell::default());
            }
        }
        Self {
            config,
            state: RwLock::new(state),
        }
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn source_ids(&self) -> impl Iterator<Item = &str> {
        self.config.sources.keys().map(String::as_str)
    }

    // ===== Rows =====

    pub fn rows(&self) -> Vec<GridRow> {
        self.state.read().rows.clone()
    }

    pub fn row_count(&self) -> usize {
        self.state.read().rows.len()
    }

    pub fn pager(&self) -> Pager {
        self.state.read().pager.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.read().loading
    }

    // ===== Selection =====

    pub fn selected_id(&self) -> Option<String> {
        self.state.read().selected.clone()
    }

    pub fn selected_row(&self) -> Option<GridRow> {
        let state = self.state.read();
        let id = state.selected.as_ref()?;
        state.rows.iter().find(|r| &r.id == id).cloned()
    }

    /// Select a rendered row. Returns false if no such row is shown.
    pub fn select_row(&self, id: &str) -> bool {
        let mut state = self.state.write();
        if !state.rows.iter().any(|r| r.id == id) {
            return false;
        }
        state.selected = Some(id.to_string());
        true
    }

    pub fn clear_selection(&self) {
        self.state.write().selected = None;
    }

    pub fn set_multiselect(&self, enabled: bool) {
        let mut state = self.state.write();
        state.multiselect = enabled;
        if !enabled {
            state.checked.clear();
        }
    }

    pub fn is_multiselect(&self) -> bool {
        self.state.read().multiselect
    }

    /// Tick or untick a row's checkbox in multiselect mode.
    pub fn set_checked(&self, id: &str, checked: bool) -> bool {
        let mut state = self.state.write();
        if !state.multiselect || !state.rows.iter().any(|r| r.id == id) {
            return false;
        }
        if checked {
            state.checked.insert(id.to_string());
        } else {
            state.checked.shift_remove(id);
        }
        true
    }

    pub fn checked_ids(&self) -> Vec<String> {
        self.state.read().checked.iter().cloned().collect()
    }

    /// Rows to select when the next response is rendered.
    pub fn select_on_next_load(&self, ids: Vec<String>) {
        self.state.write().select_on_next_load = ids;
    }

    /// Remove the checked rows in multiselect mode, else the selected row.
    pub fn remove_selected_rows(&self) -> RowRemoval {
        let mut state = self.state.write();
        if state.multiselect {
            let removed: Vec<String> = state.checked.drain(..).collect();
            state.rows.retain(|r| !removed.contains(&r.id));
            if state.selected.as_ref().is_some_and(|s| removed.contains(s)) {
                state.selected = None;
            }
            return RowRemoval {
                removed,
                replacement: None,
            };
        }

        let Some(selected) = state.selected.take() else {
            return RowRemoval::default();
        };
        let Some(pos) = state.rows.iter().position(|r| r.id == selected) else {
            return RowRemoval::default();
        };
        let replacement = state
            .rows
            .get(pos + 1)
            .or_else(|| pos.checked_sub(1).and_then(|p| state.rows.get(p)))
            .map(|r| r.id.clone());
        state.rows.remove(pos);
        RowRemoval {
            removed: vec![selected],
            replacement,
        }
    }

    /// Shrink the pager to the rows still shown after a local removal.
    pub fn show_remaining(&self) {
        let mut state = self.state.write();
        state.pager.shown = state.rows.len();
    }

    // ===== Filter row =====

    /// Set a filter cell. Returns false if the grid has no such cell.
    pub fn set_filter(&self, field: &str, value: &str) -> bool {
        match self.state.write().filter_row.get_mut(field) {
            Some(cell) => {
                cell.value = value.to_string();
                true
            }
            None => false,
        }
    }

    /// Fields and values of the non-empty filter cells.
    pub fn filter_values(&self) -> Vec<(String, String)> {
        self.state
            .read()
            .filter_row
            .iter()
            .filter(|(_, cell)| !cell.value.trim().is_empty())
            .map(|(field, cell)| (field.clone(), cell.value.clone()))
            .collect()
    }

    pub fn flag_filter_error(&self, field: &str, message: &str) {
        if let Some(cell) = self.state.write().filter_row.get_mut(field) {
            cell.error = Some(message.to_string());
        }
    }

    pub fn filter_error(&self, field: &str) -> Option<String> {
        self.state
            .read()
            .filter_row
            .get(field)
            .and_then(|c| c.error.clone())
    }

    pub fn clear_filter_errors(&self) {
        for cell in self.state.write().filter_row.values_mut() {
            cell.error = None;
        }
    }

    // ===== Population =====

    fn rows_from(&self, settings: &SourceConfig, response: &Response) -> Vec<GridRow> {
        if let Some(name) = &self.config.source_table {
            return response
                .tables
                .get(name)
                .map(|table| {
                    table
                        .rows
                        .iter()
                        .map(|row| {
                            let mut doc = Map::new();
                            doc.insert("key".to_string(), Value::String(row.key.clone()));
                            for (column, count) in &row.cells {
                                doc.insert(column.clone(), Value::from(*count));
                            }
                            GridRow {
                                id: row.key.clone(),
                                doc: Value::Object(doc),
                            }
                        })
                        .collect()
                })
                .unwrap_or_default();
        }

        if let Some(template) = &settings.aggregation {
            let buckets = response
                .aggregations
                .as_ref()
                .and_then(|aggs| template.buckets(aggs));
            return buckets
                .map(|buckets| {
                    buckets
                        .iter()
                        .enumerate()
                        .map(|(i, bucket)| GridRow {
                            id: bucket
                                .get("key")
                                .map(value_as_text)
                                .unwrap_or_else(|| i.to_string()),
                            doc: bucket.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default();
        }

        response
            .hits
            .hits
            .iter()
            .enumerate()
            .map(|(i, hit)| GridRow {
                id: hit.id.clone().unwrap_or_else(|| i.to_string()),
                doc: hit.source.clone(),
            })
            .collect()
    }

    fn pager_for(
        &self,
        settings: &SourceConfig,
        response: &Response,
        request: &Request,
        shown: usize,
    ) -> Pager {
        match &settings.aggregation {
            Some(template) if template.is_composite() => Pager {
                from: 0,
                shown,
                total: None,
                can_go_back: request
                    .aggs
                    .as_ref()
                    .and_then(|aggs| template.cursor(aggs))
                    .is_some(),
                can_go_forward: response
                    .aggregations
                    .as_ref()
                    .and_then(|aggs| template.after_key(aggs))
                    .is_some(),
            },
            Some(_) => Pager {
                shown,
                ..Default::default()
            },
            None if self.config.source_table.is_some() => Pager {
                shown,
                ..Default::default()
            },
            None => {
                let from = request.from.unwrap_or(0);
                let total = response.hits.total.value();
                Pager {
                    from,
                    shown,
                    total: Some(total),
                    can_go_back: from > 0,
                    can_go_forward: from + (shown as u64) < total,
                }
            }
        }
    }
}

impl Consumer for GridConsumer {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn kind(&self) -> ConsumerKind {
        ConsumerKind::Grid
    }

    fn panel(&self) -> Option<String> {
        self.config.panel.clone()
    }

    fn needs_population(&self, _source: &str) -> bool {
        true
    }

    fn populate(&self, settings: &SourceConfig, response: &Response, request: &Request) {
        let rows = self.rows_from(settings, response);
        let pager = self.pager_for(settings, response, request, rows.len());

        let mut state = self.state.write();
        let wanted = std::mem::take(&mut state.select_on_next_load);
        state.selected = wanted
            .into_iter()
            .find(|id| rows.iter().any(|r| &r.id == id));
        state.checked.clear();
        state.rows = rows;
        state.pager = pager;
        tracing::debug!(
            "Grid '{}' populated from '{}' with {} rows",
            self.config.id,
            settings.id,
            state.rows.len()
        );
    }

    fn set_loading(&self, loading: bool) {
        self.state.write().loading = loading;
    }

    fn last_page_reached(&self) {
        self.state.write().pager.can_go_forward = false;
    }
}
