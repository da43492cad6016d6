//! Panel visibility and deferred population.
//!
//! Widgets inside a hidden tab panel are not populated. Instead the data
//! source registers a one-shot hook on the panel; when the panel is shown the
//! hooks fire once and are discarded.
//!
//! ## Hook Lifetime
//!
//! - At most one pending hook per (panel, source) pair
//! - Showing a panel drains every hook registered on it
//! - Hooks can be removed early by id

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global counter for generating unique hook IDs.
static PANEL_HOOK_COUNTER: AtomicU64 = AtomicU64::new(0);

fn generate_hook_id() -> String {
    let id = PANEL_HOOK_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("panel-hook:{}", id)
}

/// A pending repopulation for a source, waiting for its panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelHook {
    /// Unique identifier for removal.
    pub id: String,

    /// Source to populate when the panel is shown.
    pub source: String,
}

/// Tracks which panels are hidden and who waits for them.
pub struct PanelTracker {
    hidden: RwLock<HashSet<String>>,
    hooks: RwLock<HashMap<String, Vec<PanelHook>>>,
}

impl PanelTracker {
    pub fn new() -> Self {
        Self {
            hidden: RwLock::new(HashSet::new()),
            hooks: RwLock::new(HashMap::new()),
        }
    }

    /// Panels are visible until hidden.
    pub fn is_visible(&self, panel: &str) -> bool {
        !self.hidden.read().contains(panel)
    }

    pub fn hide(&self, panel: &str) {
        if self.hidden.write().insert(panel.to_string()) {
            tracing::debug!("Panel '{}' hidden", panel);
        }
    }

    /// Mark a panel visible and take the sources waiting for it.
    pub fn show(&self, panel: &str) -> Vec<String> {
        self.hidden.write().remove(panel);
        let hooks = self.hooks.write().remove(panel).unwrap_or_default();
        if !hooks.is_empty() {
            tracing::debug!(
                "Panel '{}' shown, firing {} deferred population(s)",
                panel,
                hooks.len()
            );
        }
        hooks.into_iter().map(|h| h.source).collect()
    }

    /// Register a one-shot population hook for a source.
    ///
    /// Returns the id of the pending hook; an existing hook for the same
    /// source is reused rather than duplicated.
    pub fn defer(&self, panel: &str, source: &str) -> String {
        let mut hooks = self.hooks.write();
        let pending = hooks.entry(panel.to_string()).or_default();
        if let Some(existing) = pending.iter().find(|h| h.source == source) {
            return existing.id.clone();
        }
        let id = generate_hook_id();
        pending.push(PanelHook {
            id: id.clone(),
            source: source.to_string(),
        });
        tracing::debug!(
            "Deferred population of '{}' until panel '{}' is shown (id: {})",
            source,
            panel,
            id
        );
        id
    }

    /// Number of hooks waiting on a panel.
    pub fn pending(&self, panel: &str) -> usize {
        self.hooks.read().get(panel).map(Vec::len).unwrap_or(0)
    }
}

impl Default for PanelTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panels_start_visible() {
        let panels = PanelTracker::new();
        assert!(panels.is_visible("tab-map"));
        panels.hide("tab-map");
        assert!(!panels.is_visible("tab-map"));
    }

    #[test]
    fn test_defer_is_one_shot() {
        let panels = PanelTracker::new();
        panels.hide("tab-map");
        panels.defer("tab-map", "squares");

        assert_eq!(panels.show("tab-map"), vec!["squares".to_string()]);
        assert!(panels.is_visible("tab-map"));
        assert!(panels.show("tab-map").is_empty());
    }

    #[test]
    fn test_defer_does_not_duplicate() {
        let panels = PanelTracker::new();
        let first = panels.defer("tab-map", "squares");
        let second = panels.defer("tab-map", "squares");
        panels.defer("tab-map", "records");

        assert_eq!(first, second);
        assert!(first.starts_with("panel-hook:"));
        assert_eq!(panels.pending("tab-map"), 2);
    }
}
