//! Row lifecycle after mutating actions.
//!
//! After a record is verified, rejected or deleted the backend keeps
//! returning it until its index catches up. Removed rows are therefore
//! hidden locally. When the page runs low, the sources are refreshed with a
//! one-off exclusion of the removed ids so the page fills up again without
//! them.

use futures::future::join_all;
use quarry_core::FilterClause;
use std::sync::Arc;

use crate::consumer::{GridConsumer, RowRemoval};
use crate::source::{DataSource, PopulateOutcome, Prepared};

/// Fraction of the page size below which removal triggers a refresh.
pub const REFRESH_THRESHOLD: f64 = 0.75;

/// What happened to the grid after removing rows.
#[derive(Debug, Clone, PartialEq)]
pub enum RemovalOutcome {
    /// No row was selected or checked.
    NothingRemoved,
    /// Rows were hidden and the replacement selected in place.
    Hidden(RowRemoval),
    /// The sources were repopulated without the removed rows.
    Refreshed {
        removal: RowRemoval,
        outcomes: Vec<PopulateOutcome>,
    },
}

/// Whether `remaining` rows are too few for a page of `size`.
pub fn needs_refresh(remaining: usize, size: u32) -> bool {
    (remaining as f64) < f64::from(size) * REFRESH_THRESHOLD
}

/// Remove the grid's selected (or checked) rows and move the selection on.
///
/// `sources` are the data sources feeding the grid. Each is measured against
/// its own page size: sources left short are refreshed, the others keep the
/// rows already shown.
pub async fn hide_rows_and_move_next(
    grid: &GridConsumer,
    sources: &[Arc<DataSource>],
) -> RemovalOutcome {
    let removal = grid.remove_selected_rows();
    if removal.removed.is_empty() {
        return RemovalOutcome::NothingRemoved;
    }

    let remaining = grid.row_count();
    let (short, full): (Vec<_>, Vec<_>) = sources
        .iter()
        .partition(|source| needs_refresh(remaining, source.size()));

    if !full.is_empty() || short.is_empty() {
        grid.show_remaining();
        if let Some(id) = &removal.replacement {
            grid.select_row(id);
        }
        tracing::debug!(
            "Grid '{}': hid {} row(s), {} left",
            grid.config().id,
            removal.removed.len(),
            remaining
        );
    }
    if short.is_empty() {
        return RemovalOutcome::Hidden(removal);
    }

    tracing::debug!(
        "Grid '{}': {} row(s) left, refreshing {} source(s) without {:?}",
        grid.config().id,
        remaining,
        short.len(),
        removal.removed
    );
    grid.select_on_next_load(removal.replacement.iter().cloned().collect());

    // Every request is built while the exclusion is in place; it is gone
    // again before any of them is sent.
    let exclusion = FilterClause::exclude_ids(&removal.removed);
    let mut pending = Vec::new();
    for source in short {
        match source.with_temporary_clause(&exclusion, |s| s.prepare(true)) {
            Prepared::Dispatch(request) => pending.push((source.clone(), request)),
            Prepared::Skipped(reason) => {
                tracing::debug!("Source '{}': refresh skipped ({:?})", source.id(), reason)
            }
        }
    }

    let outcomes = join_all(
        pending
            .into_iter()
            .map(|(source, request)| async move { source.dispatch(request).await }),
    )
    .await;

    RemovalOutcome::Refreshed { removal, outcomes }
}
