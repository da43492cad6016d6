//! Paging state for a data source.
//!
//! Hit lists page by offset. Composite aggregations page by cursor: each
//! response carries an `after_key` that is stored as the cursor of the next
//! page, so moving back reuses a cursor that is already known.

use serde_json::Value;
use std::collections::BTreeMap;

/// Upper bound on stored cursors.
pub const MAX_CURSOR_PAGES: usize = 1000;

/// Page size when a source does not set one, matching the backend default.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// How a source moves between pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingMode {
    Offset,
    Composite,
}

/// Result of recording a composite response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorOutcome {
    /// Nothing to record for this paging mode.
    Ignored,
    /// A cursor for the next page was stored.
    Stored,
    /// The response was the last page.
    LastPage,
    /// A forward move found no more data. The page was rolled back.
    Overrun,
}

#[derive(Debug, Clone)]
pub struct PaginationState {
    mode: PagingMode,
    size: u32,
    from: u64,
    page: u32,
    after_keys: BTreeMap<u32, Value>,
    /// Bumped on every reset.
    generation: u64,
}

impl PaginationState {
    pub fn new(mode: PagingMode, size: u32) -> Self {
        Self {
            mode,
            size,
            from: 0,
            page: 0,
            after_keys: BTreeMap::new(),
            generation: 0,
        }
    }

    pub fn mode(&self) -> PagingMode {
        self.mode
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn set_size(&mut self, size: u32) {
        self.size = size;
    }

    /// Offset of the first row.
    pub fn from(&self) -> u64 {
        self.from
    }

    /// Zero-based composite page.
    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Cursor to send for the current page. Page 0 never has one.
    pub fn cursor(&self) -> Option<&Value> {
        if self.page == 0 {
            return None;
        }
        self.after_keys.get(&self.page)
    }

    pub fn can_go_back(&self) -> bool {
        match self.mode {
            PagingMode::Offset => self.from > 0,
            PagingMode::Composite => self.page > 0,
        }
    }

    /// Composite only: forward needs a stored cursor for the next page.
    pub fn has_next_cursor(&self) -> bool {
        self.after_keys.contains_key(&(self.page + 1))
    }

    /// Move forward past the rows currently rendered.
    ///
    /// Returns false when there is nowhere to go.
    pub fn forward(&mut self, rendered_rows: usize) -> bool {
        match self.mode {
            PagingMode::Offset => {
                if rendered_rows == 0 {
                    return false;
                }
                self.from += rendered_rows as u64;
                true
            }
            PagingMode::Composite => {
                if !self.has_next_cursor() {
                    return false;
                }
                self.page += 1;
                true
            }
        }
    }

    /// Move back one page. Offsets floor at zero.
    pub fn backward(&mut self) -> bool {
        if !self.can_go_back() {
            return false;
        }
        match self.mode {
            PagingMode::Offset => self.from = self.from.saturating_sub(self.size as u64),
            PagingMode::Composite => self.page -= 1,
        }
        true
    }

    /// Record the `after_key` of a composite response for `page`.
    pub fn record_cursor(&mut self, page: u32, after_key: Option<&Value>) -> CursorOutcome {
        if self.mode != PagingMode::Composite {
            return CursorOutcome::Ignored;
        }
        match after_key {
            Some(key) => {
                let next = page + 1;
                if !self.after_keys.contains_key(&next) && self.after_keys.len() >= MAX_CURSOR_PAGES {
                    tracing::warn!("Cursor limit of {} pages reached", MAX_CURSOR_PAGES);
                    return CursorOutcome::LastPage;
                }
                self.after_keys.insert(next, key.clone());
                CursorOutcome::Stored
            }
            None if page > 0 => {
                // The cursor that led here points past the end.
                self.after_keys.remove(&page);
                if self.page == page {
                    self.page -= 1;
                }
                CursorOutcome::Overrun
            }
            None => CursorOutcome::LastPage,
        }
    }

    /// Record a response to a request prepared under `generation`.
    ///
    /// A request sent before the last reset cannot store a cursor for, or
    /// roll back from, a page past the current one.
    pub fn record_response(
        &mut self,
        generation: u64,
        page: u32,
        after_key: Option<&Value>,
    ) -> CursorOutcome {
        if generation != self.generation && page > self.page {
            tracing::debug!("Ignoring cursor of page {} from before a reset", page);
            return CursorOutcome::Ignored;
        }
        self.record_cursor(page, after_key)
    }

    /// Back to the first page, forgetting every cursor.
    pub fn reset(&mut self) {
        self.from = 0;
        self.page = 0;
        self.after_keys.clear();
        self.generation += 1;
    }
}
