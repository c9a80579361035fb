//! Paging cursor
//!
//! A cursor freezes `total_entries` and `total_pages` when it is opened and
//! holds no statement between pages: every page move re-runs the query at
//! the new offset. Writes made after a cursor was opened therefore show up
//! in later pages but never change its totals.

use crate::query::total_pages;
use serde::Serialize;
use serde_json::Value;
use soupstore_core::{QuerySpec, SoupResult};

/// Cursor id, unique per store instance
pub type CursorId = u64;

/// Paging handle over one query execution
///
/// Serializes to the camelCase wire form:
/// `{cursorId, currentPageIndex, pageSize, totalEntries, totalPages,
/// currentPageOrderedEntries}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    /// Id in the store's live-cursor table
    pub cursor_id: CursorId,
    /// Page currently loaded
    pub current_page_index: usize,
    /// Entries per page
    pub page_size: usize,
    /// Matches counted at creation
    pub total_entries: usize,
    /// `ceil(total_entries / page_size)` at creation
    pub total_pages: usize,
    /// Entries of the current page, in query order
    pub current_page_ordered_entries: Vec<Value>,

    #[serde(skip)]
    pub(crate) soup: Option<String>,
    #[serde(skip)]
    pub(crate) spec: QuerySpec,
}

impl Cursor {
    pub(crate) fn new(
        cursor_id: CursorId,
        soup: Option<String>,
        spec: QuerySpec,
        total_entries: usize,
        first_page: Vec<Value>,
    ) -> Self {
        let page_size = spec.page_size;
        Cursor {
            cursor_id,
            current_page_index: 0,
            page_size,
            total_entries,
            total_pages: total_pages(total_entries, page_size),
            current_page_ordered_entries: first_page,
            soup,
            spec,
        }
    }

    /// Soup the cursor is scoped to, `None` for smart cursors
    pub fn soup(&self) -> Option<&str> {
        self.soup.as_deref()
    }

    /// Query the cursor pages through
    pub fn query_spec(&self) -> &QuerySpec {
        &self.spec
    }

    /// Clamp a requested page index to `[0, total_pages - 1]`
    pub fn clamp_page(&self, page_index: usize) -> usize {
        page_index.min(self.total_pages.saturating_sub(1))
    }

    /// Check if a later page exists
    pub fn has_next_page(&self) -> bool {
        self.current_page_index + 1 < self.total_pages
    }

    /// Wire form as JSON
    pub fn to_json(&self) -> SoupResult<Value> {
        Ok(serde_json::to_value(self)?)
    }
}
