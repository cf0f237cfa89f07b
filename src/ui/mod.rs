//! Contracts between the pipeline and the embedding list UI.
//!
//! The pipeline never owns a view. The list owns its rows, answers
//! visibility queries, and applies refresh/relayout/scroll commands; the
//! pipeline only ever holds these seams for the duration of one call.

use std::collections::HashMap;

use crate::core::scroll::ScrollSnapshot;

/// Minimal contract a visible row element implements to receive streamed
/// text. `Chunk` items from the session channel land here; each append is
/// also the row's cue to notify its list that content grew.
pub trait RenderTarget {
    fn append_text(&mut self, piece: &str);
}

/// The list-side surface the pipeline drives while processing one stream
/// item. Implementations must answer `is_row_visible` fresh on every call:
/// the list can reuse and rebind rows at any time, so yesterday's answer is
/// worthless.
pub trait ListSurface {
    fn is_row_visible(&self, row: usize) -> bool;
    /// Re-read the row's model content into whatever element is (or
    /// becomes) bound to it. Issued at most once per refresh interval while
    /// the row is off-screen, and once at stream end to catch up.
    fn refresh_row(&mut self, row: usize);
    /// Recompute the row's size. More expensive than a text append, hence
    /// its own throttle interval.
    fn relayout_row(&mut self, row: usize);
    fn scroll_to_bottom(&mut self);
    fn scroll_snapshot(&self) -> ScrollSnapshot;
}

/// Row-index-to-element table the list owner maintains as rows bind and
/// unbind. Lookups go through the index on every call instead of holding a
/// reference across suspension points.
#[derive(Debug, Default)]
pub struct RowTable<H> {
    rows: HashMap<usize, H>,
}

impl<H> RowTable<H> {
    pub fn new() -> Self {
        Self {
            rows: HashMap::new(),
        }
    }

    /// Binds an element handle to a row, replacing any previous binding
    /// (the list reuses elements freely).
    pub fn bind(&mut self, row: usize, handle: H) -> Option<H> {
        self.rows.insert(row, handle)
    }

    pub fn unbind(&mut self, row: usize) -> Option<H> {
        self.rows.remove(&row)
    }

    pub fn is_bound(&self, row: usize) -> bool {
        self.rows.contains_key(&row)
    }

    pub fn handle(&self, row: usize) -> Option<&H> {
        self.rows.get(&row)
    }

    pub fn handle_mut(&mut self, row: usize) -> Option<&mut H> {
        self.rows.get_mut(&row)
    }
}
