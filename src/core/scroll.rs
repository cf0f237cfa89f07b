//! Auto-scroll decisions for the streaming transcript.
//!
//! The policy is a pure function of gesture state so it can be evaluated on
//! every content-grew tick without touching the list itself. `force` is
//! reserved for exactly three moments: the input gaining focus, a message
//! send, and stream completion. Every per-fragment call passes
//! `force = false`.

/// Gesture and position state sampled from the list at decision time.
///
/// Snapshots are taken fresh for every decision; the underlying list can
/// rebind rows and change offsets at any time, so a cached snapshot is
/// never trusted across calls.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScrollSnapshot {
    pub is_user_dragging: bool,
    pub is_decelerating: bool,
    pub is_near_bottom: bool,
}

/// Decides whether the list should scroll to the bottom.
///
/// `force` always wins. Otherwise an active drag or a still-decelerating
/// fling vetoes the scroll so the pipeline never fights a manual gesture.
/// Only then does proximity to the bottom edge matter.
pub fn should_scroll(force: bool, snapshot: ScrollSnapshot) -> bool {
    if force {
        return true;
    }
    if snapshot.is_user_dragging || snapshot.is_decelerating {
        return false;
    }
    snapshot.is_near_bottom
}

/// Whether a scroll position counts as near the content's bottom edge.
///
/// `offset` is the distance from content top to viewport top; the remaining
/// distance below the viewport is compared against `threshold`.
pub fn is_near_bottom(
    content_height: f32,
    viewport_height: f32,
    offset: f32,
    threshold: f32,
) -> bool {
    let below = content_height - (offset + viewport_height);
    below <= threshold
}

/// Gesture bookkeeping the embedding list feeds as events arrive.
#[derive(Debug, Clone, Default)]
pub struct ScrollState {
    dragging: bool,
    decelerating: bool,
    content_height: f32,
    viewport_height: f32,
    offset: f32,
    near_bottom_threshold: f32,
}

impl ScrollState {
    pub fn new(near_bottom_threshold: f32) -> Self {
        Self {
            near_bottom_threshold,
            ..Self::default()
        }
    }

    pub fn set_dragging(&mut self, dragging: bool) {
        self.dragging = dragging;
    }

    pub fn set_decelerating(&mut self, decelerating: bool) {
        self.decelerating = decelerating;
    }

    pub fn set_geometry(&mut self, content_height: f32, viewport_height: f32, offset: f32) {
        self.content_height = content_height;
        self.viewport_height = viewport_height;
        self.offset = offset;
    }

    pub fn snapshot(&self) -> ScrollSnapshot {
        ScrollSnapshot {
            is_user_dragging: self.dragging,
            is_decelerating: self.decelerating,
            is_near_bottom: is_near_bottom(
                self.content_height,
                self.viewport_height,
                self.offset,
                self.near_bottom_threshold,
            ),
        }
    }
}
