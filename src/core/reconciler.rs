use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::core::clock::Clock;

/// How one sanitized fragment should reach the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderDecision {
    /// A live element is bound to the row: route text through the
    /// typewriter, and recompute the row's size only when `relayout` is set.
    Visible { relayout: bool },
    /// No live element (row scrolled away): the model has already been
    /// updated; issue a full-row refresh only when `refresh` is set.
    Offscreen { refresh: bool },
}

/// Per-fragment routing with two independent monotonic throttles.
///
/// The model append itself is never throttled; only the expensive signals
/// are. Off-screen rows get at most one full refresh per
/// `min_refresh_interval`, and visible rows at most one size recomputation
/// per `min_relayout_interval`. Whatever a skipped tick leaves stale, the
/// next allowed tick or stream completion catches up.
///
/// A fragment finding its row gone is the normal off-screen branch, not an
/// error: the list rebinds rows at will between fragment arrival and
/// processing.
pub struct RenderReconciler {
    clock: Arc<dyn Clock>,
    min_refresh_interval: Duration,
    min_relayout_interval: Duration,
    last_refresh: Option<Instant>,
    last_relayout: Option<Instant>,
}

impl RenderReconciler {
    pub fn new(
        clock: Arc<dyn Clock>,
        min_refresh_interval: Duration,
        min_relayout_interval: Duration,
    ) -> Self {
        Self {
            clock,
            min_refresh_interval,
            min_relayout_interval,
            last_refresh: None,
            last_relayout: None,
        }
    }

    pub fn decide(&mut self, visible: bool) -> RenderDecision {
        let now = self.clock.now();
        let decision = if visible {
            let relayout = Self::due(self.last_relayout, now, self.min_relayout_interval);
            if relayout {
                self.last_relayout = Some(now);
            }
            RenderDecision::Visible { relayout }
        } else {
            let refresh = Self::due(self.last_refresh, now, self.min_refresh_interval);
            if refresh {
                self.last_refresh = Some(now);
            }
            RenderDecision::Offscreen { refresh }
        };
        trace!(?decision, "reconciled fragment");
        decision
    }

    fn due(last: Option<Instant>, now: Instant, interval: Duration) -> bool {
        match last {
            Some(stamp) => now.duration_since(stamp) >= interval,
            None => true,
        }
    }
}
