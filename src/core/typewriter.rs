use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;
use unicode_segmentation::UnicodeSegmentation;

use crate::core::session::SessionEvent;

struct QueueState {
    pending: VecDeque<String>,
    draining: bool,
    enabled: bool,
}

/// Paces already-received text onto the screen one character at a time.
///
/// Appended text is split into user-perceived characters (grapheme clusters,
/// so multi-byte scripts and ZWJ emoji are never cut mid-character) and
/// drained by a single lazily-started task that emits one
/// [`SessionEvent::Chunk`] per character, then sleeps `delay` before the
/// next. Each emitted chunk doubles as the "content grew" signal the
/// embedding UI feeds into its auto-scroll decision.
///
/// Every grapheme ever enqueued is emitted exactly once, in order, unless
/// the whole session is cancelled: queue mutation and emission share one
/// lock, so the drain task and a flush can interleave without reordering or
/// dropping characters. The only suspension point is the per-character
/// sleep, which keeps cancellation prompt.
pub struct TypewriterQueue {
    state: Arc<Mutex<QueueState>>,
    delay: Duration,
    events: mpsc::UnboundedSender<(SessionEvent, u64)>,
    stream_id: u64,
    cancel: CancellationToken,
}

impl TypewriterQueue {
    pub fn new(
        delay: Duration,
        enabled: bool,
        events: mpsc::UnboundedSender<(SessionEvent, u64)>,
        stream_id: u64,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                pending: VecDeque::new(),
                draining: false,
                enabled,
            })),
            delay,
            events,
            stream_id,
            cancel,
        }
    }

    /// Queues text for paced emission, or emits it immediately while the
    /// typewriter is disabled. Starts the drain task if none is running;
    /// appends during an active drain only enqueue.
    pub fn append(&self, text: &str) {
        if text.is_empty() || self.cancel.is_cancelled() {
            return;
        }

        let mut state = self.lock();
        if !state.enabled {
            let _ = self
                .events
                .send((SessionEvent::Chunk(text.to_string()), self.stream_id));
            return;
        }

        state
            .pending
            .extend(text.graphemes(true).map(str::to_string));

        if !state.draining {
            state.draining = true;
            drop(state);
            self.spawn_drain_loop();
        }
    }

    /// Turning the typewriter off flushes everything still pending as one
    /// in-order batch, after which the drain task winds down on its own.
    /// Turning it on affects future `append` calls only.
    pub fn set_enabled(&self, on: bool) {
        let mut state = self.lock();
        state.enabled = on;
        if on {
            return;
        }
        if !state.pending.is_empty() {
            let batch: String = state.pending.drain(..).collect();
            trace!(len = batch.len(), "flushed typewriter remainder");
            let _ = self
                .events
                .send((SessionEvent::Chunk(batch), self.stream_id));
        }
    }

    /// Session teardown only: discards pending characters without emitting
    /// and stops the drain task mid-sleep. Terminal; the queue is not
    /// reusable afterward.
    pub fn cancel(&self) {
        {
            let mut state = self.lock();
            state.pending.clear();
        }
        self.cancel.cancel();
    }

    fn spawn_drain_loop(&self) {
        let state = Arc::clone(&self.state);
        let events = self.events.clone();
        let stream_id = self.stream_id;
        let delay = self.delay;
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                {
                    let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                    let Some(grapheme) = state.pending.pop_front() else {
                        state.draining = false;
                        return;
                    };
                    let _ = events.send((SessionEvent::Chunk(grapheme), stream_id));
                }
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return,
                }
            }
        });
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }
}
