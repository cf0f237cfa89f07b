use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::EventKind;
use crate::core::clock::{Clock, SystemClock};
use crate::core::config::PipelineConfig;
use crate::core::error::StreamError;
use crate::core::event_stream::StreamMessage;
use crate::core::message::Conversation;
use crate::core::reconciler::{RenderDecision, RenderReconciler};
use crate::core::sanitizer::FootnoteSanitizer;
use crate::core::scroll::should_scroll;
use crate::core::typewriter::TypewriterQueue;
use crate::ui::ListSurface;

/// Lifecycle of one request/response cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

/// One item on the pipeline's outbound channel, tagged with its stream id.
///
/// The channel is ordered, and `Completed`/`Failed` are the only terminal
/// items: a session that runs to its own end emits exactly one of them,
/// after every `Chunk` belonging to it. Cancellation emits nothing — the
/// canceller already knows. Each `Chunk` is also the "content grew" signal
/// the embedding UI feeds into its auto-scroll decision.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Server-side status text for the waiting indicator.
    Action(String),
    /// Paced (or flushed) text for the visible element bound to the
    /// streaming message.
    Chunk(String),
    /// The stream finished; carries the full accumulated answer.
    Completed(String),
    /// The stream failed; whatever text already rendered is kept.
    Failed(StreamError),
}

/// Everything owned by one in-flight answer: its sanitizer and typewriter
/// are constructed fresh at send and never shared, so concurrent
/// conversations cannot cross-contaminate footnote state.
struct StreamSession {
    state: SessionState,
    stream_id: u64,
    message_id: u64,
    message_index: usize,
    sanitizer: FootnoteSanitizer,
    typewriter: TypewriterQueue,
    reconciler: RenderReconciler,
    cancel_token: CancellationToken,
}

/// Caller-side handle for one stream: carries the id used to tag channel
/// items and the token that tears the transport down.
pub struct StreamHandle {
    pub stream_id: u64,
    cancel_token: CancellationToken,
}

impl StreamHandle {
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Terminates the underlying connection promptly. Safe to call any
    /// number of times.
    pub fn disconnect(&self) {
        self.cancel_token.cancel();
    }
}

/// Orchestrates the streaming pipeline for one conversation.
///
/// At most one session is active at a time; [`ChatPipeline::send`] forces
/// the previous one to cancelled before starting the next. Incoming
/// [`StreamMessage`]s are processed strictly in arrival order by
/// [`ChatPipeline::handle_stream_message`], the single consumer; items
/// tagged with a superseded stream id are dropped, which is what keeps a
/// late fragment from mutating a cancelled message.
pub struct ChatPipeline {
    conversation: Conversation,
    config: PipelineConfig,
    clock: Arc<dyn Clock>,
    events_tx: mpsc::UnboundedSender<(SessionEvent, u64)>,
    current: Option<StreamSession>,
    next_stream_id: u64,
}

impl ChatPipeline {
    pub fn new(
        config: PipelineConfig,
    ) -> (Self, mpsc::UnboundedReceiver<(SessionEvent, u64)>) {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: PipelineConfig,
        clock: Arc<dyn Clock>,
    ) -> (Self, mpsc::UnboundedReceiver<(SessionEvent, u64)>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                conversation: Conversation::new(),
                config,
                clock,
                events_tx,
                current: None,
                next_stream_id: 0,
            },
            events_rx,
        )
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn state(&self) -> SessionState {
        self.current
            .as_ref()
            .map(|session| session.state)
            .unwrap_or(SessionState::Idle)
    }

    pub fn is_current_stream(&self, stream_id: u64) -> bool {
        self.current
            .as_ref()
            .is_some_and(|session| session.stream_id == stream_id)
    }

    /// Starts a new request/response cycle: cancels any session still in
    /// flight, inserts the user message plus the empty assistant message the
    /// stream will fill, and builds the session's fresh sanitizer and
    /// typewriter. The returned handle is what the caller hands to the
    /// event source pump; if connecting fails, route the failure back in as
    /// a [`StreamMessage::Error`] tagged with the handle's id.
    pub fn send(&mut self, prompt: &str, surface: &mut dyn ListSurface) -> StreamHandle {
        self.cancel_current();

        self.next_stream_id += 1;
        let stream_id = self.next_stream_id;
        let cancel_token = CancellationToken::new();

        self.conversation.push_user(prompt);
        let message_id = self.conversation.push_assistant_placeholder();
        let message_index = self.conversation.messages().len() - 1;

        let typewriter = TypewriterQueue::new(
            self.config.typewriter_delay(),
            self.config.typewriter_enabled,
            self.events_tx.clone(),
            stream_id,
            cancel_token.child_token(),
        );
        let reconciler = RenderReconciler::new(
            Arc::clone(&self.clock),
            self.config.min_refresh_interval(),
            self.config.min_relayout_interval(),
        );

        self.current = Some(StreamSession {
            state: SessionState::Streaming,
            stream_id,
            message_id,
            message_index,
            sanitizer: FootnoteSanitizer::new(),
            typewriter,
            reconciler,
            cancel_token: cancel_token.clone(),
        });
        debug!(stream_id, "stream session started");

        // Message send is one of the three forced scroll points.
        if should_scroll(true, surface.scroll_snapshot()) {
            surface.scroll_to_bottom();
        }

        StreamHandle {
            stream_id,
            cancel_token,
        }
    }

    /// Cancels the in-flight session, if any. Idempotent. The state flips
    /// before the queue is torn down, so a fragment racing the cancellation
    /// is dropped rather than appended to a finished message. The partially
    /// built message keeps whatever text it holds.
    pub fn cancel_current(&mut self) {
        if let Some(session) = self.current.as_mut() {
            if session.state == SessionState::Streaming {
                session.state = SessionState::Cancelled;
                session.cancel_token.cancel();
                session.typewriter.cancel();
                self.conversation.finalize(session.message_id);
                debug!(stream_id = session.stream_id, "stream session cancelled");
            }
        }
    }

    /// Settling pause before the first scroll to a freshly inserted
    /// message, so the insert animation lands before the list moves.
    pub async fn settle_before_first_scroll(&self) {
        tokio::time::sleep(self.config.first_scroll_delay()).await;
    }

    /// Processes one decoded stream item. This is the pipeline's single
    /// ordered consumer; it must be called in channel order.
    pub fn handle_stream_message(
        &mut self,
        message: StreamMessage,
        stream_id: u64,
        surface: &mut dyn ListSurface,
    ) {
        if !self.is_current_stream(stream_id) {
            debug!(stream_id, "dropped item for superseded stream");
            return;
        }
        let Some(session) = self.current.as_mut() else {
            return;
        };
        if session.state != SessionState::Streaming {
            debug!(stream_id, state = ?session.state, "dropped item for finished session");
            return;
        }

        match message {
            StreamMessage::Event(event) => match event.kind {
                EventKind::Action => {
                    if let Some(speak) = event.data.speak {
                        let _ = self.events_tx.send((SessionEvent::Action(speak), stream_id));
                    }
                }
                EventKind::Continue => {
                    let Some(raw) = event.data.content else {
                        return;
                    };
                    let clean = session.sanitizer.process(&raw);
                    if clean.is_empty() {
                        return;
                    }

                    // Model first: the message text is authoritative and its
                    // update is never throttled.
                    self.conversation.append_content(session.message_id, &clean);

                    let row = session.message_index;
                    match session.reconciler.decide(surface.is_row_visible(row)) {
                        RenderDecision::Visible { relayout } => {
                            session.typewriter.append(&clean);
                            if relayout {
                                surface.relayout_row(row);
                            }
                        }
                        RenderDecision::Offscreen { refresh } => {
                            if refresh {
                                surface.refresh_row(row);
                            }
                        }
                    }

                    if should_scroll(false, surface.scroll_snapshot()) {
                        surface.scroll_to_bottom();
                    }
                }
                EventKind::Complete => {
                    // The payload is intentionally ignored: servers may
                    // resend the full answer, but the client already holds
                    // it incrementally.
                    session.typewriter.set_enabled(false);
                    session.cancel_token.cancel();
                    self.conversation.finalize(session.message_id);
                    session.state = SessionState::Completed;

                    // Catch up anything a throttled tick skipped.
                    surface.refresh_row(session.message_index);

                    let final_text = self
                        .conversation
                        .get(session.message_id)
                        .map(|message| message.content.clone())
                        .unwrap_or_default();
                    let _ = self
                        .events_tx
                        .send((SessionEvent::Completed(final_text), stream_id));
                    debug!(stream_id, "stream session completed");

                    // Stream completion is a forced scroll point.
                    if should_scroll(true, surface.scroll_snapshot()) {
                        surface.scroll_to_bottom();
                    }
                }
            },
            StreamMessage::Error(error) => {
                fail_session(
                    &mut self.conversation,
                    &self.events_tx,
                    session,
                    surface,
                    error,
                );
            }
            StreamMessage::End => {
                // End while still streaming means the connection dropped
                // before `complete` arrived.
                fail_session(
                    &mut self.conversation,
                    &self.events_tx,
                    session,
                    surface,
                    StreamError::Connection("stream ended before completion".to_string()),
                );
            }
        }
    }
}

fn fail_session(
    conversation: &mut Conversation,
    events_tx: &mpsc::UnboundedSender<(SessionEvent, u64)>,
    session: &mut StreamSession,
    surface: &mut dyn ListSurface,
    error: StreamError,
) {
    warn!(stream_id = session.stream_id, error = %error, "stream session failed");

    // Flush already-accepted typed characters so the user keeps every bit
    // of visible progress, then tear the transport down.
    session.typewriter.set_enabled(false);
    session.cancel_token.cancel();
    conversation.finalize(session.message_id);
    session.state = SessionState::Failed;

    surface.refresh_row(session.message_index);
    let _ = events_tx.send((SessionEvent::Failed(error), session.stream_id));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::StreamEvent;
    use crate::core::clock::ManualClock;
    use crate::core::scroll::ScrollSnapshot;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSurface {
        visible: bool,
        snapshot: ScrollSnapshot,
        refreshes: Vec<usize>,
        relayouts: Vec<usize>,
        scrolls: usize,
    }

    impl ListSurface for RecordingSurface {
        fn is_row_visible(&self, _row: usize) -> bool {
            self.visible
        }

        fn refresh_row(&mut self, row: usize) {
            self.refreshes.push(row);
        }

        fn relayout_row(&mut self, row: usize) {
            self.relayouts.push(row);
        }

        fn scroll_to_bottom(&mut self) {
            self.scrolls += 1;
        }

        fn scroll_snapshot(&self) -> ScrollSnapshot {
            self.snapshot
        }
    }

    fn config(typewriter_enabled: bool) -> PipelineConfig {
        PipelineConfig {
            typewriter_delay_ms: 1,
            typewriter_enabled,
            ..PipelineConfig::default()
        }
    }

    fn fragment(content: &str) -> StreamMessage {
        StreamMessage::Event(StreamEvent::fragment(content))
    }

    async fn drain_until_terminal(
        rx: &mut mpsc::UnboundedReceiver<(SessionEvent, u64)>,
    ) -> (String, SessionEvent) {
        let mut chunks = String::new();
        loop {
            match rx.recv().await.expect("channel open") {
                (SessionEvent::Chunk(piece), _) => chunks.push_str(&piece),
                (terminal, _) => return (chunks, terminal),
            }
        }
    }

    #[tokio::test]
    async fn streamed_fragments_render_through_the_typewriter() {
        let (mut pipeline, mut rx) = ChatPipeline::new(config(true));
        let mut surface = RecordingSurface {
            visible: true,
            ..RecordingSurface::default()
        };

        let handle = pipeline.send("hello?", &mut surface);
        pipeline.handle_stream_message(fragment("hi "), handle.stream_id, &mut surface);
        pipeline.handle_stream_message(fragment("there"), handle.stream_id, &mut surface);
        pipeline.handle_stream_message(
            StreamMessage::Event(StreamEvent::complete()),
            handle.stream_id,
            &mut surface,
        );

        let (chunks, terminal) = drain_until_terminal(&mut rx).await;
        assert_eq!(chunks, "hi there");
        assert_eq!(terminal, SessionEvent::Completed("hi there".to_string()));
        assert_eq!(pipeline.state(), SessionState::Completed);

        let message = pipeline.conversation().messages().last().expect("assistant row");
        assert_eq!(message.content, "hi there");
        assert!(!message.is_streaming);
    }

    // Regression pinned from the field: a footnote span arriving as its own
    // fragment between two text fragments must vanish without eating the
    // text around it.
    #[tokio::test]
    async fn footnote_fragment_between_text_fragments_is_swallowed() {
        let (mut pipeline, mut rx) = ChatPipeline::new(config(true));
        let mut surface = RecordingSurface {
            visible: true,
            ..RecordingSurface::default()
        };

        let handle = pipeline.send("날씨 알려줘", &mut surface);
        for piece in ["안녕", "[^1]", "하세요"] {
            pipeline.handle_stream_message(fragment(piece), handle.stream_id, &mut surface);
        }
        pipeline.handle_stream_message(
            StreamMessage::Event(StreamEvent::complete()),
            handle.stream_id,
            &mut surface,
        );

        let (chunks, terminal) = drain_until_terminal(&mut rx).await;
        assert_eq!(chunks, "안녕하세요");
        assert_eq!(terminal, SessionEvent::Completed("안녕하세요".to_string()));
    }

    #[tokio::test]
    async fn complete_payload_is_ignored() {
        let (mut pipeline, mut rx) = ChatPipeline::new(config(false));
        let mut surface = RecordingSurface {
            visible: true,
            ..RecordingSurface::default()
        };

        let handle = pipeline.send("question", &mut surface);
        pipeline.handle_stream_message(fragment("the answer"), handle.stream_id, &mut surface);

        let mut complete = StreamEvent::complete();
        complete.data.content = Some("a different answer the server resent".to_string());
        pipeline.handle_stream_message(
            StreamMessage::Event(complete),
            handle.stream_id,
            &mut surface,
        );

        let (_, terminal) = drain_until_terminal(&mut rx).await;
        assert_eq!(terminal, SessionEvent::Completed("the answer".to_string()));
    }

    #[tokio::test]
    async fn action_events_feed_the_status_surface_not_the_message() {
        let (mut pipeline, mut rx) = ChatPipeline::new(config(false));
        let mut surface = RecordingSurface::default();

        let handle = pipeline.send("question", &mut surface);
        pipeline.handle_stream_message(
            StreamMessage::Event(StreamEvent::action("기록을 찾는 중")),
            handle.stream_id,
            &mut surface,
        );

        match rx.recv().await {
            Some((SessionEvent::Action(text), _)) => assert_eq!(text, "기록을 찾는 중"),
            other => panic!("expected action event, got {:?}", other),
        }
        let message = pipeline.conversation().messages().last().expect("assistant row");
        assert_eq!(message.content, "");
    }

    #[tokio::test]
    async fn new_send_cancels_the_previous_session_first() {
        let (mut pipeline, _rx) = ChatPipeline::new(config(false));
        let mut surface = RecordingSurface::default();

        let handle_a = pipeline.send("first", &mut surface);
        pipeline.handle_stream_message(fragment("partial"), handle_a.stream_id, &mut surface);
        assert_eq!(pipeline.state(), SessionState::Streaming);

        let handle_b = pipeline.send("second", &mut surface);
        assert!(handle_a.cancel_token().is_cancelled());
        assert!(!handle_b.cancel_token().is_cancelled());
        assert_eq!(pipeline.state(), SessionState::Streaming);

        let messages = pipeline.conversation().messages();
        // first user + first assistant + second user + second assistant
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].content, "partial");
        assert!(!messages[1].is_streaming);
    }

    #[tokio::test]
    async fn late_fragments_for_a_superseded_stream_are_dropped() {
        let (mut pipeline, _rx) = ChatPipeline::new(config(false));
        let mut surface = RecordingSurface::default();

        let handle_a = pipeline.send("first", &mut surface);
        pipeline.handle_stream_message(fragment("partial"), handle_a.stream_id, &mut surface);

        let _handle_b = pipeline.send("second", &mut surface);

        // A fragment that raced the cancellation arrives after B started.
        pipeline.handle_stream_message(fragment(" stale"), handle_a.stream_id, &mut surface);

        assert_eq!(pipeline.conversation().messages()[1].content, "partial");
    }

    #[tokio::test]
    async fn cancellation_is_idempotent_and_keeps_partial_text() {
        let (mut pipeline, mut rx) = ChatPipeline::new(config(false));
        let mut surface = RecordingSurface::default();

        let handle = pipeline.send("question", &mut surface);
        pipeline.handle_stream_message(fragment("partial answ"), handle.stream_id, &mut surface);
        assert!(matches!(rx.recv().await, Some((SessionEvent::Chunk(_), _))));

        pipeline.cancel_current();
        pipeline.cancel_current();

        assert_eq!(pipeline.state(), SessionState::Cancelled);
        assert!(handle.cancel_token().is_cancelled());
        // No terminal event on cancellation: the canceller already knows.
        assert!(rx.try_recv().is_err());

        let message = pipeline.conversation().messages().last().expect("assistant row");
        assert_eq!(message.content, "partial answ");
        assert!(!message.is_streaming);
    }

    #[tokio::test]
    async fn failure_flushes_typed_progress_before_reporting() {
        let (mut pipeline, mut rx) = ChatPipeline::new(PipelineConfig {
            // Effectively frozen pacing: only the first character leaves the
            // queue on its own.
            typewriter_delay_ms: 60_000,
            ..PipelineConfig::default()
        });
        let mut surface = RecordingSurface {
            visible: true,
            ..RecordingSurface::default()
        };

        let handle = pipeline.send("question", &mut surface);
        pipeline.handle_stream_message(fragment("abcdef"), handle.stream_id, &mut surface);

        // Wait for the drain task to emit its first character so the flush
        // demonstrably preserves order behind it.
        match rx.recv().await {
            Some((SessionEvent::Chunk(first), _)) => assert_eq!(first, "a"),
            other => panic!("expected first chunk, got {:?}", other),
        }

        pipeline.handle_stream_message(
            StreamMessage::Error(StreamError::Connection("reset".to_string())),
            handle.stream_id,
            &mut surface,
        );

        let (chunks, terminal) = drain_until_terminal(&mut rx).await;
        assert_eq!(chunks, "bcdef");
        assert!(matches!(terminal, SessionEvent::Failed(StreamError::Connection(_))));
        assert_eq!(pipeline.state(), SessionState::Failed);

        let message = pipeline.conversation().messages().last().expect("assistant row");
        assert_eq!(message.content, "abcdef");
        assert!(!message.is_streaming);
    }

    #[tokio::test]
    async fn end_before_complete_is_a_connection_failure() {
        let (mut pipeline, mut rx) = ChatPipeline::new(config(false));
        let mut surface = RecordingSurface::default();

        let handle = pipeline.send("question", &mut surface);
        pipeline.handle_stream_message(fragment("partial"), handle.stream_id, &mut surface);
        pipeline.handle_stream_message(StreamMessage::End, handle.stream_id, &mut surface);

        let (chunks, terminal) = drain_until_terminal(&mut rx).await;
        assert_eq!(chunks, "partial");
        assert!(matches!(terminal, SessionEvent::Failed(StreamError::Connection(_))));
    }

    #[tokio::test]
    async fn offscreen_fragments_update_the_model_and_throttle_refreshes() {
        let clock = ManualClock::new();
        let (mut pipeline, mut rx) =
            ChatPipeline::with_clock(config(true), Arc::clone(&clock) as Arc<dyn Clock>);
        let mut surface = RecordingSurface::default();

        let handle = pipeline.send("question", &mut surface);

        let mut expected = String::new();
        for i in 0..100 {
            if i > 0 {
                clock.advance(Duration::from_millis(10));
            }
            let piece = format!("f{i};");
            expected.push_str(&piece);
            pipeline.handle_stream_message(fragment(&piece), handle.stream_id, &mut surface);
        }

        // 990ms elapsed over a 250ms interval: at most 4 refreshes, while
        // the model still holds every fragment.
        assert_eq!(surface.refreshes.len(), 4);
        assert!(surface.relayouts.is_empty());
        let message = pipeline.conversation().messages().last().expect("assistant row");
        assert_eq!(message.content, expected);

        // Off-screen text never routes through the typewriter.
        assert!(rx.try_recv().is_err());

        // Completion issues the catch-up refresh for the row.
        pipeline.handle_stream_message(
            StreamMessage::Event(StreamEvent::complete()),
            handle.stream_id,
            &mut surface,
        );
        assert_eq!(surface.refreshes.len(), 5);
    }

    #[tokio::test]
    async fn forced_scrolls_fire_at_send_and_completion_only() {
        let (mut pipeline, _rx) = ChatPipeline::new(config(false));
        // Dragging far from the bottom: only forced scrolls may fire.
        let mut surface = RecordingSurface {
            visible: true,
            snapshot: ScrollSnapshot {
                is_user_dragging: true,
                is_decelerating: false,
                is_near_bottom: false,
            },
            ..RecordingSurface::default()
        };

        let handle = pipeline.send("question", &mut surface);
        assert_eq!(surface.scrolls, 1);

        pipeline.handle_stream_message(fragment("no scroll"), handle.stream_id, &mut surface);
        assert_eq!(surface.scrolls, 1);

        pipeline.handle_stream_message(
            StreamMessage::Event(StreamEvent::complete()),
            handle.stream_id,
            &mut surface,
        );
        assert_eq!(surface.scrolls, 2);
    }

    #[tokio::test]
    async fn near_bottom_fragments_keep_the_list_pinned() {
        let (mut pipeline, _rx) = ChatPipeline::new(config(false));
        let mut surface = RecordingSurface {
            visible: true,
            snapshot: ScrollSnapshot {
                is_user_dragging: false,
                is_decelerating: false,
                is_near_bottom: true,
            },
            ..RecordingSurface::default()
        };

        let handle = pipeline.send("question", &mut surface);
        pipeline.handle_stream_message(fragment("grew"), handle.stream_id, &mut surface);
        // Send (forced) plus the per-fragment near-bottom follow.
        assert_eq!(surface.scrolls, 2);
    }
}
