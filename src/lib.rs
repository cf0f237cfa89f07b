//! Typestream is the incremental streaming-response rendering pipeline behind
//! a chat screen: a server pushes an answer as a sequence of small text
//! fragments over a long-lived connection, and the client renders the growing
//! text progressively without losing or duplicating a single character.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`api`] defines the typed event schema the transport produces
//!   (`action` / `continue` / `complete`) and the request payload used to
//!   open a stream.
//! - [`core`] owns the pipeline itself: the footnote sanitizer, the
//!   typewriter pacing queue, the render reconciler with its throttling
//!   clocks, the auto-scroll policy, and the stream session state machine
//!   that orchestrates one request/response cycle.
//! - [`ui`] declares the minimal contracts an embedding list UI implements
//!   (row visibility lookup, refresh/relayout, scroll commands) without
//!   pulling any toolkit into the pipeline.
//! - [`utils`] carries ambient plumbing such as tracing initialization.
//!
//! Embedders create a [`core::session::ChatPipeline`], hand its stream
//! handle to [`core::event_stream::EventStreamService`] (or any other
//! [`core::event_stream::EventSource`]), and consume the ordered
//! [`core::session::SessionEvent`] channel from their own event loop.

pub mod api;
pub mod core;
pub mod ui;
pub mod utils;
