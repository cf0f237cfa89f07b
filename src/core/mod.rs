pub mod clock;
pub mod config;
pub mod error;
pub mod event_stream;
pub mod message;
pub mod reconciler;
pub mod sanitizer;
pub mod scroll;
pub mod session;
pub mod typewriter;
