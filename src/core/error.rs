use std::fmt;

/// Failure surfaced by the streaming pipeline.
///
/// Both variants terminate the owning session as failed. Everything else the
/// pipeline encounters (a missing render target, an unterminated footnote at
/// end of stream) is a documented normal branch, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The transport delivered something that does not decode as an event.
    Decode(String),
    /// The connection dropped before the stream completed.
    Connection(String),
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Decode(detail) => write!(f, "decode error: {detail}"),
            StreamError::Connection(detail) => write!(f, "connection error: {detail}"),
        }
    }
}

impl std::error::Error for StreamError {}
