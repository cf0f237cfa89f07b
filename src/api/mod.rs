//! Wire schema for the streaming answer transport.
//!
//! The transport delivers an ordered sequence of typed events. Each event is
//! one JSON object with a `kind` discriminator and an optional `data` bag;
//! the pipeline consumes the sequence and never looks at anything below it.

use serde::{Deserialize, Serialize};

/// Discriminator for one transport event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Server-side status update ("searching records", "thinking"). Updates
    /// the waiting indicator, never the answer text.
    Action,
    /// One incremental fragment of the answer text.
    Continue,
    /// Terminal event. Servers may resend the full answer in `data.content`;
    /// the client already holds it incrementally and ignores the payload.
    Complete,
}

/// Optional payload attached to an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speak: Option<String>,
}

/// One typed event decoded from the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub kind: EventKind,
    #[serde(default)]
    pub data: EventData,
}

impl StreamEvent {
    pub fn action(speak: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Action,
            data: EventData {
                content: None,
                speak: Some(speak.into()),
            },
        }
    }

    pub fn fragment(content: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Continue,
            data: EventData {
                content: Some(content.into()),
                speak: None,
            },
        }
    }

    pub fn complete() -> Self {
        Self {
            kind: EventKind::Complete,
            data: EventData::default(),
        }
    }
}

/// Request payload posted to open one answer stream.
#[derive(Debug, Clone, Serialize)]
pub struct AskRequest {
    pub message: String,
    pub stream: bool,
}
