use serde::{Deserialize, Serialize};
use tracing::warn;

/// Author of one transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn is_user(self) -> bool {
        self == Role::User
    }

    pub fn is_assistant(self) -> bool {
        self == Role::Assistant
    }
}

impl AsRef<str> for Role {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl TryFrom<&str> for Role {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            _ => Err(format!("invalid message role: {value}")),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl From<Role> for String {
    fn from(value: Role) -> Self {
        value.as_str().to_string()
    }
}

/// One transcript entry.
///
/// `content` is mutated in place only while `is_streaming` is true, and only
/// by the stream session bound to this message. Once streaming ends the
/// message is immutable and may be read freely by any renderer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: u64,
    pub role: Role,
    pub content: String,
    pub is_streaming: bool,
}

/// Ordered transcript plus id allocation.
///
/// Messages are append-only; a message's index therefore doubles as its row
/// index in the embedding list.
#[derive(Debug, Default)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
    next_id: u64,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn get(&self, id: u64) -> Option<&ChatMessage> {
        self.messages.iter().find(|message| message.id == id)
    }

    pub fn index_of(&self, id: u64) -> Option<usize> {
        self.messages.iter().position(|message| message.id == id)
    }

    pub fn push_user(&mut self, content: impl Into<String>) -> u64 {
        self.push(Role::User, content.into(), false)
    }

    /// Inserts the empty assistant message a new stream will fill in.
    pub fn push_assistant_placeholder(&mut self) -> u64 {
        self.push(Role::Assistant, String::new(), true)
    }

    /// Appends one sanitized fragment to a streaming message.
    ///
    /// Writes to a finalized or unknown message are dropped: a fragment that
    /// raced past its session's cancellation must not resurrect the message.
    pub fn append_content(&mut self, id: u64, piece: &str) {
        match self.messages.iter_mut().find(|message| message.id == id) {
            Some(message) if message.is_streaming => message.content.push_str(piece),
            Some(_) => warn!(id, "dropped fragment for finalized message"),
            None => warn!(id, "dropped fragment for unknown message"),
        }
    }

    /// Ends streaming for a message, keeping whatever content it holds.
    pub fn finalize(&mut self, id: u64) {
        if let Some(message) = self.messages.iter_mut().find(|message| message.id == id) {
            message.is_streaming = false;
        }
    }

    fn push(&mut self, role: Role, content: String, is_streaming: bool) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.messages.push(ChatMessage {
            id,
            role,
            content,
            is_streaming,
        });
        id
    }
}
