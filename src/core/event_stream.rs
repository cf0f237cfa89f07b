use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use memchr::memchr;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::{AskRequest, StreamEvent};
use crate::core::error::StreamError;

/// One item on the decoded stream channel, tagged with its stream id so
/// consumers can drop items from superseded sessions.
#[derive(Debug, Clone)]
pub enum StreamMessage {
    Event(StreamEvent),
    Error(StreamError),
    End,
}

/// The transport seam: a cancellable, ordered sequence of typed events.
///
/// The crate ships [`SseEventSource`]; tests script their own. Disconnect
/// is the pump's `CancellationToken` — cancelling it drops the source,
/// which tears the underlying connection down, and cancelling twice is a
/// no-op.
#[async_trait]
pub trait EventSource: Send {
    /// Yields the next event, a terminal error, or `None` once the server
    /// has finished sending.
    async fn next_event(&mut self) -> Option<Result<StreamEvent, StreamError>>;
}

fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

enum Decoded {
    Event(StreamEvent),
    Done,
    Ignore,
    Invalid(String),
}

fn decode_sse_line(line: &str) -> Decoded {
    let Some(payload) = extract_data_payload(line) else {
        return Decoded::Ignore;
    };
    if payload == "[DONE]" {
        return Decoded::Done;
    }
    if payload.is_empty() {
        return Decoded::Ignore;
    }
    match serde_json::from_str::<StreamEvent>(payload) {
        Ok(event) => Decoded::Event(event),
        Err(e) => Decoded::Invalid(format!("unparseable event: {e}")),
    }
}

/// Connection parameters for the default SSE event source.
pub struct SseConnectParams {
    pub client: reqwest::Client,
    pub base_url: String,
    pub api_key: String,
    pub prompt: String,
}

/// Default [`EventSource`]: reads an SSE byte stream, frames it into lines,
/// and decodes `data:` payloads into typed events.
pub struct SseEventSource {
    stream: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    buffer: Vec<u8>,
    done: bool,
}

impl SseEventSource {
    pub async fn connect(params: SseConnectParams) -> Result<Self, StreamError> {
        let SseConnectParams {
            client,
            base_url,
            api_key,
            prompt,
        } = params;

        let url = format!("{}/chat/stream", base_url.trim_end_matches('/'));
        let request = AskRequest {
            message: prompt,
            stream: true,
        };
        let response = client
            .post(url)
            .bearer_auth(&api_key)
            .header("Accept", "text/event-stream")
            .json(&request)
            .send()
            .await
            .map_err(|e| StreamError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(StreamError::Connection(format!("HTTP {status}: {body}")));
        }

        Ok(Self::from_byte_stream(response.bytes_stream()))
    }

    fn from_byte_stream(
        stream: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
    ) -> Self {
        Self {
            stream: Box::pin(stream),
            buffer: Vec::new(),
            done: false,
        }
    }
}

#[async_trait]
impl EventSource for SseEventSource {
    async fn next_event(&mut self) -> Option<Result<StreamEvent, StreamError>> {
        if self.done {
            return None;
        }

        loop {
            while let Some(newline_pos) = memchr(b'\n', &self.buffer) {
                let outcome = match std::str::from_utf8(&self.buffer[..newline_pos]) {
                    Ok(line) => decode_sse_line(line.trim()),
                    Err(e) => {
                        warn!("invalid UTF-8 in stream: {e}");
                        Decoded::Ignore
                    }
                };
                self.buffer.drain(..=newline_pos);

                match outcome {
                    Decoded::Event(event) => return Some(Ok(event)),
                    Decoded::Done => {
                        self.done = true;
                        return None;
                    }
                    Decoded::Invalid(detail) => {
                        self.done = true;
                        return Some(Err(StreamError::Decode(detail)));
                    }
                    Decoded::Ignore => {}
                }
            }

            match self.stream.next().await {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(StreamError::Connection(e.to_string())));
                }
                None => {
                    self.done = true;
                    return None;
                }
            }
        }
    }
}

/// Pumps any [`EventSource`] into an unbounded channel of tagged
/// [`StreamMessage`]s consumed by the pipeline's event loop.
#[derive(Clone)]
pub struct EventStreamService {
    tx: mpsc::UnboundedSender<(StreamMessage, u64)>,
}

impl EventStreamService {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(StreamMessage, u64)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Spawns the single consumption task for one stream. The task forwards
    /// events in arrival order, always terminates the sequence with `End`,
    /// and drops the source (closing the connection) when the token fires.
    pub fn spawn_pump(
        &self,
        mut source: impl EventSource + 'static,
        cancel_token: CancellationToken,
        stream_id: u64,
    ) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        debug!(stream_id, "stream pump cancelled");
                        return;
                    }
                    item = source.next_event() => match item {
                        Some(Ok(event)) => {
                            let _ = tx.send((StreamMessage::Event(event), stream_id));
                        }
                        Some(Err(e)) => {
                            let _ = tx.send((StreamMessage::Error(e), stream_id));
                            let _ = tx.send((StreamMessage::End, stream_id));
                            return;
                        }
                        None => {
                            let _ = tx.send((StreamMessage::End, stream_id));
                            return;
                        }
                    }
                }
            }
        });
    }
}

/// Test double yielding a scripted sequence, with optional delays so races
/// between delivery and cancellation can be staged deterministically.
#[cfg(test)]
pub struct ScriptedSource {
    items: std::vec::IntoIter<ScriptedItem>,
}

#[cfg(test)]
pub enum ScriptedItem {
    Event(StreamEvent),
    Error(StreamError),
    Delay(std::time::Duration),
}

#[cfg(test)]
impl ScriptedSource {
    pub fn new(items: Vec<ScriptedItem>) -> Self {
        Self {
            items: items.into_iter(),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl EventSource for ScriptedSource {
    async fn next_event(&mut self) -> Option<Result<StreamEvent, StreamError>> {
        loop {
            match self.items.next() {
                Some(ScriptedItem::Delay(duration)) => tokio::time::sleep(duration).await,
                Some(ScriptedItem::Event(event)) => return Some(Ok(event)),
                Some(ScriptedItem::Error(e)) => return Some(Err(e)),
                None => return None,
            }
        }
    }
}
