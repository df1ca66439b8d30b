//! Client side of the streaming chat contract.
//!
//! Events are `data: ` lines. JSON payloads contribute
//! `choices[].delta.content`; `data: [DONE]` ends the stream and is never
//! content. Lines that are not valid JSON are skipped.

use bytes::{Buf, BytesMut};
use futures::StreamExt;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;

const DATA_PREFIX: &str = "data: ";
const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Delta(String),
    Done,
}

/// Interpret one line of an event stream.
pub fn parse_sse_line(line: &str) -> Option<StreamEvent> {
    let data = line.trim().strip_prefix(DATA_PREFIX)?;
    if data == DONE_MARKER {
        return Some(StreamEvent::Done);
    }
    let chunk: Value = serde_json::from_str(data).ok()?;
    let content: String = chunk
        .get("choices")?
        .as_array()?
        .iter()
        .filter_map(|choice| choice.pointer("/delta/content")?.as_str())
        .collect();
    (!content.is_empty()).then_some(StreamEvent::Delta(content))
}

/// Incremental decoder over arbitrarily split byte chunks.
#[derive(Debug, Default)]
pub struct ChatStreamDecoder {
    buffer: BytesMut,
    done: bool,
}

impl ChatStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed a chunk, returning the events completed by it. Nothing is
    /// returned after `[DONE]`.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        if self.done {
            return Vec::new();
        }
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line = self.buffer.split_to(pos);
            self.buffer.advance(1);
            match parse_sse_line(&String::from_utf8_lossy(&line)) {
                Some(StreamEvent::Done) => {
                    self.done = true;
                    self.buffer.clear();
                    events.push(StreamEvent::Done);
                    break;
                }
                Some(event) => events.push(event),
                None => {}
            }
        }
        events
    }

    /// Flush a final line that had no trailing newline.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        self.push(b"\n")
    }
}

/// Response metadata reported by [`stream_chat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatStreamInfo {
    pub status: u16,
    pub request_id: Option<String>,
    pub content_type: Option<String>,
}

/// Everything a streamed chat produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTranscript {
    pub info: ChatStreamInfo,
    pub content: String,
    pub done: bool,
}

/// Request body for a streamed chat completion.
pub fn chat_payload(prompt: &str) -> Value {
    json!({
        "model": "relay-gguf",
        "messages": [{ "role": "user", "content": prompt }],
        "stream": true,
    })
}

/// POST a streaming chat completion to `{base_url}/v1/chat/completions`.
///
/// `on_start` sees the response metadata before any content; `on_event`
/// sees every decoded event as it arrives.
pub async fn stream_chat<S, E>(
    client: &Client,
    base_url: &str,
    prompt: &str,
    request_id: Option<&str>,
    timeout: Duration,
    on_start: S,
    mut on_event: E,
) -> Result<ChatTranscript, reqwest::Error>
where
    S: FnOnce(&ChatStreamInfo),
    E: FnMut(&StreamEvent),
{
    let url = format!("{}/v1/chat/completions", base_url.trim_end_matches('/'));
    let mut request = client.post(&url).timeout(timeout).json(&chat_payload(prompt));
    if let Some(id) = request_id {
        request = request.header(crate::proxy::REQUEST_ID_HEADER, id);
    }
    let response = request.send().await?;

    let header = |name: &str| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let info = ChatStreamInfo {
        status: response.status().as_u16(),
        request_id: header(crate::proxy::REQUEST_ID_HEADER),
        content_type: header("content-type"),
    };
    on_start(&info);

    let mut decoder = ChatStreamDecoder::new();
    let mut content = String::new();
    let mut handle = |events: Vec<StreamEvent>, content: &mut String| {
        for event in events {
            if let StreamEvent::Delta(text) = &event {
                content.push_str(text);
            }
            on_event(&event);
        }
    };

    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        handle(decoder.push(&chunk?), &mut content);
        if decoder.is_done() {
            break;
        }
    }
    handle(decoder.finish(), &mut content);

    Ok(ChatTranscript {
        info,
        content,
        done: decoder.is_done(),
    })
}
