//! Server-sent events decoding for the notification push stream.
//!
//! Bytes arrive in arbitrary chunks; the decoder buffers them and yields one
//! [`SseEvent`] per blank-line-terminated block.

use crate::net::PushEvent;
use crate::types::NotificationItem;
use bytes::{Buf, BytesMut};
use log::trace;

pub const EVENT_CONNECT: &str = "connect";
pub const EVENT_NOTIFICATION: &str = "notification";
const DEFAULT_EVENT: &str = "message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

#[derive(Default)]
pub struct SseDecoder {
    buffer: BytesMut,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds raw data into the decoder.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Returns the next complete event, if one is buffered.
    pub fn decode_event(&mut self) -> Option<SseEvent> {
        while let Some(line_end) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw = self.buffer.split_to(line_end);
            self.buffer.advance(1);
            let line = String::from_utf8_lossy(&raw);
            let line = line.strip_suffix('\r').unwrap_or(&line);

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    return Some(event);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                "id" => self.id = Some(value.to_string()),
                other => trace!(target: "Sse", "Ignoring SSE field {other:?}"),
            }
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event.unwrap_or_else(|| DEFAULT_EVENT.to_string()),
            data,
            id: self.id.clone(),
        })
    }
}

/// Maps a decoded SSE block onto a push event. Unknown event names yield `None`.
pub fn to_push_event(event: &SseEvent) -> Result<Option<PushEvent>, serde_json::Error> {
    match event.event.as_str() {
        EVENT_CONNECT => Ok(Some(PushEvent::Connected)),
        EVENT_NOTIFICATION | DEFAULT_EVENT => {
            let item: NotificationItem = serde_json::from_str(&event.data)?;
            Ok(Some(PushEvent::Notification(Box::new(item))))
        }
        _ => Ok(None),
    }
}
