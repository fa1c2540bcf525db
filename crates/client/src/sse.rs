//! Server-sent events transport for the result stream.
//!
//! [`connect`] issues the `GET .../stream` request and returns an
//! [`EventStream`] of typed [`StreamEvent`]s. Framing is handled by
//! [`SseDecoder`], which tolerates frames split across network chunks.

use std::collections::VecDeque;

use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};

use crate::messages::{parse_event, StreamEvent};

/// Typed event sequence for one job.
pub type EventStream = BoxStream<'static, Result<StreamEvent, StreamError>>;

/// Errors on the stream transport (distinct from data-carrying `error` events).
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The connection failed or dropped.
    #[error("Stream transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The stream endpoint answered with a non-2xx status.
    #[error("Stream rejected ({status}): {message}")]
    Status { status: u16, message: String },
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

/// Incremental `text/event-stream` decoder.
///
/// Comment lines (`: heartbeat`) are dropped, `id` and `retry` fields are
/// ignored, and multiple `data:` lines are joined with `\n`.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every frame completed by them.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(|c| c == '\n' || c == '\r');
            if let Some(frame) = self.process_line(line) {
                frames.push(frame);
            }
        }
        frames
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

// ---------------------------------------------------------------------------
// Stream adapters
// ---------------------------------------------------------------------------

/// Open the result stream at `url`.
pub async fn connect(client: &reqwest::Client, url: &str) -> Result<EventStream, StreamError> {
    let response = client
        .get(url)
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(StreamError::Status {
            status: status.as_u16(),
            message: crate::api::error_message(status, &body),
        });
    }

    tracing::debug!(url, "Result stream connected");
    Ok(decode_events(response.bytes_stream()))
}

/// Turn a byte stream into typed events.
///
/// Frames that fail to parse (unknown event names, malformed JSON) are
/// logged and skipped. A transport error is yielded once; the stream ends
/// when the underlying byte stream does.
pub fn decode_events<S, E>(bytes: S) -> EventStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<StreamError> + Send + 'static,
{
    let state = (bytes.boxed(), SseDecoder::new(), VecDeque::new());
    stream::unfold(state, |(mut bytes, mut decoder, mut pending)| async move {
        loop {
            if let Some(item) = pending.pop_front() {
                return Some((item, (bytes, decoder, pending)));
            }
            match bytes.next().await {
                Some(Ok(chunk)) => {
                    pending.extend(decoder.push(&chunk).into_iter().filter_map(frame_to_event).map(Ok));
                }
                Some(Err(e)) => return Some((Err(e.into()), (bytes, decoder, pending))),
                None => return None,
            }
        }
    })
    .boxed()
}

fn frame_to_event(frame: SseFrame) -> Option<StreamEvent> {
    match parse_event(&frame.event, &frame.data) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!(
                event = %frame.event,
                error = %e,
                raw_data = %frame.data,
                "Failed to parse result stream event",
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn decodes_single_frame() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b"event: meta\ndata: {\"total_files\":3}\n\n");
        assert_eq!(
            frames,
            vec![SseFrame {
                event: "meta".into(),
                data: "{\"total_files\":3}".into()
            }]
        );
    }

    #[test]
    fn frames_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: do").is_empty());
        assert!(decoder.push(b"ne\ndata: {}").is_empty());
        let frames = decoder.push(b"\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "done");
        assert_eq!(frames[0].data, "{}");
    }

    #[test]
    fn heartbeat_comments_are_ignored() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b": heartbeat\n\n: heartbeat\n\nevent: done\ndata: {}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "done");
    }

    #[test]
    fn crlf_and_multiline_data() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b"data: line one\r\ndata:line two\r\n\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "message");
        assert_eq!(frames[0].data, "line one\nline two");
    }

    #[test]
    fn multibyte_text_split_mid_character() {
        let text = "event: error\ndata: {\"client_index\":1,\"error\":\"caf\u{e9}\"}\n\n".as_bytes();
        let split = text.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(&text[..split]).is_empty());
        let frames = decoder.push(&text[split..]);
        assert!(frames[0].data.contains("caf\u{e9}"));
    }

    #[tokio::test]
    async fn decode_events_skips_unparseable_frames() {
        let chunks: Vec<Result<Bytes, StreamError>> = vec![
            Ok(Bytes::from_static(b"event: meta\ndata: {\"total_files\":2}\n\n")),
            Ok(Bytes::from_static(b"event: bogus\ndata: {}\n\nevent: result\ndata: nope\n\n")),
            Ok(Bytes::from_static(b"event: done\ndata: {}\n\n")),
        ];

        let events: Vec<_> = decode_events(stream::iter(chunks)).collect().await;

        assert_eq!(events.len(), 2);
        assert_matches!(&events[0], Ok(StreamEvent::Meta(m)) if m.total_files == 2);
        assert_matches!(&events[1], Ok(StreamEvent::Done(_)));
    }

    #[tokio::test]
    async fn decode_events_surfaces_transport_error() {
        let chunks: Vec<Result<Bytes, StreamError>> = vec![
            Ok(Bytes::from_static(b"event: meta\ndata: {\"total_files\":1}\n\n")),
            Err(StreamError::Status {
                status: 404,
                message: "Job not found".into(),
            }),
        ];

        let events: Vec<_> = decode_events(stream::iter(chunks)).collect().await;

        assert_eq!(events.len(), 2);
        assert_matches!(&events[1], Err(StreamError::Status { status: 404, .. }));
    }
}
