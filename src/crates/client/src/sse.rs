//! Incremental event-stream decoding.
//!
//! The service delivers blank-line-terminated frames over a chunked HTTP
//! body, and chunk boundaries fall anywhere: mid-frame, mid-line, mid
//! UTF-8 sequence. [`FrameDecoder`] is the sans-io core that absorbs byte
//! chunks and emits complete events regardless of fragmentation;
//! [`EventStream`] drives it from a byte channel, pull-based, assembling no
//! more than the next complete frame ahead of the consumer.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use log::{debug, warn};

use crewlink_protocol::DomainEvent;

use crate::error::GatewayError;
use crate::executor::ByteStream;

/// Chunk-oblivious decoder from bytes to domain events.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Bytes not yet decodable as UTF-8 (a split multi-byte sequence).
    pending: Vec<u8>,
    /// Decoded text that has not formed a complete line yet.
    buffer: String,
    event_name: Option<String>,
    data_lines: Vec<String>,
    /// Whether the in-progress frame has seen any field at all.
    saw_field: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb one chunk and return every event completed by it, in arrival
    /// order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<DomainEvent> {
        self.pending.extend_from_slice(chunk);
        self.decode_pending();
        self.drain_events()
    }

    /// Signal end of the byte channel. An unterminated trailing frame is not
    /// a frame and is discarded.
    pub fn finish(&mut self) {
        if self.saw_field || !self.buffer.trim().is_empty() {
            debug!("Discarding unterminated trailing frame at stream end");
        }
        self.pending.clear();
        self.buffer.clear();
        self.event_name = None;
        self.data_lines.clear();
        self.saw_field = false;
    }

    /// Move every decodable byte from `pending` into the text buffer,
    /// carrying a trailing partial UTF-8 sequence and skipping invalid bytes.
    fn decode_pending(&mut self) {
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    self.pending.clear();
                    return;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    if let Ok(text) = std::str::from_utf8(&self.pending[..valid_up_to]) {
                        self.buffer.push_str(text);
                    }
                    match e.error_len() {
                        // Incomplete sequence at the tail: keep it for the
                        // next chunk.
                        None => {
                            self.pending.drain(..valid_up_to);
                            return;
                        }
                        // Truly invalid bytes: drop them and keep decoding.
                        Some(invalid) => {
                            warn!("Skipping {} invalid UTF-8 byte(s) in event stream", invalid);
                            self.pending.drain(..valid_up_to + invalid);
                        }
                    }
                }
            }
        }
    }

    /// Consume complete lines from the buffer, closing frames on blank
    /// lines. A trailing line without its newline stays buffered.
    fn drain_events(&mut self) -> Vec<DomainEvent> {
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let mut line: String = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
            if line.is_empty() {
                if let Some(event) = self.complete_frame() {
                    events.push(event);
                }
            } else {
                self.consume_line(&line);
            }
        }
        events
    }

    fn consume_line(&mut self, line: &str) {
        if line.starts_with(':') {
            // Comment / keepalive line.
            return;
        }
        if let Some(value) = field_value(line, "event") {
            self.event_name = Some(value.to_string());
            self.saw_field = true;
        } else if let Some(value) = field_value(line, "data") {
            self.data_lines.push(value.to_string());
            self.saw_field = true;
        } else if field_value(line, "id").is_some() || field_value(line, "retry").is_some() {
            // Recognized fields we have no use for.
            self.saw_field = true;
        } else {
            // Malformed lines are skipped; the frame and the stream go on.
            warn!("Skipping malformed line in event frame: {:?}", line);
        }
    }

    fn complete_frame(&mut self) -> Option<DomainEvent> {
        if !self.saw_field {
            // Blank line outside a frame (heartbeat); nothing to emit.
            return None;
        }
        let event_name = self.event_name.take().unwrap_or_default();
        let data = std::mem::take(&mut self.data_lines).join("\n");
        self.saw_field = false;
        if event_name.is_empty() {
            warn!("Frame arrived without an event name; keeping it as unrecognized");
            return Some(DomainEvent::Unrecognized {
                event: String::new(),
                raw: data,
            });
        }
        Some(DomainEvent::from_frame(&event_name, &data))
    }
}

/// Field parser for `name: value` / `name:value` / bare `name` lines.
fn field_value<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(name)?;
    if rest.is_empty() {
        return Some("");
    }
    let value = rest.strip_prefix(':')?;
    Some(value.strip_prefix(' ').unwrap_or(value))
}

/// Lazy, single-pass event sequence over a byte channel.
///
/// Pull-based: the inner channel is only polled when the consumer asks for
/// the next event and no already-completed event is queued. Normal channel
/// closure ends the sequence; a channel error is yielded once and the stream
/// is terminal afterwards. Dropping the stream drops the channel.
pub struct EventStream {
    inner: ByteStream,
    decoder: FrameDecoder,
    ready: VecDeque<DomainEvent>,
    done: bool,
}

impl EventStream {
    pub fn new(inner: ByteStream) -> Self {
        Self {
            inner,
            decoder: FrameDecoder::new(),
            ready: VecDeque::new(),
            done: false,
        }
    }
}

impl Stream for EventStream {
    type Item = Result<DomainEvent, GatewayError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(event) = this.ready.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }
            if this.done {
                return Poll::Ready(None);
            }
            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.ready.extend(this.decoder.push(&chunk));
                }
                Poll::Ready(Some(Err(error))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(error)));
                }
                Poll::Ready(None) => {
                    this.decoder.finish();
                    this.done = true;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    const FIXTURE: &str = concat!(
        "event: conversation.response.started\n",
        "data: {\"conversation_id\":\"conv_1\"}\n",
        "\n",
        "event: message.output.delta\n",
        "data: {\"content\":\"Hé🌍 \"}\n",
        "\n",
        ": keepalive\n",
        "\n",
        "event: agent.handoff.started\n",
        "data: {\"agent_id\":\"agent_2\",\"agent_name\":\"Websearch\"}\n",
        "\n",
        "event: conversation.response.done\n",
        "data: {\"usage\":{\"prompt_tokens\":1,\"completion_tokens\":2,\"total_tokens\":3}}\n",
        "\n",
    );

    fn decode_in_chunks(bytes: &[u8], chunks: &[usize]) -> Vec<DomainEvent> {
        let mut decoder = FrameDecoder::new();
        let mut events = Vec::new();
        let mut offset = 0;
        let mut sizes = chunks.iter().copied().cycle();
        while offset < bytes.len() {
            let size = sizes.next().unwrap_or(1).max(1);
            let end = (offset + size).min(bytes.len());
            events.extend(decoder.push(&bytes[offset..end]));
            offset = end;
        }
        decoder.finish();
        events
    }

    #[test]
    fn decodes_fixture_in_one_chunk() {
        let events = decode_in_chunks(FIXTURE.as_bytes(), &[FIXTURE.len()]);
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], DomainEvent::ConversationStarted { .. }));
        assert!(
            matches!(events[1], DomainEvent::MessageDelta { ref content } if content == "Hé🌍 ")
        );
        assert!(matches!(events[2], DomainEvent::AgentHandoffStarted { .. }));
        assert!(matches!(events[3], DomainEvent::ConversationDone { .. }));
    }

    #[test]
    fn every_split_point_yields_identical_events() {
        let bytes = FIXTURE.as_bytes();
        let reference = decode_in_chunks(bytes, &[bytes.len()]);
        for split in 1..bytes.len() {
            let mut decoder = FrameDecoder::new();
            let mut events = decoder.push(&bytes[..split]);
            events.extend(decoder.push(&bytes[split..]));
            decoder.finish();
            assert_eq!(events, reference, "divergence at split {split}");
        }
    }

    #[test]
    fn fuzzed_chunk_sizes_yield_identical_events() {
        let bytes = FIXTURE.as_bytes();
        let reference = decode_in_chunks(bytes, &[bytes.len()]);
        // Fixed pseudo-random chunk patterns, byte-at-a-time included.
        for sizes in [
            vec![1],
            vec![2],
            vec![3, 1, 7],
            vec![5, 11, 2, 1, 13],
            vec![64, 1, 1, 9],
        ] {
            assert_eq!(
                decode_in_chunks(bytes, &sizes),
                reference,
                "divergence for chunk sizes {sizes:?}"
            );
        }
    }

    #[test]
    fn carries_multibyte_utf8_across_chunks() {
        let frame = "event: message.output.delta\ndata: {\"content\":\"🌍\"}\n\n";
        let bytes = frame.as_bytes();
        // Split inside the 4-byte emoji sequence.
        let emoji_start = frame.find('🌍').unwrap() + 1;
        let mut decoder = FrameDecoder::new();
        let mut events = decoder.push(&bytes[..emoji_start + 2]);
        events.extend(decoder.push(&bytes[emoji_start + 2..]));
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], DomainEvent::MessageDelta { ref content } if content == "🌍"));
    }

    #[test]
    fn skips_invalid_utf8_without_losing_the_frame() {
        let mut bytes = b"event: message.output.delta\njunk ".to_vec();
        bytes.extend_from_slice(&[0xFF, 0xFE]);
        bytes.extend_from_slice(b" junk\ndata: {\"content\":\"ok\"}\n\n");
        let mut decoder = FrameDecoder::new();
        let events = decoder.push(&bytes);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], DomainEvent::MessageDelta { ref content } if content == "ok"));
    }

    #[test]
    fn malformed_line_does_not_abort_the_frame() {
        let frame = concat!(
            "event: message.output.delta\n",
            "garbage without a field name\n",
            "data: {\"content\":\"kept\"}\n",
            "\n",
        );
        let mut decoder = FrameDecoder::new();
        let events = decoder.push(frame.as_bytes());
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], DomainEvent::MessageDelta { ref content } if content == "kept"));
    }

    #[test]
    fn unknown_event_name_is_unrecognized_not_fatal() {
        let frame = "event: conversation.telemetry\ndata: {\"n\":1}\n\nevent: message.output.delta\ndata: {\"content\":\"x\"}\n\n";
        let mut decoder = FrameDecoder::new();
        let events = decoder.push(frame.as_bytes());
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], DomainEvent::Unrecognized { .. }));
        assert!(matches!(events[1], DomainEvent::MessageDelta { .. }));
    }

    #[test]
    fn handles_crlf_framing() {
        let frame = "event: message.output.delta\r\ndata: {\"content\":\"crlf\"}\r\n\r\n";
        let mut decoder = FrameDecoder::new();
        let events = decoder.push(frame.as_bytes());
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], DomainEvent::MessageDelta { ref content } if content == "crlf"));
    }

    #[test]
    fn joins_multiple_data_lines() {
        let frame = "event: conversation.telemetry\ndata: line1\ndata: line2\n\n";
        let mut decoder = FrameDecoder::new();
        let events = decoder.push(frame.as_bytes());
        match &events[0] {
            DomainEvent::Unrecognized { raw, .. } => assert_eq!(raw, "line1\nline2"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn trailing_partial_frame_is_dropped() {
        let bytes = b"event: message.output.delta\ndata: {\"content\":\"incomplete\"}";
        let mut decoder = FrameDecoder::new();
        let mut events = decoder.push(bytes);
        decoder.finish();
        assert!(events.is_empty());
        // And the decoder is reusable afterwards.
        events.extend(decoder.push(b"event: conversation.response.done\ndata: {}\n\n"));
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn event_stream_ends_on_channel_close() {
        let chunks: Vec<crate::error::GatewayResult<bytes::Bytes>> = vec![
            Ok(bytes::Bytes::from_static(b"event: message.output.delta\ndata: {\"con")),
            Ok(bytes::Bytes::from_static(b"tent\":\"a\"}\n\n")),
        ];
        let inner: ByteStream = Box::pin(futures::stream::iter(chunks));
        let mut stream = EventStream::new(inner);

        let first = stream.next().await.expect("one event").expect("ok");
        assert!(matches!(first, DomainEvent::MessageDelta { ref content } if content == "a"));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn event_stream_surfaces_channel_error_after_decoded_events() {
        let chunks: Vec<crate::error::GatewayResult<bytes::Bytes>> = vec![
            Ok(bytes::Bytes::from_static(
                b"event: message.output.delta\ndata: {\"content\":\"a\"}\n\n",
            )),
            Err(GatewayError::Network {
                url: "http://svc".into(),
                attempts: 1,
                message: "reset".into(),
            }),
        ];
        let inner: ByteStream = Box::pin(futures::stream::iter(chunks));
        let mut stream = EventStream::new(inner);

        assert!(stream.next().await.expect("event").is_ok());
        let err = stream.next().await.expect("error item");
        assert!(err.is_err());
        assert!(stream.next().await.is_none());
    }
}
