//! Incremental decoder for the platform's `text/event-stream` responses.
//!
//! Chunks arrive with no alignment guarantee: a line, an event, or even a
//! multi-byte character may be split across reads. The decoder buffers raw
//! bytes, emits one event per complete `data: ` line in arrival order, and
//! holds everything after the last newline until the next chunk.

use crate::protocol::{EventKind, StreamEvent};

pub struct StreamDecoder {
    buffer: Vec<u8>,
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Feed one chunk of the response body and collect every event completed
    /// by it. A line that fails JSON parsing is dropped; it never aborts the
    /// stream.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<EventKind> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(idx) = self.buffer.iter().position(|&b| b == b'\n') {
            // Splitting on the newline byte first means a chunk boundary
            // inside a multi-byte character can never corrupt a line: every
            // complete line decodes as a unit.
            let raw: Vec<u8> = self.buffer.drain(..=idx).collect();
            let text = String::from_utf8_lossy(&raw);
            let line = text.trim();

            let Some(payload) = line.strip_prefix("data: ") else {
                continue;
            };
            match serde_json::from_str::<StreamEvent>(payload) {
                Ok(event) => events.push(event.classify()),
                Err(e) => eprintln!("[SSE] Dropping malformed event line: {}", e),
            }
        }
        events
    }

    /// Bytes held back waiting for a line terminator.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// The underlying read reported completion. Anything still buffered never
    /// received its terminator and is discarded, not speculatively parsed.
    pub fn finish(mut self) {
        if !self.buffer.is_empty() {
            eprintln!(
                "[SSE] Discarding {} unterminated byte(s) at end of stream",
                self.buffer.len()
            );
            self.buffer.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = concat!(
        "data: {\"chat_id\":\"c1\"}\n",
        "\n",
        "data: {\"content\":\"héllo \"}\n",
        "\n",
        "data: {\"content\":\"wörld\"}\n",
        "\n",
        "data: {\"total_duration\":1.5}\n",
        "\n",
    );

    fn decode_in_chunks(input: &[u8], chunk_size: usize) -> Vec<EventKind> {
        let mut decoder = StreamDecoder::new();
        let mut events = Vec::new();
        for chunk in input.chunks(chunk_size) {
            events.extend(decoder.push(chunk));
        }
        decoder.finish();
        events
    }

    #[test]
    fn test_single_chunk_decoding() {
        let events = decode_in_chunks(STREAM.as_bytes(), STREAM.len());
        assert_eq!(events.len(), 4);
        assert_eq!(events[0], EventKind::ChatId("c1".to_string()));
        assert_eq!(
            events[1],
            EventKind::Delta {
                content: Some("héllo ".to_string()),
                thought: false,
            }
        );
        assert_eq!(events[3], EventKind::TotalDuration(1.5));
    }

    #[test]
    fn test_chunk_boundaries_do_not_change_decoding() {
        // Includes one-byte chunks, which split the multi-byte characters.
        let whole = decode_in_chunks(STREAM.as_bytes(), STREAM.len());
        for size in 1..STREAM.len() {
            let split = decode_in_chunks(STREAM.as_bytes(), size);
            assert_eq!(split, whole, "chunk size {}", size);
        }
    }

    #[test]
    fn test_malformed_line_is_dropped_not_fatal() {
        let input = b"data: {not json}\ndata: {\"content\":\"ok\"}\n";
        let events = decode_in_chunks(input, input.len());
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0],
            EventKind::Delta {
                content: Some("ok".to_string()),
                thought: false,
            }
        );
    }

    #[test]
    fn test_non_data_lines_are_skipped() {
        let input = b": keepalive\nevent: tick\ndata: {\"content\":\"x\"}\n";
        let events = decode_in_chunks(input, input.len());
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_trailing_fragment_without_newline_is_discarded() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.push(b"data: {\"content\":\"a\"}\ndata: {\"content\":\"b\"}");
        assert_eq!(events.len(), 1);
        assert!(decoder.pending() > 0);
        decoder.finish();
    }

    #[test]
    fn test_events_surface_in_arrival_order() {
        let input = b"data: {\"content\":\"1\"}\ndata: {\"content\":\"2\"}\ndata: {\"content\":\"3\"}\n";
        let events = decode_in_chunks(input, 7);
        let fragments: Vec<String> = events
            .into_iter()
            .map(|e| match e {
                EventKind::Delta { content, .. } => content.unwrap(),
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(fragments, vec!["1", "2", "3"]);
    }
}
