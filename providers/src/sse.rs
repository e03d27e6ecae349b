//! Shared SSE (`data:` frame) decoding used by the Gemini-OAuth and
//! Anthropic-style providers (§4.5: "event-driven... SSE `data:` frames
//! terminated by `[DONE]` or a final-event marker").
//!
//! Grounded on the teacher's `sse_types` typed-event pattern: this module
//! only does framing (splitting the byte stream into `data:` payloads); the
//! typed `serde(tag = "type")` decode of each payload stays in the
//! per-provider module, same as the teacher's `ClaudeParser`.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use crate::error::{ClientError, MAX_SSE_BUFFER_BYTES};

/// Decodes a byte stream into successive SSE `data:` payloads.
pub struct SseDecoder<S> {
    inner: S,
    buf: Vec<u8>,
}

impl<S> SseDecoder<S>
where
    S: Stream<Item = reqwest::Result<Bytes>> + Unpin,
{
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buf: Vec::new(),
        }
    }

    /// Read and return the next complete `data:` payload (joined across
    /// multi-line `data:` fields per the SSE spec), or `None` at end of
    /// stream. A literal `[DONE]` payload is swallowed and treated as
    /// end-of-stream.
    pub async fn next_payload(&mut self) -> Result<Option<String>, ClientError> {
        loop {
            if let Some(event) = self.take_event_from_buf() {
                match event {
                    Some(payload) if payload.trim() == "[DONE]" => return Ok(None),
                    Some(payload) => return Ok(Some(payload)),
                    None => continue,
                }
            }

            match self.inner.next().await {
                Some(Ok(bytes)) => {
                    self.buf.extend_from_slice(&bytes);
                    if self.buf.len() > MAX_SSE_BUFFER_BYTES {
                        return Err(ClientError::ProviderMalformed {
                            message: "SSE buffer exceeded maximum size without an event boundary"
                                .to_string(),
                        });
                    }
                }
                Some(Err(e)) => {
                    return Err(ClientError::Network {
                        attempts: 1,
                        message: e.to_string(),
                    });
                }
                None => {
                    if self.buf.iter().all(u8::is_ascii_whitespace) {
                        return Ok(None);
                    }
                    // Trailing partial event with no terminating blank line;
                    // treat whatever is buffered as the final event.
                    let remainder = std::mem::take(&mut self.buf);
                    return Ok(extract_data(&remainder));
                }
            }
        }
    }

    /// Pop one complete event (`\n\n`-terminated block) from the buffer, if
    /// present. Returns `Some(None)` for an event with no `data:` field
    /// (e.g. a bare comment), meaning "keep looping".
    fn take_event_from_buf(&mut self) -> Option<Option<String>> {
        let pos = find_event_boundary(&self.buf)?;
        let event_bytes: Vec<u8> = self.buf.drain(..pos).collect();
        // Drop the boundary itself (either "\n\n" or "\r\n\r\n").
        consume_boundary(&mut self.buf);
        Some(extract_data(&event_bytes))
    }
}

fn find_event_boundary(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

fn consume_boundary(buf: &mut Vec<u8>) {
    while buf.first() == Some(&b'\n') || buf.first() == Some(&b'\r') {
        buf.remove(0);
    }
}

fn extract_data(event_bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(event_bytes);
    let mut data_lines = Vec::new();
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn byte_stream(chunks: Vec<&'static str>) -> impl Stream<Item = reqwest::Result<Bytes>> {
        stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from_static(c.as_bytes()))))
    }

    #[tokio::test]
    async fn decodes_single_data_frame() {
        let mut decoder = SseDecoder::new(byte_stream(vec!["data: {\"a\":1}\n\n"]));
        let payload = decoder.next_payload().await.unwrap().unwrap();
        assert_eq!(payload, "{\"a\":1}");
    }

    #[tokio::test]
    async fn joins_multiline_data_fields() {
        let mut decoder = SseDecoder::new(byte_stream(vec!["data: line1\ndata: line2\n\n"]));
        let payload = decoder.next_payload().await.unwrap().unwrap();
        assert_eq!(payload, "line1\nline2");
    }

    #[tokio::test]
    async fn handles_frame_split_across_chunks() {
        let mut decoder = SseDecoder::new(byte_stream(vec!["data: {\"a", "\":1}\n\n"]));
        let payload = decoder.next_payload().await.unwrap().unwrap();
        assert_eq!(payload, "{\"a\":1}");
    }

    #[tokio::test]
    async fn done_marker_ends_stream() {
        let mut decoder = SseDecoder::new(byte_stream(vec!["data: [DONE]\n\n"]));
        assert!(decoder.next_payload().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn end_of_stream_with_no_data_yields_none() {
        let mut decoder = SseDecoder::new(byte_stream(vec![]));
        assert!(decoder.next_payload().await.unwrap().is_none());
    }
}
