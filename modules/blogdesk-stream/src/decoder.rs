use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use tracing::debug;

/// Incremental decoder for `data: <json>` event-stream lines.
///
/// Bytes are buffered rather than text, so a chunk boundary may fall anywhere,
/// including inside a multi-byte character. Only complete `\n`-terminated lines
/// are parsed; the tail waits for the next chunk.
pub struct FrameDecoder<E> {
    buffer: Vec<u8>,
    _event: PhantomData<fn() -> E>,
}

impl<E> Default for FrameDecoder<E> {
    fn default() -> Self {
        Self {
            buffer: Vec::new(),
            _event: PhantomData,
        }
    }
}

impl<E: DeserializeOwned> FrameDecoder<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every event completed by it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<E> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            if let Some(event) = parse_line(&self.buffer[start..end]) {
                events.push(event);
            }
            start = end + 1;
        }
        self.buffer.drain(..start);
        events
    }

    /// Bytes held back waiting for a line terminator.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn parse_line<E: DeserializeOwned>(line: &[u8]) -> Option<E> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let payload = line.strip_prefix(b"data:")?;
    let payload = payload.strip_prefix(b" ").unwrap_or(payload);

    match serde_json::from_slice(payload) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!(error = %e, len = payload.len(), "Dropping malformed event frame");
            None
        }
    }
}
