//! Incremental `text/event-stream` decoding.
//!
//! Only `data:` lines matter to the engine protocol. Multi-line data is joined
//! with `\n` and emitted at the blank line that ends the event.

use bytes::BytesMut;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SseItem {
    Data(String),
    /// The `[DONE]` marker; nothing follows it.
    Done,
}

#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: BytesMut,
    data: Vec<String>,
}

impl SseDecoder {
    /// Feeds one network chunk and returns every event completed by it.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<SseItem> {
        self.buffer.extend_from_slice(chunk);
        let mut items = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line = self.buffer.split_to(pos + 1);
            line.truncate(line.len() - 1);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            let Ok(line) = std::str::from_utf8(&line) else {
                tracing::debug!(target: "toolrun.http", "skipping non-utf8 event line");
                continue;
            };

            if line.is_empty() {
                if let Some(item) = self.flush_event() {
                    items.push(item);
                }
                continue;
            }
            // Comments and fields other than `data` carry nothing for us.
            if let Some(data) = line.strip_prefix("data:") {
                self.data
                    .push(data.strip_prefix(' ').unwrap_or(data).to_string());
            }
        }
        items
    }

    /// Emits a pending event left open when the body ended.
    pub(crate) fn finish(&mut self) -> Option<SseItem> {
        if !self.buffer.is_empty() {
            let rest = self.buffer.split();
            if let Ok(line) = std::str::from_utf8(&rest) {
                if let Some(data) = line.trim_end().strip_prefix("data:") {
                    self.data
                        .push(data.strip_prefix(' ').unwrap_or(data).to_string());
                }
            }
        }
        self.flush_event()
    }

    fn flush_event(&mut self) -> Option<SseItem> {
        if self.data.is_empty() {
            return None;
        }
        let data = self.data.join("\n");
        self.data.clear();
        match data.trim() {
            "" => None,
            "[DONE]" => Some(SseItem::Done),
            _ => Some(SseItem::Data(data)),
        }
    }
}
