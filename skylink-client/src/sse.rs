//! Server-sent event framing: buffer body chunks, emit the `data` payload of each complete event.

const MAX_EVENT_LEN: usize = 1024 * 1024;

/// Incremental `text/event-stream` decoder. Only `data` fields are kept; comments and
/// `event`/`id`/`retry` fields are skipped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    data: Vec<String>,
    /// Bytes held in `data` for the pending event.
    data_len: usize,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one body chunk. Returns the payloads of all events completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<String>, SseError> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = line.strip_suffix(b"\n").unwrap_or(&line);
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            let line = std::str::from_utf8(line).map_err(|_| SseError::InvalidUtf8)?;
            if let Some(event) = self.on_line(line)? {
                events.push(event);
            }
        }
        if self.buf.len() + self.data_len > MAX_EVENT_LEN {
            return Err(SseError::TooLarge);
        }
        Ok(events)
    }

    fn on_line(&mut self, line: &str) -> Result<Option<String>, SseError> {
        if line.is_empty() {
            if self.data.is_empty() {
                return Ok(None);
            }
            self.data_len = 0;
            return Ok(Some(std::mem::take(&mut self.data).join("\n")));
        }
        if line.starts_with(':') {
            return Ok(None);
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        if field == "data" {
            let value = value.strip_prefix(' ').unwrap_or(value);
            // joined length: one newline between lines
            self.data_len += value.len() + usize::from(!self.data.is_empty());
            if self.data_len > MAX_EVENT_LEN {
                return Err(SseError::TooLarge);
            }
            self.data.push(value.to_string());
        }
        Ok(None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SseError {
    #[error("event stream is not valid UTF-8")]
    InvalidUtf8,
    #[error("event exceeds size limit")]
    TooLarge,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_event() {
        let mut d = SseDecoder::new();
        let events = d.feed(b"data: {\"round\":1}\n\n").unwrap();
        assert_eq!(events, vec!["{\"round\":1}".to_string()]);
    }

    #[test]
    fn event_split_across_chunks() {
        let mut d = SseDecoder::new();
        assert!(d.feed(b"data: {\"ro").unwrap().is_empty());
        assert!(d.feed(b"und\":2}\n").unwrap().is_empty());
        assert_eq!(d.feed(b"\n").unwrap(), vec!["{\"round\":2}".to_string()]);
    }

    #[test]
    fn multiple_events_in_one_chunk_with_crlf() {
        let mut d = SseDecoder::new();
        let events = d.feed(b"data: a\r\n\r\ndata: b\r\n\r\n").unwrap();
        assert_eq!(events, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn comments_and_other_fields_skipped() {
        let mut d = SseDecoder::new();
        let events = d
            .feed(b": keepalive\n\nevent: progress\nid: 7\ndata:x\ndata: y\n\n")
            .unwrap();
        assert_eq!(events, vec!["x\ny".to_string()]);
    }

    #[test]
    fn oversized_event_rejected() {
        let mut d = SseDecoder::new();
        let chunk = vec![b'a'; MAX_EVENT_LEN + 1];
        assert_eq!(d.feed(&chunk), Err(SseError::TooLarge));
    }

    #[test]
    fn unterminated_event_of_many_lines_rejected() {
        let mut d = SseDecoder::new();
        let line = format!("data: {}\n", "x".repeat(1000));
        let mut result = Ok(Vec::new());
        for _ in 0..5000 {
            result = d.feed(line.as_bytes());
            if result.is_err() {
                break;
            }
        }
        assert_eq!(result, Err(SseError::TooLarge));
    }

    #[test]
    fn cap_resets_between_events() {
        let mut d = SseDecoder::new();
        let event = format!("data: {}\ndata: {}\n\n", "a".repeat(400_000), "b".repeat(400_000));
        for _ in 0..4 {
            let events = d.feed(event.as_bytes()).unwrap();
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].len(), 800_001);
        }
    }

    #[test]
    fn invalid_utf8_rejected() {
        let mut d = SseDecoder::new();
        assert_eq!(d.feed(b"data: \xff\n"), Err(SseError::InvalidUtf8));
    }
}
