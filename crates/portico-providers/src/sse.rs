//! Incremental SSE decoding shared by every adapter that speaks
//! `data:`-framed streaming.

/// Splits an arbitrary byte sequence into complete `data:` payloads.
/// Partial lines stay buffered until the next push. Comment lines and
/// `event:` lines are skipped.
#[derive(Default)]
pub struct SseLineDecoder {
    buffer: String,
}

impl SseLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, get back the `data:` payloads completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));
        let mut out = Vec::new();
        while let Some(newline_pos) = self.buffer.find('\n') {
            let line = self.buffer[..newline_pos].trim().to_string();
            self.buffer.drain(..=newline_pos);

            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            if let Some(data) = line.strip_prefix("data:") {
                out.push(data.trim_start().to_string());
            }
            // "event: ..." lines carry no payload — skip.
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_complete_events() {
        let mut dec = SseLineDecoder::new();
        let out = dec.push(b"data: {\"a\":1}\n\ndata: {\"b\":2}\n\n");
        assert_eq!(out, vec![r#"{"a":1}"#, r#"{"b":2}"#]);
    }

    #[test]
    fn test_partial_line_buffers_across_pushes() {
        let mut dec = SseLineDecoder::new();
        assert!(dec.push(b"data: {\"a\"").is_empty());
        let out = dec.push(b":1}\n");
        assert_eq!(out, vec![r#"{"a":1}"#]);
    }

    #[test]
    fn test_skips_event_and_comment_lines() {
        let mut dec = SseLineDecoder::new();
        let out = dec.push(b"event: message_start\n: keepalive\ndata: x\n");
        assert_eq!(out, vec!["x"]);
    }
}
