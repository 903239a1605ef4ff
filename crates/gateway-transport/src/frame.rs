//! Minimal SSE line framing, shared by the SSE and streamable-HTTP
//! strategies: both line-read `event:`/`data:` pairs out of an upstream byte
//! stream that may split frames at arbitrary chunk boundaries.

/// One parsed `event: X\ndata: Y\n\n` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

impl SseFrame {
    pub fn message(data: impl Into<String>) -> Self {
        Self {
            event: "message".to_string(),
            data: data.into(),
        }
    }

    /// Renders back to wire format: `event: X\ndata: Y\n\n`.
    pub fn encode(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.event, self.data)
    }
}

/// Accumulates raw byte chunks and yields complete frames as soon as a blank
/// line terminates them, tolerating frames split across chunk boundaries.
#[derive(Debug, Default)]
pub struct SseFrameParser {
    buffer: String,
}

impl SseFrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &str) -> Vec<SseFrame> {
        self.buffer.push_str(chunk);
        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let raw: String = self.buffer.drain(..pos + 2).collect();
            if let Some(frame) = parse_one(&raw) {
                frames.push(frame);
            }
        }
        frames
    }
}

fn parse_one(raw: &str) -> Option<SseFrame> {
    let mut event = "message".to_string();
    let mut data_lines = Vec::new();
    for line in raw.lines() {
        if let Some(rest) = line.strip_prefix("event:") {
            event = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.trim_start().to_string());
        }
    }
    if data_lines.is_empty() {
        return None;
    }
    Some(SseFrame {
        event,
        data: data_lines.join("\n"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_complete_frame_in_one_push() {
        let mut parser = SseFrameParser::new();
        let frames = parser.push("event: endpoint\ndata: /messages?session_id=abc\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "endpoint");
        assert_eq!(frames[0].data, "/messages?session_id=abc");
    }

    #[test]
    fn reassembles_a_frame_split_across_pushes() {
        let mut parser = SseFrameParser::new();
        assert!(parser.push("event: mess").is_empty());
        assert!(parser.push("age\ndata: {\"a\":1}").is_empty());
        let frames = parser.push("\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "message");
        assert_eq!(frames[0].data, "{\"a\":1}");
    }

    #[test]
    fn defaults_event_type_to_message() {
        let mut parser = SseFrameParser::new();
        let frames = parser.push("data: hello\n\n");
        assert_eq!(frames[0].event, "message");
    }

    #[test]
    fn multiple_frames_in_one_chunk_are_all_returned() {
        let mut parser = SseFrameParser::new();
        let frames = parser.push("data: a\n\ndata: b\n\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, "a");
        assert_eq!(frames[1].data, "b");
    }

    #[test]
    fn round_trips_through_encode() {
        let frame = SseFrame::message("{\"x\":1}");
        assert_eq!(frame.encode(), "event: message\ndata: {\"x\":1}\n\n");
    }
}
