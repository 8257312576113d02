//! Server-sent-events wire format for streamed scrapes.
//!
//! Each event is a single `data: <json>\n\n` frame where the JSON is
//! `{"type": "progress" | "result" | "error", "data": ...}`. A stream carries
//! any number of `progress` events followed by exactly one `result` or
//! `error`.

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::ScrapeResult;
use crate::progress::ProgressEvent;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum StreamEvent {
    Progress(ProgressEvent),
    Result(Box<ScrapeResult>),
    Error(StreamError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamError {
    pub message: String,
    /// Machine-readable kind, e.g. `aborted` or `circuit_open`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl StreamEvent {
    pub fn error(err: &AppError) -> Self {
        StreamEvent::Error(StreamError {
            message: err.to_string(),
            code: Some(error_code(err).to_string()),
        })
    }

    /// `result` and `error` end a stream.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Progress(_))
    }
}

pub fn error_code(err: &AppError) -> &'static str {
    match err {
        AppError::Aborted => "aborted",
        AppError::CircuitOpen { .. } => "circuit_open",
        AppError::InvalidUrl(_) | AppError::SsrfBlocked(_) => "invalid_url",
        AppError::Timeout(_) => "timeout",
        AppError::RateLimitExceeded => "rate_limited",
        AppError::RobotsBlocked(_) => "robots_blocked",
        AppError::NoContentFound(_) => "no_content",
        _ => "internal",
    }
}

/// Encode one event as an SSE frame.
pub fn encode_event(event: &StreamEvent) -> Result<String, AppError> {
    let json = serde_json::to_string(event)?;
    Ok(format!("data: {json}\n\n"))
}

/// Incremental SSE decoder.
///
/// Bytes may arrive split at arbitrary points, including inside a UTF-8
/// sequence; complete frames are only decoded once their blank-line
/// delimiter has arrived.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every event it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut events = Vec::new();
        while let Some(end) = find_delimiter(&self.buffer) {
            let frame: Vec<u8> = self.buffer.drain(..end + 2).collect();
            if let Some(event) = decode_frame(&frame[..end]) {
                events.push(event);
            }
        }
        events
    }

    /// Decode whatever remains once the stream has ended.
    pub fn finish(&mut self) -> Option<StreamEvent> {
        let rest = std::mem::take(&mut self.buffer);
        decode_frame(&rest)
    }

    /// Bytes held waiting for a delimiter.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn find_delimiter(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

fn decode_frame(frame: &[u8]) -> Option<StreamEvent> {
    let text = String::from_utf8_lossy(frame);
    let data: Vec<&str> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|d| d.strip_prefix(' ').unwrap_or(d))
        .collect();
    if data.is_empty() {
        return None;
    }

    let payload = data.join("\n");
    match serde_json::from_str(&payload) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!(error = %e, "Skipping malformed SSE frame");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExtractionStats, ResultConfidence};
    use crate::progress::Phase;

    fn progress(message: &str) -> StreamEvent {
        StreamEvent::Progress(ProgressEvent::new(Phase::Discovering, message, 5))
    }

    fn result() -> StreamEvent {
        StreamEvent::Result(Box::new(ScrapeResult {
            url: "https://example.com".into(),
            detected_type: None,
            source_info: None,
            articles: vec![],
            errors: vec!["no feed".into()],
            extraction_stats: ExtractionStats::default(),
            confidence: ResultConfidence::Low,
            processing_time_ms: 42,
        }))
    }

    #[test]
    fn encodes_tagged_frame() {
        let frame = encode_event(&progress("Found 3")).unwrap();
        assert!(frame.starts_with("data: {\"type\":\"progress\",\"data\":{"));
        assert!(frame.ends_with("\n\n"));
    }

    #[test]
    fn parses_frames_split_across_chunks() {
        let mut stream = String::new();
        stream.push_str(&encode_event(&progress("one")).unwrap());
        stream.push_str(&encode_event(&progress("two")).unwrap());
        stream.push_str(&encode_event(&result()).unwrap());
        let bytes = stream.as_bytes();

        let mut parser = SseParser::new();
        let mut events = Vec::new();
        for chunk in bytes.chunks(7) {
            events.extend(parser.feed(chunk));
        }

        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], StreamEvent::Progress(p) if p.message == "one"));
        assert!(matches!(&events[1], StreamEvent::Progress(p) if p.message == "two"));
        match &events[2] {
            StreamEvent::Result(r) => {
                assert_eq!(r.processing_time_ms, 42);
                assert_eq!(r.confidence, ResultConfidence::Low);
            }
            other => panic!("expected result, got {other:?}"),
        }
        assert!(events[2].is_terminal());
        assert_eq!(parser.pending(), 0);
    }

    #[test]
    fn partial_frame_is_held() {
        let frame = encode_event(&progress("held")).unwrap();
        let (head, tail) = frame.split_at(frame.len() - 1);

        let mut parser = SseParser::new();
        assert!(parser.feed(head.as_bytes()).is_empty());
        assert!(parser.pending() > 0);
        assert_eq!(parser.feed(tail.as_bytes()).len(), 1);
    }

    #[test]
    fn handles_crlf_and_comments() {
        let mut parser = SseParser::new();
        let input = ": keep-alive\r\n\r\ndata: {\"type\":\"error\",\"data\":{\"message\":\"boom\"}}\r\n\r\n";
        let events = parser.feed(input.as_bytes());
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], StreamEvent::Error(e) if e.message == "boom" && e.code.is_none()));
    }

    #[test]
    fn malformed_frames_are_skipped() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"data: not json\n\ndata: {\"type\":\"progress\",\"data\":{\"phase\":\"complete\",\"message\":\"done\",\"elapsedMs\":1}}\n\n");
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn finish_flushes_unterminated_frame() {
        let mut parser = SseParser::new();
        let frame = encode_event(&progress("last")).unwrap();
        parser.feed(frame.trim_end().as_bytes());
        assert!(parser.finish().is_some());
        assert_eq!(parser.pending(), 0);
    }

    #[test]
    fn error_events_carry_codes() {
        match StreamEvent::error(&AppError::Aborted) {
            StreamEvent::Error(e) => assert_eq!(e.code.as_deref(), Some("aborted")),
            _ => unreachable!(),
        }
    }
}
