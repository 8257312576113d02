//! Progress events emitted by the scrape pipeline.

use serde::{Deserialize, Serialize};

/// Pipeline stage an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Initializing,
    Detecting,
    Discovering,
    Filtering,
    Extracting,
    Scoring,
    Complete,
    Error,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Initializing => "initializing",
            Phase::Detecting => "detecting",
            Phase::Discovering => "discovering",
            Phase::Filtering => "filtering",
            Phase::Extracting => "extracting",
            Phase::Scoring => "scoring",
            Phase::Complete => "complete",
            Phase::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub phase: Phase,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub articles_found: Option<usize>,
    pub elapsed_ms: u64,
}

impl ProgressEvent {
    pub fn new(phase: Phase, message: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            phase,
            message: message.into(),
            current: None,
            total: None,
            percent: None,
            current_url: None,
            articles_found: None,
            elapsed_ms,
        }
    }

    /// Attach `current / total` and the derived percentage.
    pub fn with_progress(mut self, current: usize, total: usize) -> Self {
        self.current = Some(current);
        self.total = Some(total);
        self.percent = Some(percent(current, total));
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.current_url = Some(url.into());
        self
    }

    pub fn with_articles_found(mut self, count: usize) -> Self {
        self.articles_found = Some(count);
        self
    }
}

/// Integer percentage, clamped to 100. An empty total counts as done.
pub fn percent(current: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((current.min(total) * 100) / total) as u8
}

/// Receives pipeline progress events.
///
/// Implement this to drive a UI, an SSE stream, or a log.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &ProgressEvent) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgressReporter;

impl ProgressReporter for TracingProgressReporter {
    fn report(&self, event: &ProgressEvent) {
        match event.phase {
            Phase::Extracting => {
                tracing::debug!(
                    phase = %event.phase,
                    current = ?event.current,
                    total = ?event.total,
                    url = ?event.current_url,
                    "{}",
                    event.message
                );
            }
            Phase::Error => {
                tracing::warn!(phase = %event.phase, elapsed_ms = event.elapsed_ms, "{}", event.message);
            }
            _ => {
                tracing::info!(
                    phase = %event.phase,
                    articles = ?event.articles_found,
                    elapsed_ms = event.elapsed_ms,
                    "{}",
                    event.message
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_is_bounded() {
        assert_eq!(percent(0, 10), 0);
        assert_eq!(percent(5, 10), 50);
        assert_eq!(percent(12, 10), 100);
        assert_eq!(percent(0, 0), 100);
    }

    #[test]
    fn event_serializes_camel_case_without_empty_fields() {
        let event = ProgressEvent::new(Phase::Extracting, "Extracting 1 of 4", 12)
            .with_progress(1, 4)
            .with_url("https://example.com/a");
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["phase"], "extracting");
        assert_eq!(json["percent"], 25);
        assert_eq!(json["currentUrl"], "https://example.com/a");
        assert_eq!(json["elapsedMs"], 12);
        assert!(json.get("articlesFound").is_none());
    }
}
