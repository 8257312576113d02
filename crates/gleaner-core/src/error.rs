use std::time::Duration;

use thiserror::Error;

/// Application-wide error types for Gleaner.
#[derive(Error, Debug, Clone)]
pub enum AppError {
    /// HTTP request failed before a status line was received.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Server answered with a non-success status.
    #[error("HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// HTML-to-Markdown conversion failed.
    #[error("Cleaner error: {0}")]
    CleanerError(String),

    /// Feed, sitemap or robots.txt body could not be parsed.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Caller cancelled the operation. Never retried.
    #[error("Request aborted")]
    Aborted,

    /// Rate limit exceeded.
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// robots.txt disallows the URL for our user agent.
    #[error("Blocked by robots.txt: {0}")]
    RobotsBlocked(String),

    /// Content could not be extracted from a fetched page.
    #[error("Content extraction failed: {0}")]
    ContentExtractionFailed(String),

    /// No candidates were discovered by any strategy.
    #[error("No content found: {0}")]
    NoContentFound(String),

    /// URL could not be parsed or has no host.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// URL targets a private, loopback or otherwise reserved address.
    #[error("SSRF blocked: {0}")]
    SsrfBlocked(String),

    /// Response body exceeds the configured cap.
    #[error("Response too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: u64, limit: u64 },

    /// Circuit breaker rejected the call without running it.
    #[error("Circuit breaker '{name}' is open. Retry after {} seconds.", retry_after.as_secs())]
    CircuitOpen { name: String, retry_after: Duration },

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The host actively refused the TCP connection.
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::SerializationError(err.to_string())
    }
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_)
            | AppError::ConnectionRefused(_)
            | AppError::Timeout(_)
            | AppError::RateLimitExceeded => true,
            AppError::HttpStatus { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
            AppError::HttpError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("reset")
            }
            _ => false,
        }
    }

    /// Returns true if this error should push the host into exponential backoff.
    ///
    /// Only server pressure signals qualify: 429, 5xx and refused connections.
    pub fn should_backoff(&self) -> bool {
        match self {
            AppError::RateLimitExceeded | AppError::ConnectionRefused(_) => true,
            AppError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Returns true if this error should trip the circuit breaker.
    pub fn should_trip_circuit(&self) -> bool {
        match self {
            AppError::NetworkError(_)
            | AppError::ConnectionRefused(_)
            | AppError::Timeout(_)
            | AppError::RateLimitExceeded => true,
            AppError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            AppError::HttpError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("connection")
            }
            _ => false,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, AppError::Aborted)
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            AppError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> AppError {
        AppError::HttpStatus {
            status: code,
            url: "https://example.com".into(),
        }
    }

    #[test]
    fn test_retryable_errors() {
        assert!(AppError::NetworkError("dns lookup failed".into()).is_retryable());
        assert!(AppError::ConnectionRefused("x".into()).is_retryable());
        assert!(AppError::Timeout(30).is_retryable());
        assert!(AppError::RateLimitExceeded.is_retryable());
        assert!(status(408).is_retryable());
        assert!(status(429).is_retryable());
        assert!(status(503).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(!AppError::Aborted.is_retryable());
        assert!(!AppError::CleanerError("bad html".into()).is_retryable());
    }

    #[test]
    fn test_backoff_errors() {
        assert!(status(429).should_backoff());
        assert!(status(500).should_backoff());
        assert!(AppError::ConnectionRefused("127.0.0.1:9".into()).should_backoff());
        assert!(!AppError::NetworkError("Connection failed: connection refused".into()).should_backoff());
        assert!(!AppError::NetworkError("dns error".into()).should_backoff());
        assert!(!status(408).should_backoff());
        assert!(!AppError::Timeout(15).should_backoff());
    }

    #[test]
    fn test_circuit_tripping() {
        assert!(AppError::RateLimitExceeded.should_trip_circuit());
        assert!(AppError::Timeout(30).should_trip_circuit());
        assert!(AppError::ConnectionRefused("x".into()).should_trip_circuit());
        assert!(status(502).should_trip_circuit());
        assert!(!status(404).should_trip_circuit());
        assert!(!AppError::ParseError("bad".into()).should_trip_circuit());
    }

    #[test]
    fn test_circuit_open_message() {
        let err = AppError::CircuitOpen {
            name: "example.com".into(),
            retry_after: Duration::from_secs(12),
        };
        assert_eq!(
            err.to_string(),
            "Circuit breaker 'example.com' is open. Retry after 12 seconds."
        );
    }
}
