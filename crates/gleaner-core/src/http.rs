//! Transport-neutral request/response types passed through [`Fetcher`](crate::traits::Fetcher).

use std::borrow::Cow;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
}

/// A single HTTP request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub method: Method,
    pub timeout: Duration,
    /// Reject bodies larger than this many bytes.
    pub max_bytes: Option<u64>,
    pub accept: Option<String>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::Get,
            timeout: Duration::from_secs(10),
            max_bytes: None,
            accept: None,
        }
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self {
            method: Method::Head,
            ..Self::get(url)
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }
}

/// A fully-read HTTP response.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// Final URL after redirects.
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    /// Raw body bytes; empty for HEAD.
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Convert a non-2xx response into [`AppError::HttpStatus`].
    pub fn error_for_status(self) -> Result<Self, AppError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(AppError::HttpStatus {
                status: self.status,
                url: self.url,
            })
        }
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    ///
    /// XML readers should take [`body`](Self::body) directly so they can honour
    /// the encoding declared in the prolog.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Lowercased MIME type without parameters.
    pub fn mime_type(&self) -> Option<String> {
        self.content_type.as_deref().map(|ct| {
            ct.split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
    }
}
