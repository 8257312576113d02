use std::future::Future;

use crate::error::AppError;
use crate::http::{FetchRequest, FetchResponse};

/// Performs a single HTTP request.
///
/// Implementations report transport failures as errors but return non-2xx
/// responses as `Ok` so callers can inspect the status. Scheduling, retries
/// and robots.txt are handled above this layer.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(
        &self,
        request: FetchRequest,
    ) -> impl Future<Output = Result<FetchResponse, AppError>> + Send;
}

/// Converts raw HTML into clean Markdown text.
pub trait Cleaner: Send + Sync + Clone {
    fn clean(&self, html: &str) -> Result<String, AppError>;
}

/// Main content isolated from a page by a readability-style algorithm.
#[derive(Debug, Clone, Default)]
pub struct IsolatedContent {
    pub title: Option<String>,
    pub content_html: String,
    pub text_content: String,
    pub excerpt: Option<String>,
    pub byline: Option<String>,
    pub site_name: Option<String>,
}

/// DOM-based main-content isolation.
///
/// Returns `None` when the page does not contain enough readable content.
pub trait ContentIsolator: Send + Sync + Clone {
    fn isolate(&self, html: &str, url: &str) -> Option<IsolatedContent>;
}

/// External search used as a last-resort article source.
///
/// Returns citation URLs the provider considers relevant to `domain`.
pub trait SearchProvider: Send + Sync + Clone {
    fn search_articles(
        &self,
        domain: &str,
        page_url: &str,
    ) -> impl Future<Output = Result<Vec<String>, AppError>> + Send;
}

/// A SearchProvider that never finds anything.
#[derive(Debug, Clone, Default)]
pub struct NoSearch;

impl SearchProvider for NoSearch {
    async fn search_articles(&self, _domain: &str, _page_url: &str) -> Result<Vec<String>, AppError> {
        Ok(vec![])
    }
}
