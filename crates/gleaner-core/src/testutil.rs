//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::AppError;
use crate::http::{FetchRequest, FetchResponse, Method};
use crate::progress::{Phase, ProgressEvent, ProgressReporter};
use crate::rate_limiter::{RateLimiter, RateLimiterConfig};
use crate::traits::{Cleaner, ContentIsolator, Fetcher, IsolatedContent, SearchProvider};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Mock fetcher routing by URL and method.
///
/// Unrouted URLs answer `404`. A HEAD request without its own route falls
/// back to the GET route with an empty body. Routes with several queued
/// outcomes pop one per call and keep repeating the last.
#[derive(Clone, Default)]
pub struct MockFetcher {
    routes: Arc<Mutex<HashMap<(Method, String), Vec<Result<FetchResponse, AppError>>>>>,
    calls: Arc<Mutex<Vec<(Method, String)>>>,
    delay: Option<Duration>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep before answering every request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn route(self, method: Method, url: &str, outcomes: Vec<Result<FetchResponse, AppError>>) -> Self {
        self.routes
            .lock()
            .unwrap()
            .insert((method, url.to_string()), outcomes);
        self
    }

    pub fn route_body(self, url: &str, content_type: &str, body: &str) -> Self {
        let resp = response(url, 200, Some(content_type), body);
        self.route(Method::Get, url, vec![Ok(resp)])
    }

    pub fn route_html(self, url: &str, body: &str) -> Self {
        self.route_body(url, "text/html; charset=utf-8", body)
    }

    pub fn route_xml(self, url: &str, body: &str) -> Self {
        self.route_body(url, "application/xml", body)
    }

    pub fn route_rss(self, url: &str, body: &str) -> Self {
        self.route_body(url, "application/rss+xml", body)
    }

    pub fn route_status(self, url: &str, status: u16) -> Self {
        let resp = response(url, status, Some("text/html"), "");
        self.route(Method::Get, url, vec![Ok(resp)])
    }

    /// Error for both GET and HEAD.
    pub fn route_error(self, url: &str, error: AppError) -> Self {
        self.route(Method::Get, url, vec![Err(error.clone())])
            .route(Method::Head, url, vec![Err(error)])
    }

    pub fn route_head(self, url: &str, status: u16, content_type: &str) -> Self {
        let resp = response(url, status, Some(content_type), "");
        self.route(Method::Head, url, vec![Ok(resp)])
    }

    pub fn calls(&self) -> Vec<(Method, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(_, u)| u == url).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn next_outcome(&self, method: Method, url: &str) -> Option<Result<FetchResponse, AppError>> {
        let mut routes = self.routes.lock().unwrap();
        let outcomes = routes.get_mut(&(method, url.to_string()))?;
        if outcomes.len() > 1 {
            Some(outcomes.remove(0))
        } else {
            outcomes.first().cloned()
        }
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, AppError> {
        self.calls
            .lock()
            .unwrap()
            .push((request.method, request.url.clone()));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(outcome) = self.next_outcome(request.method, &request.url) {
            return outcome;
        }
        if request.method == Method::Head
            && let Some(outcome) = self.next_outcome(Method::Get, &request.url)
        {
            return outcome.map(|mut r| {
                r.body.clear();
                r
            });
        }
        Ok(response(&request.url, 404, Some("text/html"), ""))
    }
}

pub fn response(url: &str, status: u16, content_type: Option<&str>, body: &str) -> FetchResponse {
    FetchResponse {
        url: url.to_string(),
        status,
        content_type: content_type.map(str::to_string),
        content_length: Some(body.len() as u64),
        body: body.as_bytes().to_vec(),
    }
}

// ---------------------------------------------------------------------------
// MockCleaner
// ---------------------------------------------------------------------------

/// Mock cleaner that applies a simple transformation.
#[derive(Clone)]
pub struct MockCleaner {
    error: Arc<Mutex<Option<AppError>>>,
}

impl MockCleaner {
    /// Creates a cleaner that returns the input unchanged.
    pub fn passthrough() -> Self {
        Self {
            error: Arc::new(Mutex::new(None)),
        }
    }

    /// Creates a cleaner that returns an error once.
    pub fn with_error(error: AppError) -> Self {
        Self {
            error: Arc::new(Mutex::new(Some(error))),
        }
    }
}

impl Cleaner for MockCleaner {
    fn clean(&self, html: &str) -> Result<String, AppError> {
        let mut err = self.error.lock().unwrap();
        if let Some(e) = err.take() {
            return Err(e);
        }
        Ok(html.to_string())
    }
}

// ---------------------------------------------------------------------------
// MockIsolator
// ---------------------------------------------------------------------------

/// Mock content isolator with per-URL canned results.
#[derive(Clone, Default)]
pub struct MockIsolator {
    by_url: Arc<Mutex<HashMap<String, IsolatedContent>>>,
    fallback: Option<IsolatedContent>,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl MockIsolator {
    /// Never isolates anything, forcing the heuristic tier.
    pub fn none() -> Self {
        Self::default()
    }

    /// Returns `content` for every URL.
    pub fn always(content: IsolatedContent) -> Self {
        Self {
            fallback: Some(content),
            ..Self::default()
        }
    }

    pub fn with(self, url: &str, content: IsolatedContent) -> Self {
        self.by_url.lock().unwrap().insert(url.to_string(), content);
        self
    }
}

impl ContentIsolator for MockIsolator {
    fn isolate(&self, _html: &str, url: &str) -> Option<IsolatedContent> {
        self.calls.lock().unwrap().push(url.to_string());
        self.by_url
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .or_else(|| self.fallback.clone())
    }
}

/// Isolated content with `words` words of body text.
pub fn isolated(title: &str, words: usize) -> IsolatedContent {
    let text = lorem(words);
    IsolatedContent {
        title: Some(title.to_string()),
        content_html: format!("<article><p>{text}</p></article>"),
        text_content: text,
        excerpt: None,
        byline: None,
        site_name: None,
    }
}

// ---------------------------------------------------------------------------
// MockSearchProvider
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct MockSearchProvider {
    result: Arc<Mutex<Result<Vec<String>, AppError>>>,
    pub queries: Arc<Mutex<Vec<String>>>,
}

impl MockSearchProvider {
    pub fn new(urls: &[&str]) -> Self {
        Self {
            result: Arc::new(Mutex::new(Ok(urls.iter().map(|u| u.to_string()).collect()))),
            queries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_error(error: AppError) -> Self {
        Self {
            result: Arc::new(Mutex::new(Err(error))),
            queries: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl SearchProvider for MockSearchProvider {
    async fn search_articles(&self, domain: &str, _page_url: &str) -> Result<Vec<String>, AppError> {
        self.queries.lock().unwrap().push(domain.to_string());
        self.result.lock().unwrap().clone()
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Mock progress reporter that records events.
#[derive(Default)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phases(&self) -> Vec<Phase> {
        self.events.lock().unwrap().iter().map(|e| e.phase).collect()
    }
}

impl ProgressReporter for MockReporter {
    fn report(&self, event: &ProgressEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Limiter without meaningful spacing or backoff.
pub fn fast_limiter() -> RateLimiter {
    RateLimiter::new(RateLimiterConfig {
        requests_per_second: 1000.0,
        max_backoff: Duration::from_millis(5),
        ..Default::default()
    })
}

/// `words` space-separated filler words.
pub fn lorem(words: usize) -> String {
    const WORDS: [&str; 8] = ["lorem", "ipsum", "dolor", "sit", "amet", "consectetur", "adipiscing", "elit"];
    (0..words).map(|i| WORDS[i % WORDS.len()]).collect::<Vec<_>>().join(" ")
}

/// RSS 2.0 document; items are `(title, link, pub_date)`.
pub fn rss_feed(items: &[(&str, &str, Option<&str>)]) -> String {
    let body: String = items
        .iter()
        .map(|(title, link, date)| {
            let date = date
                .map(|d| format!("<pubDate>{d}</pubDate>"))
                .unwrap_or_default();
            format!("<item><title>{title}</title><link>{link}</link>{date}<description>About {title}</description></item>")
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><rss version="2.0"><channel><title>Test Feed</title><link>https://example.com/</link><description>Test</description>{body}</channel></rss>"#
    )
}

/// Sitemap `<urlset>`; entries are `(loc, lastmod)`.
pub fn sitemap_xml(entries: &[(&str, Option<&str>)]) -> String {
    let body: String = entries
        .iter()
        .map(|(loc, lastmod)| {
            let lastmod = lastmod
                .map(|d| format!("<lastmod>{d}</lastmod>"))
                .unwrap_or_default();
            format!("<url><loc>{loc}</loc>{lastmod}</url>")
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">{body}</urlset>"#
    )
}

/// Listing page with one `<article>` teaser per `(href, title)`.
pub fn listing_page(links: &[(&str, &str)]) -> String {
    let body: String = links
        .iter()
        .map(|(href, title)| {
            format!(
                r#"<article class="post"><h2><a href="{href}">{title}</a></h2><time datetime="2024-05-01T10:00:00Z">May 1</time><p class="excerpt">Summary of {title}</p></article>"#
            )
        })
        .collect();
    format!("<html><head><title>Blog</title></head><body><main>{body}</main></body></html>")
}

/// Article page whose body holds `words` words.
pub fn article_page(title: &str, words: usize) -> String {
    format!(
        r#"<html lang="en"><head><title>{title}</title><meta property="article:published_time" content="2024-05-01T10:00:00Z"></head><body><nav>Home About</nav><article><h1>{title}</h1><p>{}</p></article></body></html>"#,
        lorem(words)
    )
}
