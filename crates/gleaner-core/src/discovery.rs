//! RSS/Atom/RDF feed discovery for a site.
//!
//! Strategies run in order and the first one that finds anything wins:
//!
//! 1. HEAD the URL itself; a feed content type means it *is* the feed (1.0).
//! 2. GET the page and read `<link rel="alternate">` tags (0.9).
//! 3. Probe well-known feed paths (0.7).
//! 4. Scan the page text for feed-looking URLs (0.5).
//!
//! Every candidate URL gets its own robots.txt check.

use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use scraper::Html;
use url::Url;

use crate::dom::{resolve_url, selector};
use crate::error::AppError;
use crate::http::FetchRequest;
use crate::models::{DiscoveredFeed, FeedSource, FeedType};
use crate::rate_limiter::{RateLimiter, RequestOptions};
use crate::robots::RobotsChecker;
use crate::traits::Fetcher;

/// Paths probed when a page advertises no feed.
pub const COMMON_FEED_PATHS: &[&str] = &[
    "/feed",
    "/feed/",
    "/rss",
    "/rss/",
    "/rss.xml",
    "/feed.xml",
    "/atom.xml",
    "/index.xml",
    "/feeds/posts/default",
    "/?feed=rss2",
];

static FEED_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:https?://|/)[^\s"'<>()]*(?:feed|rss|atom)[^\s"'<>()]*"#)
        .unwrap_or_else(|e| panic!("invalid feed regex: {e}"))
});

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Timeout for HEAD validation requests.
    pub probe_timeout: Duration,
    /// Timeout for the page GET.
    pub page_timeout: Duration,
    /// Feed-looking URLs validated during the content scan.
    pub max_scan_candidates: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(5),
            page_timeout: Duration::from_secs(10),
            max_scan_candidates: 5,
        }
    }
}

#[derive(Clone)]
pub struct FeedDiscovery<F: Fetcher> {
    fetcher: F,
    limiter: RateLimiter,
    robots: RobotsChecker<F>,
    config: DiscoveryConfig,
}

impl<F: Fetcher> FeedDiscovery<F> {
    pub fn new(fetcher: F, limiter: RateLimiter, robots: RobotsChecker<F>, config: DiscoveryConfig) -> Self {
        Self {
            fetcher,
            limiter,
            robots,
            config,
        }
    }

    /// Feeds for `url`, highest confidence first.
    pub async fn discover_feeds(&self, url: &str) -> Result<Vec<DiscoveredFeed>, AppError> {
        let base = Url::parse(url).map_err(|e| AppError::InvalidUrl(format!("{url}: {e}")))?;

        if let Some(feed_type) = self.validated(url, false).await {
            tracing::debug!(url = %url, "URL is itself a feed");
            return Ok(vec![DiscoveredFeed {
                url: url.to_string(),
                title: None,
                feed_type,
                source: FeedSource::Direct,
                confidence: 1.0,
            }]);
        }

        let page = self.fetch_page(url).await;

        if let Some((page_url, html)) = &page {
            let feeds = extract_link_tags(html, page_url);
            if !feeds.is_empty() {
                tracing::debug!(url = %url, count = feeds.len(), "Found feeds in link tags");
                return Ok(finalize(feeds));
            }
        }

        let mut feeds = Vec::new();
        for path in COMMON_FEED_PATHS {
            let Ok(candidate) = base.join(path) else { continue };
            if let Some(feed_type) = self.validated(candidate.as_str(), true).await {
                feeds.push(DiscoveredFeed {
                    url: candidate.to_string(),
                    title: None,
                    feed_type,
                    source: FeedSource::CommonPath,
                    confidence: 0.7,
                });
            }
        }
        if !feeds.is_empty() {
            tracing::debug!(url = %url, count = feeds.len(), "Found feeds at common paths");
            return Ok(finalize(feeds));
        }

        if let Some((page_url, html)) = &page {
            for candidate in scan_feed_urls(html, page_url)
                .into_iter()
                .take(self.config.max_scan_candidates)
            {
                if let Some(feed_type) = self.validated(&candidate, true).await {
                    feeds.push(DiscoveredFeed {
                        url: candidate,
                        title: None,
                        feed_type,
                        source: FeedSource::ContentScan,
                        confidence: 0.5,
                    });
                }
            }
        }

        if feeds.is_empty() {
            tracing::debug!(url = %url, "No feeds discovered");
        }
        Ok(finalize(feeds))
    }

    /// GET the page if robots.txt allows it; the final URL is the link base.
    async fn fetch_page(&self, url: &str) -> Option<(Url, String)> {
        if !self.allowed(url).await {
            tracing::debug!(url = %url, "Page disallowed by robots.txt, skipping link scan");
            return None;
        }

        let request = FetchRequest::get(url)
            .with_timeout(self.config.page_timeout)
            .with_accept("text/html,application/xhtml+xml");
        match self.limiter.fetch(&self.fetcher, request, RequestOptions::default()).await {
            Ok(response) => {
                let base = Url::parse(&response.url).or_else(|_| Url::parse(url)).ok()?;
                Some((base, response.text().into_owned()))
            }
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Page fetch failed during feed discovery");
                None
            }
        }
    }

    async fn allowed(&self, url: &str) -> bool {
        self.robots.is_allowed(url).await.is_ok_and(|v| v.allowed)
    }

    /// Robots check, then HEAD validation. `lenient` also accepts generic XML types.
    async fn validated(&self, url: &str, lenient: bool) -> Option<FeedType> {
        if !self.allowed(url).await {
            tracing::debug!(url = %url, "Feed candidate disallowed by robots.txt");
            return None;
        }
        self.probe(url, lenient).await
    }

    async fn probe(&self, url: &str, lenient: bool) -> Option<FeedType> {
        let request = FetchRequest::head(url).with_timeout(self.config.probe_timeout);
        let response = self
            .limiter
            .fetch(&self.fetcher, request, RequestOptions::no_retry())
            .await
            .ok()?;
        let mime = response.mime_type()?;

        feed_type_for_mime(&mime).or_else(|| {
            (lenient && is_generic_xml(&mime)).then(|| feed_type_for_url(url))
        })
    }
}

/// Feed type for a feed-specific MIME type.
pub fn feed_type_for_mime(mime: &str) -> Option<FeedType> {
    match mime {
        "application/rss+xml" | "application/x-rss+xml" => Some(FeedType::Rss),
        "application/atom+xml" => Some(FeedType::Atom),
        "application/rdf+xml" => Some(FeedType::Rdf),
        _ => None,
    }
}

fn is_generic_xml(mime: &str) -> bool {
    matches!(mime, "application/xml" | "text/xml")
}

fn feed_type_for_url(url: &str) -> FeedType {
    let lower = url.to_ascii_lowercase();
    if lower.contains("atom") {
        FeedType::Atom
    } else if lower.contains("rdf") {
        FeedType::Rdf
    } else {
        FeedType::Rss
    }
}

/// `<link rel="alternate" type="application/rss+xml">` style tags.
pub fn extract_link_tags(html: &str, base: &Url) -> Vec<DiscoveredFeed> {
    let doc = Html::parse_document(html);
    let links = selector("link[rel][href][type]");

    doc.select(&links)
        .filter_map(|el| {
            let attrs = el.value();
            let rel = attrs.attr("rel")?;
            if !rel.split_whitespace().any(|r| r.eq_ignore_ascii_case("alternate")) {
                return None;
            }
            let mime = attrs.attr("type")?.trim().to_ascii_lowercase();
            let feed_type = feed_type_for_mime(&mime)?;
            let url = resolve_url(base, attrs.attr("href")?)?;
            Some(DiscoveredFeed {
                url: url.to_string(),
                title: attrs
                    .attr("title")
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string),
                feed_type,
                source: FeedSource::LinkTag,
                confidence: 0.9,
            })
        })
        .collect()
}

/// Feed-looking URLs mentioned anywhere in the page, in document order.
pub fn scan_feed_urls(html: &str, base: &Url) -> Vec<String> {
    let mut seen = HashSet::new();
    FEED_URL_RE
        .find_iter(html)
        .filter_map(|m| resolve_url(base, m.as_str()))
        .filter(|u| {
            let path = u.path().to_ascii_lowercase();
            !(path.ends_with(".js")
                || path.ends_with(".css")
                || path.ends_with(".png")
                || path.ends_with(".jpg")
                || path.ends_with(".svg"))
        })
        .map(|u| u.to_string())
        .filter(|u| seen.insert(u.clone()))
        .collect()
}

fn finalize(mut feeds: Vec<DiscoveredFeed>) -> Vec<DiscoveredFeed> {
    let mut seen = HashSet::new();
    feeds.retain(|f| seen.insert(f.url.clone()));
    feeds.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    feeds
}
