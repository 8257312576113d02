//! Full-text extraction for a single article URL.
//!
//! Two tiers: the injected [`ContentIsolator`] first, then a selector
//! heuristic that strips page chrome and picks the first large content
//! container. Pages where neither tier reaches the minimum text length
//! yield `Ok(None)`.

use std::time::Duration;

use chrono::Utc;
use scraper::{ElementRef, Html};
use serde_json::Value;

use crate::dom::{collapse_whitespace, element_text, selector, title_from_url};
use crate::error::AppError;
use crate::http::FetchRequest;
use crate::models::{ContentMethod, ExtractedContent};
use crate::rate_limiter::{RateLimiter, RequestOptions};
use crate::robots::RobotsChecker;
use crate::ssrf;
use crate::traits::{ContentIsolator, Fetcher};

const WORDS_PER_MINUTE: usize = 200;
const EXCERPT_CHARS: usize = 200;

/// Removed before the heuristic tier looks for content.
pub const NOISE_SELECTORS: &[&str] = &[
    "script",
    "style",
    "noscript",
    "template",
    "iframe",
    "form",
    "nav",
    "header",
    "footer",
    "aside",
    "[role='navigation']",
    "[role='banner']",
    "[role='contentinfo']",
    ".ads",
    ".ad",
    ".advertisement",
    ".sidebar",
    ".comments",
    "#comments",
    ".share",
    ".social",
    ".related",
    ".newsletter",
    ".cookie-banner",
    ".breadcrumb",
];

/// Content containers, most specific first.
pub const CONTENT_SELECTORS: &[&str] = &[
    "article",
    "[itemprop='articleBody']",
    ".post-content",
    ".entry-content",
    ".article-content",
    ".article-body",
    ".post-body",
    ".story-body",
    "[role='main']",
    "main",
    "#content",
    ".content",
];

#[derive(Debug, Clone)]
pub struct ContentConfig {
    pub timeout: Duration,
    pub max_bytes: u64,
    /// Text shorter than this does not count as an article.
    pub min_text_chars: usize,
    /// Permit loopback and private-network targets.
    pub allow_private_urls: bool,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            max_bytes: 10 * 1024 * 1024,
            min_text_chars: 200,
            allow_private_urls: false,
        }
    }
}

/// Outcome of running both extraction tiers over a page.
#[derive(Debug, Clone)]
pub enum ExtractionAttempt {
    Primary(ExtractedContent),
    Fallback(ExtractedContent),
    /// Why each tier gave up.
    Failed(Vec<String>),
}

impl ExtractionAttempt {
    pub fn into_content(self) -> Option<ExtractedContent> {
        match self {
            ExtractionAttempt::Primary(c) | ExtractionAttempt::Fallback(c) => Some(c),
            ExtractionAttempt::Failed(_) => None,
        }
    }
}

/// Page-level metadata read from `<head>` and JSON-LD.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub byline: Option<String>,
    pub published_time: Option<String>,
    pub site_name: Option<String>,
    pub lang: Option<String>,
    pub structured: Option<Value>,
}

pub fn extract_metadata(doc: &Html) -> PageMetadata {
    let meta = |css: &str| {
        doc.select(&selector(css))
            .filter_map(|el| el.value().attr("content"))
            .map(collapse_whitespace)
            .find(|v| !v.is_empty())
    };

    let structured = doc
        .select(&selector(r#"script[type="application/ld+json"]"#))
        .find_map(|s| serde_json::from_str::<Value>(s.text().collect::<String>().trim()).ok());
    let ld = structured.as_ref().and_then(find_article_node);
    let ld_str = |key: &str| ld.and_then(|n| n.get(key)).and_then(Value::as_str).map(str::to_string);
    let ld_author = ld.and_then(|n| n.get("author")).and_then(|a| match a {
        Value::String(s) => Some(s.clone()),
        Value::Object(o) => o.get("name").and_then(Value::as_str).map(str::to_string),
        Value::Array(items) => items.iter().find_map(|i| {
            i.as_str()
                .map(str::to_string)
                .or_else(|| i.get("name").and_then(Value::as_str).map(str::to_string))
        }),
        _ => None,
    });

    let byline = meta(r#"meta[name="author"]"#)
        .or_else(|| meta(r#"meta[property="article:author"]"#))
        .or(ld_author)
        .or_else(|| {
            doc.select(&selector(r#"[rel="author"], .byline, .author"#))
                .map(|el| element_text(&el))
                .find(|t| !t.is_empty() && t.len() < 100)
        });

    let published_time = meta(r#"meta[property="article:published_time"]"#)
        .or_else(|| meta(r#"meta[itemprop="datePublished"]"#))
        .or_else(|| meta(r#"meta[name="date"]"#))
        .or_else(|| meta(r#"meta[name="pubdate"]"#))
        .or_else(|| ld_str("datePublished"))
        .or_else(|| {
            doc.select(&selector("time[datetime]"))
                .find_map(|t| t.value().attr("datetime").map(str::to_string))
        });

    let title = meta(r#"meta[property="og:title"]"#)
        .or_else(|| ld_str("headline"))
        .or_else(|| {
            doc.select(&selector("title"))
                .map(|t| element_text(&t))
                .find(|t| !t.is_empty())
        })
        .or_else(|| {
            doc.select(&selector("h1"))
                .map(|t| element_text(&t))
                .find(|t| !t.is_empty())
        });

    PageMetadata {
        title,
        description: meta(r#"meta[name="description"]"#).or_else(|| meta(r#"meta[property="og:description"]"#)),
        byline,
        published_time,
        site_name: meta(r#"meta[property="og:site_name"]"#),
        lang: doc
            .select(&selector("html[lang]"))
            .find_map(|h| h.value().attr("lang").map(str::to_string)),
        structured,
    }
}

fn find_article_node(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.iter().find_map(find_article_node),
        Value::Object(obj) => {
            if crate::quality::is_article_schema_type(obj.get("@type")) {
                return Some(value);
            }
            obj.get("@graph").and_then(find_article_node)
        }
        _ => None,
    }
}

/// Run both tiers over already-fetched HTML.
pub fn extract_from_html<I: ContentIsolator>(
    isolator: &I,
    html: &str,
    url: &str,
    min_text_chars: usize,
) -> ExtractionAttempt {
    let doc = Html::parse_document(html);
    let metadata = extract_metadata(&doc);
    let mut reasons = Vec::new();

    match isolator.isolate(html, url) {
        None => reasons.push("readability: no readable content".to_string()),
        Some(isolated) => {
            let text = collapse_whitespace(&isolated.text_content);
            if text.chars().count() >= min_text_chars {
                let content = build_content(
                    url,
                    &metadata,
                    isolated.title,
                    isolated.content_html,
                    text,
                    ContentMethod::Readability,
                    0.9,
                );
                return ExtractionAttempt::Primary(ExtractedContent {
                    excerpt: isolated.excerpt.or(content.excerpt),
                    byline: isolated.byline.or(content.byline),
                    site_name: isolated.site_name.or(content.site_name),
                    ..content
                });
            }
            tracing::debug!(url = %url, chars = text.chars().count(), "Isolated text too short, trying fallback");
            reasons.push(format!("readability: only {} characters", text.chars().count()));
        }
    }

    match heuristic_extract(doc, min_text_chars) {
        Some((content_html, text)) => ExtractionAttempt::Fallback(build_content(
            url,
            &metadata,
            None,
            content_html,
            text,
            ContentMethod::Fallback,
            0.6,
        )),
        None => {
            reasons.push(format!("fallback: less than {min_text_chars} characters of text"));
            ExtractionAttempt::Failed(reasons)
        }
    }
}

fn build_content(
    url: &str,
    metadata: &PageMetadata,
    title: Option<String>,
    content_html: String,
    text: String,
    method: ContentMethod,
    confidence: f64,
) -> ExtractedContent {
    let word_count = text.split_whitespace().count();
    let excerpt = metadata.description.clone().or_else(|| {
        let cut: String = text.chars().take(EXCERPT_CHARS).collect();
        (!cut.is_empty()).then_some(cut)
    });

    ExtractedContent {
        url: url.to_string(),
        title: title
            .filter(|t| !t.trim().is_empty())
            .or_else(|| metadata.title.clone())
            .unwrap_or_else(|| title_from_url(url)),
        content: content_html,
        text_content: text,
        excerpt,
        byline: metadata.byline.clone(),
        published_time: metadata.published_time.clone(),
        site_name: metadata.site_name.clone(),
        lang: metadata.lang.clone(),
        structured: metadata.structured.clone(),
        word_count,
        reading_time: word_count.div_ceil(WORDS_PER_MINUTE) as u32,
        confidence,
        extraction_method: method,
        extracted_at: Utc::now(),
    }
}

/// Strip noise, then take the first container whose HTML clears the
/// minimum, or the whole body. Returns `(html, text)`.
fn heuristic_extract(mut doc: Html, min_text_chars: usize) -> Option<(String, String)> {
    let noise: Vec<_> = NOISE_SELECTORS
        .iter()
        .flat_map(|css| doc.select(&selector(css)).map(|el| el.id()).collect::<Vec<_>>())
        .collect();
    for id in noise {
        if let Some(mut node) = doc.tree.get_mut(id) {
            node.detach();
        }
    }

    let pick = |el: ElementRef<'_>| (el.inner_html(), element_text(&el));
    let (html, text) = CONTENT_SELECTORS
        .iter()
        .find_map(|css| {
            doc.select(&selector(css))
                .find(|el| el.inner_html().trim().len() > min_text_chars)
                .map(pick)
        })
        .or_else(|| doc.select(&selector("body")).next().map(pick))?;

    (text.chars().count() >= min_text_chars).then(|| (html.trim().to_string(), text))
}

/// Fetches article pages and extracts their readable text.
#[derive(Clone)]
pub struct ContentExtractor<F: Fetcher, I: ContentIsolator> {
    fetcher: F,
    limiter: RateLimiter,
    robots: RobotsChecker<F>,
    isolator: I,
    config: ContentConfig,
}

impl<F: Fetcher, I: ContentIsolator> ContentExtractor<F, I> {
    pub fn new(fetcher: F, limiter: RateLimiter, robots: RobotsChecker<F>, isolator: I, config: ContentConfig) -> Self {
        Self {
            fetcher,
            limiter,
            robots,
            isolator,
            config,
        }
    }

    /// Extract the article at `url`.
    ///
    /// `Ok(None)` means the page was fetched but holds no article-sized
    /// text. Blocked, unsafe, oversized, or failed fetches are errors.
    pub async fn extract_content(&self, url: &str) -> Result<Option<ExtractedContent>, AppError> {
        let checked = ssrf::check_url_with(url, self.config.allow_private_urls)?;

        let verdict = self.robots.is_allowed(checked.as_str()).await?;
        if !verdict.allowed {
            return Err(AppError::RobotsBlocked(format!("{url}: {}", verdict.reason)));
        }

        let request = FetchRequest::get(checked.as_str())
            .with_timeout(self.config.timeout)
            .with_max_bytes(self.config.max_bytes)
            .with_accept("text/html,application/xhtml+xml;q=0.9,*/*;q=0.5");
        let response = self
            .limiter
            .fetch(&self.fetcher, request, RequestOptions::default())
            .await?;

        let limit = self.config.max_bytes;
        let size = response
            .content_length
            .unwrap_or(0)
            .max(response.body.len() as u64);
        if size > limit {
            return Err(AppError::PayloadTooLarge { size, limit });
        }
        if let Some(mime) = response.mime_type()
            && !(mime.contains("html") || mime.contains("xml") || mime.starts_with("text/"))
        {
            return Err(AppError::ContentExtractionFailed(format!(
                "{url}: unsupported content type {mime}"
            )));
        }

        match extract_from_html(&self.isolator, &response.text(), url, self.config.min_text_chars) {
            ExtractionAttempt::Primary(content) => {
                tracing::debug!(url = %url, words = content.word_count, "Extracted content");
                Ok(Some(content))
            }
            ExtractionAttempt::Fallback(content) => {
                tracing::debug!(url = %url, words = content.word_count, "Extracted content with fallback");
                Ok(Some(content))
            }
            ExtractionAttempt::Failed(reasons) => {
                tracing::debug!(url = %url, reasons = ?reasons, "No extractable content");
                Ok(None)
            }
        }
    }
}
