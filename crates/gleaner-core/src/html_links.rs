//! Article link harvesting from HTML listing pages.
//!
//! Two extractors run over every page and are merged by URL:
//! CSS-selector harvesting with per-link confidence heuristics, and JSON-LD
//! `Article` blocks at a flat 0.9. An optional external search provider is
//! consulted as a last resort.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::{ElementRef, Html};
use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::dom::{collapse_whitespace, element_text, resolve_url, same_site, selector, title_from_url};
use crate::error::AppError;
use crate::http::FetchRequest;
use crate::models::{ArticleSource, CandidateArticle, ExtractionMethod};
use crate::quality::is_article_schema_type;
use crate::rate_limiter::{RateLimiter, RequestOptions};
use crate::robots::RobotsChecker;
use crate::sitemap::parse_w3c_date;
use crate::traits::{Fetcher, SearchProvider};

/// Selectors tried in order; every match is a candidate link.
pub const DEFAULT_LINK_SELECTORS: &[&str] = &[
    "article a[href]",
    "h1 a[href]",
    "h2 a[href]",
    "h3 a[href]",
    ".post a[href]",
    ".entry-title a[href]",
    ".article-title a[href]",
    ".headline a[href]",
    ".story a[href]",
    ".card a[href]",
    "[class*='post'] a[href]",
    "[class*='article'] a[href]",
    "a[rel='bookmark']",
];

/// URL shapes typical of article permalinks.
pub const DEFAULT_ARTICLE_PATTERNS: &[&str] = &[
    r"/\d{4}/\d{1,2}/",
    r"/(?:article|articles|post|posts|story|stories|news|blog)/",
    r"/[a-z0-9]+(?:-[a-z0-9]+){2,}/?(?:\.html?)?$",
];

const SKIP_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".svg", ".webp", ".pdf", ".zip", ".mp3", ".mp4", ".css", ".js",
];

const NEXT_LABELS: &[&str] = &[
    "next",
    "next page",
    "next »",
    "next ›",
    "older",
    "older posts",
    "older entries",
    "more",
    "load more",
    "»",
    "›",
];

static CONTAINER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:post|article|entry|story|card|teaser|item)")
        .unwrap_or_else(|e| panic!("invalid container regex: {e}"))
});

#[derive(Debug, Clone)]
pub struct LinkScraperConfig {
    pub selectors: Vec<String>,
    /// Regexes; when non-empty a link must match at least one.
    pub include_patterns: Vec<String>,
    /// Regexes; a link matching any is dropped.
    pub exclude_patterns: Vec<String>,
    /// Hosts links may point to. Empty means the page's own site.
    pub allowed_domains: Vec<String>,
    /// Regexes that raise a link's confidence.
    pub article_patterns: Vec<String>,
    pub max_links: usize,
    pub timeout: Duration,
    /// Consult the search provider when the page yields nothing.
    pub ai_fallback: bool,
}

impl Default for LinkScraperConfig {
    fn default() -> Self {
        Self {
            selectors: DEFAULT_LINK_SELECTORS.iter().map(|s| s.to_string()).collect(),
            include_patterns: vec![],
            exclude_patterns: vec![],
            allowed_domains: vec![],
            article_patterns: DEFAULT_ARTICLE_PATTERNS.iter().map(|s| s.to_string()).collect(),
            max_links: 100,
            timeout: Duration::from_secs(10),
            ai_fallback: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkSource {
    Selector,
    JsonLd,
    AiSearch,
}

/// A link that looks like it leads to an article.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleLink {
    pub url: String,
    pub title: String,
    pub published_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub confidence: f64,
    pub source: LinkSource,
}

impl ArticleLink {
    pub fn to_candidate(&self) -> CandidateArticle {
        let mut candidate = CandidateArticle::new(
            &self.url,
            &self.title,
            self.published_at,
            self.confidence,
            ArticleSource::Html,
            ExtractionMethod::HtmlLinks,
        );
        candidate.excerpt = self.description.clone();
        let source = match self.source {
            LinkSource::Selector => "selector",
            LinkSource::JsonLd => "json-ld",
            LinkSource::AiSearch => "ai-search",
        };
        candidate.metadata.insert("linkSource".into(), source.into());
        candidate
    }
}

struct LinkFilters {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
    article: Vec<Regex>,
    domains: Vec<String>,
}

impl LinkFilters {
    fn new(config: &LinkScraperConfig, base: &Url) -> Result<Self, AppError> {
        let compile = |patterns: &[String]| -> Result<Vec<Regex>, AppError> {
            patterns
                .iter()
                .map(|p| {
                    Regex::new(p).map_err(|e| AppError::ConfigError(format!("Invalid link pattern '{p}': {e}")))
                })
                .collect()
        };
        let domains = if config.allowed_domains.is_empty() {
            base.host_str().map(|h| vec![h.to_string()]).unwrap_or_default()
        } else {
            config.allowed_domains.clone()
        };
        Ok(Self {
            include: compile(&config.include_patterns)?,
            exclude: compile(&config.exclude_patterns)?,
            article: compile(&config.article_patterns)?,
            domains,
        })
    }

    fn accepts(&self, url: &Url, page: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        if !self.domains.iter().any(|d| same_site(host, d)) {
            return false;
        }
        let path = url.path().to_ascii_lowercase();
        if path == "/" || SKIP_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
            return false;
        }
        if url.as_str().trim_end_matches('/') == page.as_str().trim_end_matches('/') {
            return false;
        }
        let s = url.as_str();
        if !self.include.is_empty() && !self.include.iter().any(|re| re.is_match(s)) {
            return false;
        }
        !self.exclude.iter().any(|re| re.is_match(s))
    }

    fn looks_like_article(&self, url: &Url) -> bool {
        let path = url.path().to_ascii_lowercase();
        self.article.iter().any(|re| re.is_match(&path))
    }
}

/// Candidate article links on one page, highest confidence first.
pub fn extract_links_from_html(
    html: &str,
    base_url: &Url,
    config: &LinkScraperConfig,
) -> Result<Vec<ArticleLink>, AppError> {
    let filters = LinkFilters::new(config, base_url)?;
    let doc = Html::parse_document(html);

    let mut merged: Vec<ArticleLink> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    let found = selector_links(&doc, base_url, config, &filters)
        .into_iter()
        .chain(json_ld_links(&doc, base_url, &filters));
    for link in found {
        match index.get(&link.url) {
            Some(&i) => merge_into(&mut merged[i], link),
            None => {
                index.insert(link.url.clone(), merged.len());
                merged.push(link);
            }
        }
    }

    merged.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    merged.truncate(config.max_links);
    Ok(merged)
}

fn merge_into(existing: &mut ArticleLink, other: ArticleLink) {
    if other.confidence > existing.confidence {
        existing.confidence = other.confidence;
        existing.source = other.source;
        if !other.title.is_empty() {
            existing.title = other.title;
        }
    }
    if existing.published_at.is_none() {
        existing.published_at = other.published_at;
    }
    if existing.description.is_none() {
        existing.description = other.description;
    }
}

fn selector_links(doc: &Html, base: &Url, config: &LinkScraperConfig, filters: &LinkFilters) -> Vec<ArticleLink> {
    let mut links = Vec::new();
    let mut seen = HashSet::new();
    let time_sel = selector("time");
    let p_sel = selector("p");

    for css in &config.selectors {
        let Ok(sel) = scraper::Selector::parse(css) else {
            tracing::warn!(selector = %css, "Skipping invalid link selector");
            continue;
        };
        for anchor in doc.select(&sel) {
            let Some(url) = anchor.value().attr("href").and_then(|h| resolve_url(base, h)) else {
                continue;
            };
            if !filters.accepts(&url, base) || !seen.insert(url.to_string()) {
                continue;
            }

            let title = Some(element_text(&anchor))
                .filter(|t| !t.is_empty())
                .or_else(|| anchor.value().attr("title").map(collapse_whitespace))
                .unwrap_or_default();
            if title.chars().count() < 3 {
                continue;
            }

            let container = find_container(&anchor);
            let published_at = container.and_then(|c| {
                c.select(&time_sel).find_map(|t| {
                    t.value()
                        .attr("datetime")
                        .and_then(parse_w3c_date)
                        .or_else(|| parse_w3c_date(&element_text(&t)))
                })
            });
            let description = container.and_then(|c| {
                c.select(&p_sel)
                    .map(|p| element_text(&p))
                    .find(|t| t.len() >= 20 && *t != title)
            });

            let confidence = score_link(
                &title,
                published_at.is_some(),
                description.is_some(),
                filters.looks_like_article(&url),
            );
            links.push(ArticleLink {
                url: url.to_string(),
                title,
                published_at,
                description,
                confidence,
                source: LinkSource::Selector,
            });
        }
    }
    links
}

/// Nearest article-like ancestor within a few levels.
fn find_container<'a>(anchor: &ElementRef<'a>) -> Option<ElementRef<'a>> {
    anchor.ancestors().filter_map(ElementRef::wrap).take(4).find(|el| {
        let v = el.value();
        v.name() == "article"
            || v.name() == "li"
            || v.attr("class").is_some_and(|c| CONTAINER.is_match(c))
    })
}

/// Selector-link confidence.
pub fn score_link(title: &str, has_date: bool, has_description: bool, url_matches: bool) -> f64 {
    let mut score: f64 = 0.5;
    if has_date {
        score += 0.15;
    }
    if has_description {
        score += 0.1;
    }
    if url_matches {
        score += 0.15;
    }
    match title.chars().count() {
        20..=120 => score += 0.1,
        0..=9 => score -= 0.2,
        _ => {}
    }
    score.clamp(0.0, 1.0)
}

fn json_ld_links(doc: &Html, base: &Url, filters: &LinkFilters) -> Vec<ArticleLink> {
    let scripts = selector(r#"script[type="application/ld+json"]"#);
    let mut links = Vec::new();
    for script in doc.select(&scripts) {
        let raw: String = script.text().collect();
        match serde_json::from_str::<Value>(raw.trim()) {
            Ok(value) => collect_json_ld(&value, base, filters, &mut links),
            Err(e) => tracing::debug!(error = %e, "Skipping malformed JSON-LD block"),
        }
    }
    links
}

fn collect_json_ld(value: &Value, base: &Url, filters: &LinkFilters, out: &mut Vec<ArticleLink>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_json_ld(item, base, filters, out);
            }
        }
        Value::Object(obj) => {
            if is_article_schema_type(obj.get("@type")) {
                let url = obj
                    .get("url")
                    .and_then(Value::as_str)
                    .or_else(|| match obj.get("mainEntityOfPage") {
                        Some(Value::String(s)) => Some(s.as_str()),
                        Some(Value::Object(o)) => o.get("@id").and_then(Value::as_str),
                        _ => None,
                    })
                    .and_then(|u| resolve_url(base, u));

                if let Some(url) = url.filter(|u| filters.accepts(u, base)) {
                    let title = obj
                        .get("headline")
                        .or_else(|| obj.get("name"))
                        .and_then(Value::as_str)
                        .map(collapse_whitespace)
                        .unwrap_or_else(|| title_from_url(url.as_str()));
                    out.push(ArticleLink {
                        url: url.to_string(),
                        title,
                        published_at: obj
                            .get("datePublished")
                            .and_then(Value::as_str)
                            .and_then(parse_w3c_date),
                        description: obj
                            .get("description")
                            .and_then(Value::as_str)
                            .map(collapse_whitespace),
                        confidence: 0.9,
                        source: LinkSource::JsonLd,
                    });
                }
            }
            for key in ["@graph", "itemListElement", "item", "hasPart"] {
                if let Some(nested) = obj.get(key) {
                    collect_json_ld(nested, base, filters, out);
                }
            }
        }
        _ => {}
    }
}

/// Next listing page: `rel="next"` first, then "next"/"older" text links.
pub fn find_next_page(html: &str, base: &Url) -> Option<Url> {
    let doc = Html::parse_document(html);
    let same_host = |u: &Url| u.host_str() == base.host_str();

    let rel_next = selector(r#"link[rel~="next"][href], a[rel~="next"][href]"#);
    if let Some(url) = doc
        .select(&rel_next)
        .filter_map(|el| el.value().attr("href").and_then(|h| resolve_url(base, h)))
        .find(|u| same_host(u))
    {
        return Some(url);
    }

    let anchors = selector("a[href]");
    doc.select(&anchors)
        .filter(|a| {
            let text = element_text(a).to_lowercase();
            let class = a.value().attr("class").unwrap_or_default().to_lowercase();
            NEXT_LABELS.contains(&text.as_str())
                || class.split_whitespace().any(|c| c == "next" || c.ends_with("-next"))
        })
        .filter_map(|a| a.value().attr("href").and_then(|h| resolve_url(base, h)))
        .find(|u| same_host(u) && u != base)
}

/// Fetches listing pages and extracts article links.
#[derive(Clone)]
pub struct HtmlLinkScraper<F: Fetcher, S: SearchProvider> {
    fetcher: F,
    limiter: RateLimiter,
    robots: RobotsChecker<F>,
    search: S,
}

impl<F: Fetcher, S: SearchProvider> HtmlLinkScraper<F, S> {
    pub fn new(fetcher: F, limiter: RateLimiter, robots: RobotsChecker<F>, search: S) -> Self {
        Self {
            fetcher,
            limiter,
            robots,
            search,
        }
    }

    /// Links on a single page.
    pub async fn extract_article_links(
        &self,
        url: &str,
        config: &LinkScraperConfig,
    ) -> Result<Vec<ArticleLink>, AppError> {
        self.extract_from_multiple_pages(url, config, 1).await
    }

    /// Follow pagination for up to `max_pages` pages.
    ///
    /// A failure on the first page falls through to the AI fallback (when
    /// enabled) or is returned; later failures just end pagination.
    pub async fn extract_from_multiple_pages(
        &self,
        url: &str,
        config: &LinkScraperConfig,
        max_pages: usize,
    ) -> Result<Vec<ArticleLink>, AppError> {
        let start = Url::parse(url).map_err(|e| AppError::InvalidUrl(format!("{url}: {e}")))?;

        let mut links: Vec<ArticleLink> = Vec::new();
        let mut seen_links = HashSet::new();
        let mut visited = HashSet::new();
        let mut next = Some(start.clone());
        let mut first_error = None;

        while let Some(page) = next.take() {
            if visited.len() >= max_pages.max(1) || !visited.insert(page.to_string()) {
                break;
            }

            let (base, html) = match self.fetch_page(page.as_str(), config.timeout).await {
                Ok((final_url, html)) => (Url::parse(&final_url).unwrap_or_else(|_| page.clone()), html),
                Err(e) if visited.len() == 1 => {
                    tracing::debug!(url = %page, error = %e, "Listing page unavailable");
                    first_error = Some(e);
                    break;
                }
                Err(e) => {
                    tracing::debug!(url = %page, error = %e, "Stopping pagination");
                    break;
                }
            };

            let found = extract_links_from_html(&html, &base, config)?;
            tracing::debug!(url = %page, count = found.len(), "Extracted links from page");
            for link in found {
                if seen_links.insert(link.url.clone()) {
                    links.push(link);
                }
            }
            next = find_next_page(&html, &base);
        }

        if links.is_empty() && config.ai_fallback {
            match self.search_fallback(&start).await {
                Ok(found) if !found.is_empty() => return Ok(found),
                Ok(_) => {}
                Err(e) => tracing::warn!(url = %url, error = %e, "AI search fallback failed"),
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        links.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        links.truncate(config.max_links);
        Ok(links)
    }

    async fn fetch_page(&self, url: &str, timeout: Duration) -> Result<(String, String), AppError> {
        let verdict = self.robots.is_allowed(url).await?;
        if !verdict.allowed {
            return Err(AppError::RobotsBlocked(format!("{url}: {}", verdict.reason)));
        }
        let request = FetchRequest::get(url)
            .with_timeout(timeout)
            .with_accept("text/html,application/xhtml+xml");
        let response = self
            .limiter
            .fetch(&self.fetcher, request, RequestOptions::default())
            .await?;
        let body = response.text().into_owned();
        Ok((response.url, body))
    }

    /// Citation URLs on the target's site, at reduced confidence.
    async fn search_fallback(&self, start: &Url) -> Result<Vec<ArticleLink>, AppError> {
        let Some(host) = start.host_str() else {
            return Ok(vec![]);
        };
        let domain = host.trim_start_matches("www.").to_ascii_lowercase();
        tracing::info!(domain = %domain, "Falling back to AI search");

        let urls = self.search.search_articles(&domain, start.as_str()).await?;
        let mut seen = HashSet::new();
        let links: Vec<ArticleLink> = urls
            .iter()
            .filter_map(|u| Url::parse(u).ok())
            .filter(|u| {
                u.host_str().is_some_and(|h| {
                    let h = h.to_ascii_lowercase();
                    same_site(&h, &domain) || h.contains(&domain)
                })
            })
            .filter(|u| seen.insert(u.to_string()))
            .map(|u| ArticleLink {
                title: title_from_url(u.as_str()),
                url: u.to_string(),
                published_at: None,
                description: None,
                confidence: 0.7,
                source: LinkSource::AiSearch,
            })
            .collect();

        tracing::info!(domain = %domain, count = links.len(), "AI search returned links");
        Ok(links)
    }
}
