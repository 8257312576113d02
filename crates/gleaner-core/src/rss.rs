//! RSS/Atom/RDF/JSON Feed reading through `feed-rs`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use scraper::Html;
use url::Url;

use crate::dom::{collapse_whitespace, resolve_url};
use crate::error::AppError;
use crate::http::FetchRequest;
use crate::models::{ArticleSource, CandidateArticle, ExtractionMethod};
use crate::rate_limiter::{RateLimiter, RequestOptions};
use crate::robots::RobotsChecker;
use crate::traits::Fetcher;

const EXCERPT_CHARS: usize = 300;

/// One feed item, independent of the feed format.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub published: Option<DateTime<Utc>>,
    pub guid: Option<String>,
    /// Full HTML body when the feed carries one.
    pub content: Option<String>,
    /// Plain-text summary.
    pub summary: Option<String>,
    pub author: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub items: Vec<FeedItem>,
}

/// Parse feed bytes. Relative item links resolve against `base_url`.
pub fn parse_feed(data: &[u8], base_url: &str) -> Result<ParsedFeed, AppError> {
    let feed = feed_rs::parser::parse(data)
        .map_err(|e| AppError::ParseError(format!("Feed parse failed for {base_url}: {e}")))?;
    let base = Url::parse(base_url).ok();

    let items = feed
        .entries
        .iter()
        .filter_map(|entry| map_entry(entry, base.as_ref()))
        .collect();

    Ok(ParsedFeed {
        title: feed.title.map(|t| t.content.trim().to_string()).filter(|t| !t.is_empty()),
        items,
    })
}

fn map_entry(entry: &Entry, base: Option<&Url>) -> Option<FeedItem> {
    let raw_link = entry
        .links
        .iter()
        .find(|l| l.rel.as_deref() == Some("alternate"))
        .or_else(|| {
            entry
                .links
                .iter()
                .find(|l| l.rel.as_deref() != Some("enclosure"))
        })
        .map(|l| l.href.clone())
        .or_else(|| {
            (entry.id.starts_with("http://") || entry.id.starts_with("https://"))
                .then(|| entry.id.clone())
        })?;

    let link = match base {
        Some(base) => resolve_url(base, &raw_link)?.to_string(),
        None => Url::parse(&raw_link).ok()?.to_string(),
    };

    let summary = entry
        .summary
        .as_ref()
        .map(|s| strip_html(&s.content))
        .filter(|s| !s.is_empty());
    let content = entry
        .content
        .as_ref()
        .and_then(|c| c.body.clone())
        .filter(|b| !b.trim().is_empty());

    Some(FeedItem {
        title: entry
            .title
            .as_ref()
            .map(|t| collapse_whitespace(&t.content))
            .unwrap_or_default(),
        link,
        published: entry.published.or(entry.updated),
        guid: Some(entry.id.clone()).filter(|id| !id.is_empty()),
        content,
        summary,
        author: entry.authors.first().map(|p| p.name.clone()),
    })
}

fn strip_html(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    collapse_whitespace(&fragment.root_element().text().collect::<String>())
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", s[..idx].trim_end()),
        None => s.to_string(),
    }
}

/// Candidates for every item: 0.9 confidence with a date, 0.7 without.
pub fn items_to_candidates(feed: &ParsedFeed, feed_url: &str) -> Vec<CandidateArticle> {
    feed.items
        .iter()
        .map(|item| {
            let confidence = if item.published.is_some() { 0.9 } else { 0.7 };
            let title = if item.title.is_empty() {
                crate::dom::title_from_url(&item.link)
            } else {
                item.title.clone()
            };

            let mut candidate = CandidateArticle::new(
                &item.link,
                title,
                item.published,
                confidence,
                ArticleSource::Rss,
                ExtractionMethod::Rss,
            );
            candidate.content = item.content.clone();
            candidate.excerpt = item
                .summary
                .as_deref()
                .map(|s| truncate_chars(s, EXCERPT_CHARS));
            candidate.metadata.insert("feedUrl".into(), feed_url.into());
            if let Some(guid) = &item.guid {
                candidate.metadata.insert("feedGuid".into(), guid.clone().into());
            }
            if let Some(author) = &item.author {
                candidate.metadata.insert("author".into(), author.clone().into());
            }
            candidate
        })
        .collect()
}

/// Fetches feeds through the limiter after a robots.txt check.
#[derive(Clone)]
pub struct FeedReader<F: Fetcher> {
    fetcher: F,
    limiter: RateLimiter,
    robots: RobotsChecker<F>,
    timeout: Duration,
}

impl<F: Fetcher> FeedReader<F> {
    pub fn new(fetcher: F, limiter: RateLimiter, robots: RobotsChecker<F>, timeout: Duration) -> Self {
        Self {
            fetcher,
            limiter,
            robots,
            timeout,
        }
    }

    pub async fn read_feed(&self, url: &str) -> Result<ParsedFeed, AppError> {
        let verdict = self.robots.is_allowed(url).await?;
        if !verdict.allowed {
            return Err(AppError::RobotsBlocked(format!("{url}: {}", verdict.reason)));
        }

        let request = FetchRequest::get(url).with_timeout(self.timeout).with_accept(
            "application/rss+xml,application/atom+xml,application/rdf+xml,application/xml;q=0.9,*/*;q=0.5",
        );
        let response = self
            .limiter
            .fetch(&self.fetcher, request, RequestOptions::default())
            .await?;

        let feed = parse_feed(&response.body, &response.url)?;
        tracing::debug!(url = %url, items = feed.items.len(), "Parsed feed");
        Ok(feed)
    }

    /// Read `url` as a feed and map its items to candidates.
    pub async fn candidates(&self, url: &str) -> Result<(ParsedFeed, Vec<CandidateArticle>), AppError> {
        let feed = self.read_feed(url).await?;
        let candidates = items_to_candidates(&feed, url);
        Ok((feed, candidates))
    }
}
