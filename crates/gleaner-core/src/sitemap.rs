//! XML sitemap and sitemap-index parsing.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use url::Url;

use crate::dom::title_from_url;
use crate::error::AppError;
use crate::http::FetchRequest;
use crate::models::{ArticleSource, CandidateArticle, ExtractionMethod, NewsMeta, SitemapEntry};
use crate::rate_limiter::{RateLimiter, RequestOptions};
use crate::robots::{RobotsChecker, origin_for};
use crate::traits::Fetcher;

/// Paths probed for sitemaps after the ones listed in robots.txt.
pub const COMMON_SITEMAP_PATHS: &[&str] = &[
    "/sitemap.xml",
    "/sitemap_index.xml",
    "/sitemap-index.xml",
    "/news-sitemap.xml",
    "/sitemap-news.xml",
    "/post-sitemap.xml",
];

#[derive(Debug, Clone)]
pub struct SitemapConfig {
    pub timeout: Duration,
    pub probe_timeout: Duration,
    /// Responses above this size are rejected.
    pub max_bytes: u64,
    /// Children of an index that are actually followed.
    pub max_child_sitemaps: usize,
    /// Index nesting followed below the requested sitemap.
    pub max_depth: usize,
}

impl Default for SitemapConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            probe_timeout: Duration::from_secs(5),
            max_bytes: 50 * 1024 * 1024,
            max_child_sitemaps: 10,
            max_depth: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SitemapOptions {
    /// Drop entries whose `lastmod` is older than `recent_hours`.
    pub filter_recent: bool,
    pub recent_hours: i64,
    pub max_entries: usize,
    /// Parse `<news:news>` blocks into [`SitemapEntry::news`].
    pub include_news: bool,
}

impl Default for SitemapOptions {
    fn default() -> Self {
        Self {
            filter_recent: false,
            recent_hours: 48,
            max_entries: 1000,
            include_news: true,
        }
    }
}

/// A parsed sitemap document.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedSitemap {
    /// `<sitemapindex>`: child sitemap URLs.
    Index(Vec<String>),
    /// `<urlset>`: page entries.
    UrlSet(Vec<SitemapEntry>),
}

#[derive(Clone)]
pub struct SitemapParser<F: Fetcher> {
    fetcher: F,
    limiter: RateLimiter,
    robots: RobotsChecker<F>,
    config: SitemapConfig,
}

impl<F: Fetcher> SitemapParser<F> {
    pub fn new(fetcher: F, limiter: RateLimiter, robots: RobotsChecker<F>, config: SitemapConfig) -> Self {
        Self {
            fetcher,
            limiter,
            robots,
            config,
        }
    }

    /// Entries of the sitemap at `url`, following an index's children.
    ///
    /// An index's quota is split evenly across at most
    /// `max_child_sitemaps` children. Failing children are skipped.
    pub async fn parse_sitemap(
        &self,
        url: &str,
        options: &SitemapOptions,
    ) -> Result<Vec<SitemapEntry>, AppError> {
        let mut entries = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([(url.to_string(), options.max_entries, 0usize)]);
        let mut first = true;

        while let Some((sitemap_url, quota, depth)) = queue.pop_front() {
            if !visited.insert(sitemap_url.clone()) || quota == 0 {
                continue;
            }

            let parsed = match self.fetch_and_parse(&sitemap_url, options.include_news).await {
                Ok(parsed) => parsed,
                Err(e) if first => return Err(e),
                Err(e) => {
                    tracing::debug!(url = %sitemap_url, error = %e, "Skipping child sitemap");
                    continue;
                }
            };
            first = false;

            match parsed {
                ParsedSitemap::Index(children) => {
                    if depth >= self.config.max_depth {
                        tracing::debug!(url = %sitemap_url, "Sitemap index nesting too deep");
                        continue;
                    }
                    let take = children.len().min(self.config.max_child_sitemaps);
                    if take == 0 {
                        continue;
                    }
                    let share = (quota / take).max(1);
                    tracing::debug!(
                        url = %sitemap_url,
                        children = children.len(),
                        following = take,
                        share,
                        "Parsed sitemap index"
                    );
                    for child in children.into_iter().take(take) {
                        queue.push_back((child, share, depth + 1));
                    }
                }
                ParsedSitemap::UrlSet(mut found) => {
                    if options.filter_recent {
                        let cutoff = Utc::now() - chrono::Duration::hours(options.recent_hours);
                        found.retain(|e| is_recent(e, cutoff));
                    }
                    found.truncate(quota);
                    entries.extend(found);
                }
            }
        }

        let mut seen = HashSet::new();
        entries.retain(|e| seen.insert(e.url.clone()));
        entries.truncate(options.max_entries);
        Ok(entries)
    }

    /// Sitemap URLs for a domain: robots.txt first, then existing common paths.
    pub async fn discover_sitemaps(&self, domain: &str) -> Result<Vec<String>, AppError> {
        let origin = origin_for(domain)?;
        let mut found = self.robots.get_sitemaps(&origin).await?;

        for path in COMMON_SITEMAP_PATHS {
            let candidate = format!("{origin}{path}");
            if found.contains(&candidate) {
                continue;
            }
            let request = FetchRequest::head(&candidate).with_timeout(self.config.probe_timeout);
            if self
                .limiter
                .fetch(&self.fetcher, request, RequestOptions::no_retry())
                .await
                .is_ok()
            {
                found.push(candidate);
            }
        }

        tracing::debug!(domain = %domain, count = found.len(), "Discovered sitemaps");
        Ok(found)
    }

    /// Newest entries across all of a domain's sitemaps.
    pub async fn get_recent_entries(
        &self,
        domain: &str,
        hours_back: i64,
        max_entries: usize,
    ) -> Result<Vec<SitemapEntry>, AppError> {
        let options = SitemapOptions {
            filter_recent: true,
            recent_hours: hours_back,
            max_entries,
            include_news: true,
        };

        let mut entries = Vec::new();
        for sitemap in self.discover_sitemaps(domain).await? {
            match self.parse_sitemap(&sitemap, &options).await {
                Ok(found) => entries.extend(found),
                Err(e) => tracing::debug!(url = %sitemap, error = %e, "Sitemap failed"),
            }
            if entries.len() >= max_entries {
                break;
            }
        }

        let mut seen = HashSet::new();
        entries.retain(|e| seen.insert(e.url.clone()));
        entries.sort_by(|a, b| effective_date(b).cmp(&effective_date(a)));
        entries.truncate(max_entries);
        Ok(entries)
    }

    async fn fetch_and_parse(&self, url: &str, include_news: bool) -> Result<ParsedSitemap, AppError> {
        let verdict = self.robots.is_allowed(url).await?;
        if !verdict.allowed {
            return Err(AppError::RobotsBlocked(format!("{url}: {}", verdict.reason)));
        }

        let request = FetchRequest::get(url)
            .with_timeout(self.config.timeout)
            .with_max_bytes(self.config.max_bytes)
            .with_accept("application/xml,text/xml;q=0.9,*/*;q=0.5");
        let response = self
            .limiter
            .fetch(&self.fetcher, request, RequestOptions::default())
            .await?;

        let limit = self.config.max_bytes;
        if let Some(size) = response.content_length.filter(|&len| len > limit) {
            return Err(AppError::PayloadTooLarge { size, limit });
        }
        let size = response.body.len() as u64;
        if size > limit {
            return Err(AppError::PayloadTooLarge { size, limit });
        }

        let mut parsed = parse_sitemap_xml(&response.text())?;
        if let ParsedSitemap::UrlSet(entries) = &mut parsed
            && !include_news
        {
            for entry in entries.iter_mut() {
                entry.news = None;
            }
        }
        Ok(parsed)
    }
}

fn is_recent(entry: &SitemapEntry, cutoff: DateTime<Utc>) -> bool {
    effective_date(entry).is_none_or(|d| d >= cutoff)
}

fn effective_date(entry: &SitemapEntry) -> Option<DateTime<Utc>> {
    entry
        .lastmod
        .or_else(|| entry.news.as_ref().and_then(|n| n.publication_date))
}

/// Turn a sitemap entry into a candidate article.
pub fn entry_to_candidate(entry: &SitemapEntry) -> CandidateArticle {
    let news = entry.news.as_ref();
    let title = news
        .and_then(|n| n.title.clone())
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| title_from_url(&entry.url));
    let published_at = news.and_then(|n| n.publication_date).or(entry.lastmod);

    let confidence = match (news.is_some(), published_at.is_some()) {
        (true, _) => 0.85,
        (false, true) => 0.8,
        (false, false) => 0.6,
    };

    let mut candidate = CandidateArticle::new(
        &entry.url,
        title,
        published_at,
        confidence,
        ArticleSource::Sitemap,
        ExtractionMethod::Sitemap,
    );
    if let Some(priority) = entry.priority {
        candidate.metadata.insert("priority".into(), priority.into());
    }
    if let Some(name) = news.and_then(|n| n.publication_name.clone()) {
        candidate.metadata.insert("publication".into(), name.into());
    }
    if !entry.images.is_empty() {
        candidate.metadata.insert("images".into(), entry.images.clone().into());
    }
    candidate
}

/// Parse a sitemap document.
///
/// The root element decides the shape: `<sitemapindex>` is an index,
/// `<urlset>` a url set. Any other root is a parse error.
pub fn parse_sitemap_xml(xml: &str) -> Result<ParsedSitemap, AppError> {
    let is_index = xml.contains("<sitemapindex") || xml.contains(":sitemapindex");

    let mut reader = Reader::from_str(xml);
    let mut root: Option<String> = None;
    let mut path: Vec<String> = Vec::new();
    let mut text = String::new();

    let mut children: Vec<String> = Vec::new();
    let mut entries: Vec<SitemapEntry> = Vec::new();
    let mut entry: Option<SitemapEntry> = None;

    loop {
        let event = reader.read_event().map_err(|e| {
            AppError::ParseError(format!(
                "Sitemap XML error at byte {}: {e}",
                reader.buffer_position()
            ))
        })?;

        match event {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_ascii_lowercase();
                if root.is_none() {
                    root = Some(name.clone());
                }
                match name.as_str() {
                    "url" => entry = Some(SitemapEntry::default()),
                    "news" => {
                        if let Some(entry) = entry.as_mut() {
                            entry.news.get_or_insert_with(NewsMeta::default);
                        }
                    }
                    _ => {}
                }
                path.push(name);
                text.clear();
            }
            Event::Text(e) => text.push_str(&String::from_utf8_lossy(e.as_ref())),
            Event::CData(e) => text.push_str(&String::from_utf8_lossy(e.as_ref())),
            Event::GeneralRef(e) => {
                if let Some(resolved) = resolve_entity(&String::from_utf8_lossy(e.as_ref())) {
                    text.push_str(&resolved);
                }
            }
            Event::End(_) => {
                let Some(name) = path.pop() else { continue };
                let parent = path.last().map(String::as_str).unwrap_or_default();
                let value = text.trim().to_string();
                text.clear();

                match (name.as_str(), parent) {
                    ("url", _) => {
                        if let Some(done) = entry.take().filter(|e| !e.url.is_empty()) {
                            entries.push(done);
                        }
                    }
                    ("loc", "sitemap") if is_index => {
                        if !value.is_empty() {
                            children.push(value);
                        }
                    }
                    ("loc", "url") => set(&mut entry, |e| e.url = value),
                    ("loc", "image") => set(&mut entry, |e| {
                        if !value.is_empty() {
                            e.images.push(value)
                        }
                    }),
                    ("lastmod", "url") => set(&mut entry, |e| e.lastmod = parse_w3c_date(&value)),
                    ("changefreq", "url") => {
                        set(&mut entry, |e| e.changefreq = Some(value).filter(|v| !v.is_empty()))
                    }
                    ("priority", "url") => set(&mut entry, |e| e.priority = value.parse().ok()),
                    ("title", "news") => set(&mut entry, |e| {
                        if let Some(news) = e.news.as_mut() {
                            news.title = Some(value).filter(|v| !v.is_empty());
                        }
                    }),
                    ("publication_date", "news") => set(&mut entry, |e| {
                        if let Some(news) = e.news.as_mut() {
                            news.publication_date = parse_w3c_date(&value);
                        }
                    }),
                    ("name", "publication") => set(&mut entry, |e| {
                        if let Some(news) = e.news.as_mut() {
                            news.publication_name = Some(value).filter(|v| !v.is_empty());
                        }
                    }),
                    _ => {}
                }
            }
            Event::Empty(e) if root.is_none() => {
                root = Some(String::from_utf8_lossy(e.local_name().as_ref()).to_ascii_lowercase());
            }
            Event::Eof => break,
            _ => {}
        }
    }

    match root.as_deref() {
        Some("urlset") | Some("sitemapindex") => {}
        other => {
            return Err(AppError::ParseError(format!(
                "Not a sitemap document (root element <{}>)",
                other.unwrap_or("none")
            )));
        }
    }

    if is_index {
        Ok(ParsedSitemap::Index(children))
    } else {
        Ok(ParsedSitemap::UrlSet(entries))
    }
}

fn set(entry: &mut Option<SitemapEntry>, f: impl FnOnce(&mut SitemapEntry)) {
    if let Some(entry) = entry.as_mut() {
        f(entry);
    }
}

fn resolve_entity(name: &str) -> Option<String> {
    let resolved = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        _ => {
            let num = name.strip_prefix('#')?;
            let code = match num.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => num.parse().ok()?,
            };
            char::from_u32(code)?
        }
    };
    Some(resolved.to_string())
}

/// W3C datetime in any of its precisions (`2024-05-01`,
/// `2024-05-01T10:00+02:00`, full RFC 3339).
pub fn parse_w3c_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    let normalized = match raw.strip_suffix('Z') {
        Some(rest) => format!("{rest}+00:00"),
        None => raw.to_string(),
    };
    if let Ok(dt) = DateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M%:z") {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.and_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Host of `url`, for sitemap discovery from a page URL.
pub fn domain_of(url: &str) -> Result<String, AppError> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .ok_or_else(|| AppError::InvalidUrl(url.to_string()))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::robots::RobotsConfig;
    use crate::testutil::{MockFetcher, fast_limiter, response, sitemap_xml};

    fn parser(fetcher: MockFetcher) -> SitemapParser<MockFetcher> {
        let limiter = fast_limiter();
        let robots = RobotsChecker::new(fetcher.clone(), limiter.clone(), RobotsConfig::default());
        SitemapParser::new(fetcher, limiter, robots, SitemapConfig::default())
    }

    const NEWS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9"
        xmlns:news="http://www.google.com/schemas/sitemap-news/0.9"
        xmlns:image="http://www.google.com/schemas/sitemap-image/1.1">
  <url>
    <loc>https://example.com/a?x=1&amp;y=2</loc>
    <lastmod>2024-05-01</lastmod>
    <changefreq>daily</changefreq>
    <priority>0.8</priority>
    <image:image><image:loc>https://example.com/a.jpg</image:loc></image:image>
    <news:news>
      <news:publication><news:name>Example Times</news:name><news:language>en</news:language></news:publication>
      <news:publication_date>2024-05-01T08:30:00+00:00</news:publication_date>
      <news:title><![CDATA[Markets & more]]></news:title>
    </news:news>
  </url>
  <url><loc>https://example.com/b</loc></url>
</urlset>"#;

    #[test]
    fn parses_urlset_with_extensions() {
        let ParsedSitemap::UrlSet(entries) = parse_sitemap_xml(NEWS).unwrap() else {
            panic!("expected urlset");
        };
        assert_eq!(entries.len(), 2);

        let a = &entries[0];
        assert_eq!(a.url, "https://example.com/a?x=1&y=2");
        assert_eq!(a.lastmod, Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()));
        assert_eq!(a.changefreq.as_deref(), Some("daily"));
        assert_eq!(a.priority, Some(0.8));
        assert_eq!(a.images, vec!["https://example.com/a.jpg"]);
        let news = a.news.as_ref().unwrap();
        assert_eq!(news.title.as_deref(), Some("Markets & more"));
        assert_eq!(news.publication_name.as_deref(), Some("Example Times"));
        assert!(news.publication_date.is_some());

        assert_eq!(entries[1].url, "https://example.com/b");
        assert!(entries[1].lastmod.is_none());
    }

    #[test]
    fn parses_index() {
        let xml = r#"<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
            <sitemap><loc>https://example.com/s1.xml</loc><lastmod>2024-01-01</lastmod></sitemap>
            <sitemap><loc>https://example.com/s2.xml</loc></sitemap>
        </sitemapindex>"#;
        assert_eq!(
            parse_sitemap_xml(xml).unwrap(),
            ParsedSitemap::Index(vec![
                "https://example.com/s1.xml".into(),
                "https://example.com/s2.xml".into()
            ])
        );
    }

    #[test]
    fn html_is_not_a_sitemap() {
        let result = parse_sitemap_xml("<html><body><p>hello</p></body></html>");
        assert!(matches!(result, Err(AppError::ParseError(_))));
    }

    #[test]
    fn malformed_xml_is_a_parse_error() {
        let result = parse_sitemap_xml("<urlset><url><loc>x</url></urlset>");
        assert!(matches!(result, Err(AppError::ParseError(_))));
    }

    #[test]
    fn w3c_date_precisions() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        assert_eq!(parse_w3c_date("2024-05-01T10:00:00Z"), Some(expected));
        assert_eq!(parse_w3c_date("2024-05-01T12:00+02:00"), Some(expected));
        assert_eq!(parse_w3c_date("2024-05-01T10:00Z"), Some(expected));
        assert_eq!(parse_w3c_date("2024-05-01T10:00:00"), Some(expected));
        assert!(parse_w3c_date("yesterday").is_none());
    }

    #[test]
    fn candidates_prefer_news_metadata() {
        let ParsedSitemap::UrlSet(entries) = parse_sitemap_xml(NEWS).unwrap() else {
            unreachable!()
        };
        let a = entry_to_candidate(&entries[0]);
        assert_eq!(a.title, "Markets & more");
        assert_eq!(a.confidence, 0.85);
        assert_eq!(a.source, ArticleSource::Sitemap);
        assert_eq!(a.metadata["publication"], "Example Times");

        let b = entry_to_candidate(&entries[1]);
        assert_eq!(b.title, "B");
        assert_eq!(b.confidence, 0.6);
    }

    #[tokio::test]
    async fn filter_recent_keeps_undated_entries() {
        let recent = (Utc::now() - chrono::Duration::hours(2)).to_rfc3339();
        let xml = sitemap_xml(&[
            ("https://example.com/new", Some(recent.as_str())),
            ("https://example.com/old", Some("2001-01-01")),
            ("https://example.com/undated", None),
        ]);
        let fetcher = MockFetcher::new().route_xml("https://example.com/sitemap.xml", &xml);

        let entries = parser(fetcher)
            .parse_sitemap(
                "https://example.com/sitemap.xml",
                &SitemapOptions {
                    filter_recent: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let urls: Vec<_> = entries.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(urls, vec!["https://example.com/new", "https://example.com/undated"]);
    }

    #[tokio::test]
    async fn index_splits_quota_across_children() {
        let children: String = (0..12)
            .map(|i| format!("<sitemap><loc>https://example.com/s{i}.xml</loc></sitemap>"))
            .collect();
        let index = format!("<sitemapindex>{children}</sitemapindex>");

        let mut fetcher = MockFetcher::new().route_xml("https://example.com/index.xml", &index);
        for i in 0..12 {
            let entries: Vec<String> = (0..10).map(|j| format!("https://example.com/{i}/{j}")).collect();
            let refs: Vec<(&str, Option<&str>)> = entries.iter().map(|u| (u.as_str(), None)).collect();
            fetcher = fetcher.route_xml(&format!("https://example.com/s{i}.xml"), &sitemap_xml(&refs));
        }

        let entries = parser(fetcher.clone())
            .parse_sitemap(
                "https://example.com/index.xml",
                &SitemapOptions {
                    max_entries: 20,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // 10 children followed, 2 entries each.
        assert_eq!(entries.len(), 20);
        assert_eq!(fetcher.calls_to("https://example.com/s9.xml"), 1);
        assert_eq!(fetcher.calls_to("https://example.com/s10.xml"), 0);
    }

    #[tokio::test]
    async fn oversized_responses_are_rejected() {
        let mut big = response("https://example.com/sitemap.xml", 200, Some("application/xml"), "<urlset/>");
        big.content_length = Some(60 * 1024 * 1024);
        let fetcher = MockFetcher::new().route(
            crate::http::Method::Get,
            "https://example.com/sitemap.xml",
            vec![Ok(big)],
        );

        let result = parser(fetcher)
            .parse_sitemap("https://example.com/sitemap.xml", &SitemapOptions::default())
            .await;
        assert!(matches!(result, Err(AppError::PayloadTooLarge { .. })));
    }

    #[tokio::test]
    async fn missing_sitemap_is_an_error() {
        let result = parser(MockFetcher::new())
            .parse_sitemap("https://example.com/sitemap.xml", &SitemapOptions::default())
            .await;
        assert_eq!(result.unwrap_err().status(), Some(404));
    }

    #[tokio::test]
    async fn discovery_lists_robots_sitemaps_first() {
        let fetcher = MockFetcher::new()
            .route_html(
                "https://example.com/robots.txt",
                "Sitemap: https://example.com/custom.xml\n",
            )
            .route_head("https://example.com/sitemap.xml", 200, "application/xml");

        let found = parser(fetcher).discover_sitemaps("example.com").await.unwrap();
        assert_eq!(
            found,
            vec!["https://example.com/custom.xml", "https://example.com/sitemap.xml"]
        );
    }

    #[tokio::test]
    async fn recent_entries_sorted_newest_first() {
        let newer = (Utc::now() - chrono::Duration::hours(1)).to_rfc3339();
        let older = (Utc::now() - chrono::Duration::hours(5)).to_rfc3339();
        let xml = sitemap_xml(&[
            ("https://example.com/older", Some(older.as_str())),
            ("https://example.com/newer", Some(newer.as_str())),
        ]);
        let fetcher = MockFetcher::new().route_xml("https://example.com/sitemap.xml", &xml);

        let entries = parser(fetcher)
            .get_recent_entries("example.com", 24, 10)
            .await
            .unwrap();
        assert_eq!(entries[0].url, "https://example.com/newer");
        assert_eq!(entries.len(), 2);
    }
}
