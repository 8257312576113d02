//! Source-type detection and candidate discovery for one URL.
//!
//! # Auto-detection order
//!
//! 1. the URL itself as a feed
//! 2. the best feed found by [`FeedDiscovery`]
//! 3. the URL itself as a sitemap
//! 4. the first sitemap found for the host
//! 5. HTML link scraping over up to `html_max_pages` listing pages
//!
//! The first strategy that yields at least one article wins. Failures are
//! recorded in [`SourceResult::errors`] and the chain moves on. An explicit
//! [`SourceType`] runs only its own strategy.

use std::collections::HashSet;
use std::time::Instant;

use url::Url;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry};
use crate::config::ScraperConfig;
use crate::discovery::{DiscoveryConfig, FeedDiscovery};
use crate::error::AppError;
use crate::html_links::{HtmlLinkScraper, LinkScraperConfig};
use crate::models::{CandidateArticle, SourceInfo, SourceResult, SourceStats, SourceType};
use crate::quality::matches_path_pattern;
use crate::rate_limiter::RateLimiter;
use crate::robots::RobotsChecker;
use crate::rss::FeedReader;
use crate::sitemap::{SitemapConfig, SitemapOptions, SitemapParser, domain_of, entry_to_candidate};
use crate::traits::{Fetcher, SearchProvider};

pub use crate::models::create_guid;

/// Per-call orchestration options.
#[derive(Clone)]
pub struct SourceOptions {
    pub source_type: SourceType,
    /// When non-empty, only URLs matching one of these survive.
    pub allow_paths: Vec<String>,
    /// URLs matching any of these are dropped. Checked before `allow_paths`.
    pub deny_paths: Vec<String>,
    /// Breaker to guard this call with instead of the per-host one.
    pub circuit_breaker: Option<CircuitBreaker>,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            source_type: SourceType::Auto,
            allow_paths: vec![],
            deny_paths: vec![],
            circuit_breaker: None,
        }
    }
}

impl std::fmt::Debug for SourceOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceOptions")
            .field("source_type", &self.source_type)
            .field("allow_paths", &self.allow_paths)
            .field("deny_paths", &self.deny_paths)
            .field("circuit_breaker", &self.circuit_breaker.as_ref().map(|b| b.name()))
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    Rss,
    DiscoveredRss,
    Sitemap,
    DiscoveredSitemap,
    Html,
}

impl Strategy {
    fn name(self) -> &'static str {
        match self {
            Strategy::Rss => "rss",
            Strategy::DiscoveredRss => "discovered-rss",
            Strategy::Sitemap => "sitemap",
            Strategy::DiscoveredSitemap => "discovered-sitemap",
            Strategy::Html => "html",
        }
    }

    fn plan(source_type: SourceType) -> &'static [Strategy] {
        match source_type {
            SourceType::Auto => &[
                Strategy::Rss,
                Strategy::DiscoveredRss,
                Strategy::Sitemap,
                Strategy::DiscoveredSitemap,
                Strategy::Html,
            ],
            SourceType::Rss => &[Strategy::Rss],
            SourceType::Sitemap => &[Strategy::Sitemap],
            SourceType::Html => &[Strategy::Html],
        }
    }
}

struct Hit {
    articles: Vec<CandidateArticle>,
    info: SourceInfo,
}

/// Runs the discovery strategies for a source URL.
#[derive(Clone)]
pub struct SourceOrchestrator<F: Fetcher, S: SearchProvider> {
    feeds: FeedReader<F>,
    discovery: FeedDiscovery<F>,
    sitemaps: SitemapParser<F>,
    html: HtmlLinkScraper<F, S>,
    breakers: CircuitBreakerRegistry,
    link_config: LinkScraperConfig,
    max_articles: usize,
    html_max_pages: usize,
}

impl<F: Fetcher, S: SearchProvider> SourceOrchestrator<F, S> {
    pub fn new(
        fetcher: F,
        limiter: RateLimiter,
        robots: RobotsChecker<F>,
        search: S,
        config: &ScraperConfig,
    ) -> Self {
        let discovery = DiscoveryConfig {
            probe_timeout: config.probe_timeout,
            page_timeout: config.html_timeout,
            ..Default::default()
        };
        let sitemap = SitemapConfig {
            timeout: config.sitemap_timeout,
            probe_timeout: config.probe_timeout,
            max_bytes: config.sitemap_max_bytes,
            ..Default::default()
        };
        let link_config = LinkScraperConfig {
            timeout: config.html_timeout,
            ai_fallback: config.ai_fallback_enabled(),
            ..Default::default()
        };

        Self {
            feeds: FeedReader::new(fetcher.clone(), limiter.clone(), robots.clone(), config.feed_timeout),
            discovery: FeedDiscovery::new(fetcher.clone(), limiter.clone(), robots.clone(), discovery),
            sitemaps: SitemapParser::new(fetcher.clone(), limiter.clone(), robots.clone(), sitemap),
            html: HtmlLinkScraper::new(fetcher, limiter, robots, search),
            breakers: CircuitBreakerRegistry::new(config.circuit_breaker.clone(), config.robots_ttl),
            link_config,
            max_articles: config.max_articles_per_source,
            html_max_pages: config.html_max_pages,
        }
    }

    /// Breakers used when [`SourceOptions::circuit_breaker`] is unset.
    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    /// Discover candidate articles for `url`.
    ///
    /// Strategy failures degrade to an empty result with `errors`. Only a
    /// malformed URL, cancellation, and an open circuit are returned as
    /// `Err`.
    pub async fn process_source(&self, url: &str, options: &SourceOptions) -> Result<SourceResult, AppError> {
        let started = Instant::now();
        let parsed = Url::parse(url).map_err(|e| AppError::InvalidUrl(format!("{url}: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| AppError::InvalidUrl(format!("{url}: missing host")))?
            .to_string();

        let breaker = options
            .circuit_breaker
            .clone()
            .unwrap_or_else(|| self.breakers.for_host(&host));

        let mut errors = Vec::new();
        let outcome = breaker
            .call(|| self.run_strategies(url, options.source_type, &mut errors))
            .await;

        let hit = match outcome {
            Ok(hit) => hit,
            Err(e) if e.is_aborted() || matches!(e, AppError::CircuitOpen { .. }) => {
                tracing::warn!(url = %url, error = %e, "Source processing stopped");
                return Err(e);
            }
            Err(e) => {
                if errors.is_empty() {
                    errors.push(e.to_string());
                }
                None
            }
        };

        let (articles, info, stats) = match hit {
            Some(Hit { articles, info }) => {
                let (articles, stats) = finalize(articles, options, self.max_articles);
                (articles, info, stats)
            }
            None => {
                errors.push(AppError::NoContentFound(url.to_string()).to_string());
                let info = SourceInfo {
                    detected_type: (options.source_type != SourceType::Auto).then_some(options.source_type),
                    resolved_url: None,
                    strategy: None,
                    title: None,
                };
                (Vec::new(), info, SourceStats::default())
            }
        };

        let processing_time_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            url = %url,
            strategy = info.strategy.as_deref().unwrap_or("none"),
            articles = articles.len(),
            errors = errors.len(),
            processing_time_ms,
            "Processed source"
        );

        Ok(SourceResult {
            articles,
            source_info: info,
            processing_time_ms,
            errors,
            extraction_stats: stats,
        })
    }

    /// First strategy with results. `Err` only when nothing was found and
    /// a failure pointed at the host itself.
    async fn run_strategies(
        &self,
        url: &str,
        source_type: SourceType,
        errors: &mut Vec<String>,
    ) -> Result<Option<Hit>, AppError> {
        let mut host_failure = None;

        for &strategy in Strategy::plan(source_type) {
            match self.attempt(strategy, url).await {
                Ok(Some(hit)) if !hit.articles.is_empty() => {
                    tracing::debug!(
                        url = %url,
                        strategy = strategy.name(),
                        count = hit.articles.len(),
                        "Strategy succeeded"
                    );
                    return Ok(Some(hit));
                }
                Ok(_) => {
                    tracing::debug!(url = %url, strategy = strategy.name(), "Strategy found nothing");
                }
                Err(e) if e.is_aborted() => return Err(e),
                Err(e) => {
                    tracing::debug!(url = %url, strategy = strategy.name(), error = %e, "Strategy failed");
                    errors.push(format!("{}: {e}", strategy.name()));
                    if e.should_trip_circuit() && host_failure.is_none() {
                        host_failure = Some(e);
                    }
                }
            }
        }

        match host_failure {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    /// `Ok(None)` when a discovery step found nothing to try.
    async fn attempt(&self, strategy: Strategy, url: &str) -> Result<Option<Hit>, AppError> {
        match strategy {
            Strategy::Rss => self.from_feed(url, strategy).await.map(Some),
            Strategy::DiscoveredRss => {
                let feeds = self.discovery.discover_feeds(url).await?;
                match feeds.into_iter().find(|f| f.url != url) {
                    Some(feed) => self.from_feed(&feed.url, strategy).await.map(Some),
                    None => Ok(None),
                }
            }
            Strategy::Sitemap => self.from_sitemap(url, strategy).await.map(Some),
            Strategy::DiscoveredSitemap => {
                let sitemaps = self.sitemaps.discover_sitemaps(&domain_of(url)?).await?;
                match sitemaps.into_iter().find(|s| s != url) {
                    Some(sitemap) => self.from_sitemap(&sitemap, strategy).await.map(Some),
                    None => Ok(None),
                }
            }
            Strategy::Html => {
                let links = self
                    .html
                    .extract_from_multiple_pages(url, &self.link_config, self.html_max_pages)
                    .await?;
                Ok(Some(Hit {
                    articles: links.iter().map(|l| l.to_candidate()).collect(),
                    info: SourceInfo {
                        detected_type: Some(SourceType::Html),
                        resolved_url: Some(url.to_string()),
                        strategy: Some(strategy.name().to_string()),
                        title: None,
                    },
                }))
            }
        }
    }

    async fn from_feed(&self, feed_url: &str, strategy: Strategy) -> Result<Hit, AppError> {
        let (feed, articles) = self.feeds.candidates(feed_url).await?;
        Ok(Hit {
            articles,
            info: SourceInfo {
                detected_type: Some(SourceType::Rss),
                resolved_url: Some(feed_url.to_string()),
                strategy: Some(strategy.name().to_string()),
                title: feed.title,
            },
        })
    }

    async fn from_sitemap(&self, sitemap_url: &str, strategy: Strategy) -> Result<Hit, AppError> {
        let options = SitemapOptions {
            max_entries: self.max_articles,
            ..Default::default()
        };
        let entries = self.sitemaps.parse_sitemap(sitemap_url, &options).await?;
        Ok(Hit {
            articles: entries.iter().map(entry_to_candidate).collect(),
            info: SourceInfo {
                detected_type: Some(SourceType::Sitemap),
                resolved_url: Some(sitemap_url.to_string()),
                strategy: Some(strategy.name().to_string()),
                title: None,
            },
        })
    }
}

/// Drop denied URLs, then, when an allowlist exists, everything it does
/// not match.
pub fn apply_path_filters<A: AsRef<str>, D: AsRef<str>>(
    articles: Vec<CandidateArticle>,
    allow_paths: &[A],
    deny_paths: &[D],
) -> Vec<CandidateArticle> {
    articles
        .into_iter()
        .filter(|a| !matches_path_pattern(&a.url, deny_paths))
        .filter(|a| allow_paths.is_empty() || matches_path_pattern(&a.url, allow_paths))
        .collect()
}

/// Rank by confidence, then newest first. Undated articles sort last among
/// equal confidence.
pub fn rank_articles(articles: &mut [CandidateArticle]) {
    articles.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| b.published_at.cmp(&a.published_at))
    });
}

fn finalize(
    mut articles: Vec<CandidateArticle>,
    options: &SourceOptions,
    max_articles: usize,
) -> (Vec<CandidateArticle>, SourceStats) {
    let discovered = articles.len();

    rank_articles(&mut articles);
    let mut seen = HashSet::new();
    articles.retain(|a| seen.insert(a.url.clone()));
    let after_dedup = articles.len();

    let mut articles = apply_path_filters(articles, &options.allow_paths, &options.deny_paths);
    let after_path_filters = articles.len();

    articles.truncate(max_articles);
    let stats = SourceStats {
        discovered,
        after_dedup,
        after_path_filters,
        returned: articles.len(),
    };
    (articles, stats)
}
