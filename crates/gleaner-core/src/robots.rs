//! robots.txt fetching, caching and evaluation.
//!
//! Fetch failures never block crawling: a missing or unreachable robots.txt
//! allows everything.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::future::Cache;
use regex::Regex;
use robotstxt::RobotsParseHandler;
use serde::Serialize;
use url::Url;

use crate::error::AppError;
use crate::http::FetchRequest;
use crate::rate_limiter::{RateLimiter, RequestOptions};
use crate::traits::Fetcher;

/// Configuration for [`RobotsChecker`].
#[derive(Debug, Clone)]
pub struct RobotsConfig {
    /// Full User-Agent header; the product token before `/` is matched against rules.
    pub user_agent: String,
    pub timeout: Duration,
    pub ttl: Duration,
    /// When false every URL is allowed without fetching robots.txt.
    pub respect_robots: bool,
}

impl Default for RobotsConfig {
    fn default() -> Self {
        Self {
            user_agent: crate::config::DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(5),
            ttl: Duration::from_secs(24 * 60 * 60),
            respect_robots: true,
        }
    }
}

/// Directives for one user agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RobotsRule {
    pub user_agent: String,
    pub disallows: Vec<String>,
    pub allows: Vec<String>,
    pub crawl_delay: Option<f64>,
    pub sitemaps: Vec<String>,
}

/// A parsed robots.txt with its cache lifetime.
#[derive(Debug, Clone, Serialize)]
pub struct RobotsTxt {
    pub rules: Vec<RobotsRule>,
    pub sitemaps: Vec<String>,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Answer to an allow/deny query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RobotsVerdict {
    pub allowed: bool,
    pub reason: String,
    pub crawl_delay: Option<f64>,
    pub sitemaps: Vec<String>,
}

impl RobotsTxt {
    pub fn parse(text: &str, ttl: Duration) -> Self {
        let (rules, sitemaps) = parse_robots_txt(text);
        let fetched_at = Utc::now();
        let expires_at = fetched_at
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(24));
        Self {
            rules,
            sitemaps,
            fetched_at,
            expires_at,
        }
    }

    /// An empty file: everything allowed.
    pub fn allow_all(ttl: Duration) -> Self {
        Self::parse("", ttl)
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Exact (case-insensitive) agent match first, then `*`.
    pub fn rule_for(&self, agent: &str) -> Option<&RobotsRule> {
        self.rules
            .iter()
            .find(|r| r.user_agent.eq_ignore_ascii_case(agent))
            .or_else(|| self.rules.iter().find(|r| r.user_agent == "*"))
    }

    /// Evaluate `path` (path plus optional query) for `agent`.
    pub fn check(&self, agent: &str, path: &str) -> RobotsVerdict {
        let Some(rule) = self.rule_for(agent) else {
            return RobotsVerdict {
                allowed: true,
                reason: "No matching robots.txt rules".to_string(),
                crawl_delay: None,
                sitemaps: self.sitemaps.clone(),
            };
        };

        let verdict = |allowed: bool, reason: String| RobotsVerdict {
            allowed,
            reason,
            crawl_delay: rule.crawl_delay,
            sitemaps: self.sitemaps.clone(),
        };

        if let Some(pattern) = rule.allows.iter().find(|p| pattern_matches(p, path)) {
            return verdict(true, format!("Allowed by rule: Allow: {pattern}"));
        }
        if let Some(pattern) = rule.disallows.iter().find(|p| pattern_matches(p, path)) {
            return verdict(false, format!("Blocked by rule: Disallow: {pattern}"));
        }
        verdict(true, "No matching disallow rule".to_string())
    }
}

/// Parse robots.txt into per-agent rules and the global sitemap list.
///
/// Consecutive `User-agent` lines form one group sharing the directives that
/// follow them.
pub fn parse_robots_txt(text: &str) -> (Vec<RobotsRule>, Vec<String>) {
    let mut collector = RuleCollector::default();
    robotstxt::parse_robotstxt(text, &mut collector);
    (collector.rules, collector.sitemaps)
}

/// Builds [`RobotsRule`] groups from the line events emitted by `robotstxt`.
#[derive(Default)]
struct RuleCollector {
    rules: Vec<RobotsRule>,
    sitemaps: Vec<String>,
    /// Indexes into `rules` for the group currently receiving directives.
    group: Vec<usize>,
    group_has_directives: bool,
}

impl RuleCollector {
    fn each_in_group(&mut self, mut apply: impl FnMut(&mut RobotsRule)) {
        self.group_has_directives = true;
        for &idx in &self.group {
            apply(&mut self.rules[idx]);
        }
    }
}

impl RobotsParseHandler for RuleCollector {
    fn handle_robots_start(&mut self) {}

    fn handle_robots_end(&mut self) {}

    fn handle_user_agent(&mut self, _line_num: u32, user_agent: &str) {
        if self.group_has_directives {
            self.group.clear();
            self.group_has_directives = false;
        }
        self.rules.push(RobotsRule {
            user_agent: user_agent.to_string(),
            ..Default::default()
        });
        self.group.push(self.rules.len() - 1);
    }

    fn handle_allow(&mut self, _line_num: u32, value: &str) {
        self.each_in_group(|rule| rule.allows.push(value.to_string()));
    }

    fn handle_disallow(&mut self, _line_num: u32, value: &str) {
        self.each_in_group(|rule| rule.disallows.push(value.to_string()));
    }

    fn handle_sitemap(&mut self, _line_num: u32, value: &str) {
        if value.is_empty() {
            return;
        }
        for &idx in &self.group {
            self.rules[idx].sitemaps.push(value.to_string());
        }
        if !self.sitemaps.iter().any(|s| s == value) {
            self.sitemaps.push(value.to_string());
        }
    }

    fn handle_unknown_action(&mut self, _line_num: u32, action: &str, value: &str) {
        if action.trim().eq_ignore_ascii_case("crawl-delay") {
            let delay = value.trim().parse::<f64>().ok();
            self.each_in_group(|rule| rule.crawl_delay = delay);
        }
    }
}

/// robots.txt path matching: empty matches nothing, `*` is a wildcard,
/// a trailing `$` anchors the end.
pub fn pattern_matches(pattern: &str, path: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }
    if pattern == "/" {
        return true;
    }

    let (body, anchored) = match pattern.strip_suffix('$') {
        Some(body) => (body, true),
        None => (pattern, false),
    };
    let mut expr = String::from("^");
    for (i, part) in body.split('*').enumerate() {
        if i > 0 {
            expr.push_str(".*");
        }
        expr.push_str(&regex::escape(part));
    }
    if anchored {
        expr.push('$');
    }

    Regex::new(&expr).is_ok_and(|re| re.is_match(path))
}

/// Product token of a User-Agent string (`"Gleaner/0.1 (+url)"` → `"Gleaner"`).
pub fn agent_token(user_agent: &str) -> &str {
    user_agent
        .split(['/', ' '])
        .next()
        .filter(|t| !t.is_empty())
        .unwrap_or("*")
}

/// `https://example.com` for a domain or any URL on it.
pub fn origin_for(domain_or_url: &str) -> Result<String, AppError> {
    let candidate = if domain_or_url.contains("://") {
        domain_or_url.to_string()
    } else {
        format!("https://{domain_or_url}")
    };
    let url = Url::parse(&candidate)
        .map_err(|e| AppError::InvalidUrl(format!("{domain_or_url}: {e}")))?;
    if url.host_str().is_none() {
        return Err(AppError::InvalidUrl(format!("{domain_or_url}: missing host")));
    }
    Ok(url.origin().ascii_serialization())
}

/// Fetches and caches robots.txt per host.
#[derive(Clone)]
pub struct RobotsChecker<F: Fetcher> {
    fetcher: F,
    limiter: RateLimiter,
    config: RobotsConfig,
    cache: Cache<String, Arc<RobotsTxt>>,
}

impl<F: Fetcher> RobotsChecker<F> {
    pub fn new(fetcher: F, limiter: RateLimiter, config: RobotsConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(config.ttl)
            .build();
        Self {
            fetcher,
            limiter,
            config,
            cache,
        }
    }

    pub fn config(&self) -> &RobotsConfig {
        &self.config
    }

    /// Is `url` crawlable by our user agent?
    pub async fn is_allowed(&self, url: &str) -> Result<RobotsVerdict, AppError> {
        let parsed = Url::parse(url).map_err(|e| AppError::InvalidUrl(format!("{url}: {e}")))?;

        if !self.config.respect_robots {
            return Ok(RobotsVerdict {
                allowed: true,
                reason: "robots.txt checking disabled".to_string(),
                crawl_delay: None,
                sitemaps: vec![],
            });
        }

        let origin = origin_for(url)?;
        let robots = self.get_robots(&origin).await;

        let mut path = parsed.path().to_string();
        if let Some(query) = parsed.query() {
            path.push('?');
            path.push_str(query);
        }

        let verdict = robots.check(agent_token(&self.config.user_agent), &path);
        if !verdict.allowed {
            tracing::debug!(url = %url, reason = %verdict.reason, "robots.txt disallows URL");
        }
        Ok(verdict)
    }

    /// Sitemaps declared in the domain's robots.txt.
    pub async fn get_sitemaps(&self, domain: &str) -> Result<Vec<String>, AppError> {
        let origin = origin_for(domain)?;
        Ok(self.get_robots(&origin).await.sitemaps.clone())
    }

    /// Crawl-delay (seconds) that applies to our user agent.
    pub async fn get_crawl_delay(&self, domain: &str) -> Result<Option<f64>, AppError> {
        let origin = origin_for(domain)?;
        let robots = self.get_robots(&origin).await;
        Ok(robots
            .rule_for(agent_token(&self.config.user_agent))
            .and_then(|r| r.crawl_delay))
    }

    async fn get_robots(&self, origin: &str) -> Arc<RobotsTxt> {
        let robots_url = format!("{origin}/robots.txt");

        if let Some(cached) = self.cache.get(&robots_url).await {
            if !cached.is_expired() {
                return cached;
            }
            self.cache.invalidate(&robots_url).await;
        }

        let request = FetchRequest::get(&robots_url).with_timeout(self.config.timeout);
        let options = RequestOptions {
            priority: 1,
            max_retries: Some(1),
        };

        let (robots, cacheable) = match self.limiter.fetch(&self.fetcher, request, options).await {
            Ok(response) => {
                tracing::debug!(url = %robots_url, bytes = response.body.len(), "Fetched robots.txt");
                (RobotsTxt::parse(&response.text(), self.config.ttl), true)
            }
            Err(AppError::HttpStatus { status, .. }) => {
                tracing::debug!(url = %robots_url, status, "No robots.txt, allowing all");
                (RobotsTxt::allow_all(self.config.ttl), true)
            }
            Err(e) => {
                tracing::warn!(url = %robots_url, error = %e, "robots.txt fetch failed, allowing all");
                (RobotsTxt::allow_all(self.config.ttl), false)
            }
        };

        let robots = Arc::new(robots);
        if cacheable {
            self.cache.insert(robots_url, robots.clone()).await;
        }
        robots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limiter::RateLimiterConfig;
    use crate::testutil::{MockFetcher, fast_limiter};

    const SAMPLE: &str = "\
# comment line
User-agent: *
Disallow: /private/
Disallow: /tmp*.html$
Allow: /private/public-note
Crawl-delay: 2

User-agent: Gleaner
User-agent: OtherBot
Disallow: /no-gleaner/
Crawl-delay: 5

User-agent: BlockAll
Disallow: /

Sitemap: https://example.com/sitemap.xml
Sitemap: https://example.com/news-sitemap.xml # trailing comment
";

    fn robots() -> RobotsTxt {
        RobotsTxt::parse(SAMPLE, Duration::from_secs(60))
    }

    #[test]
    fn parses_groups_and_sitemaps() {
        let (rules, sitemaps) = parse_robots_txt(SAMPLE);
        assert_eq!(rules.len(), 4);
        assert_eq!(rules[0].user_agent, "*");
        assert_eq!(rules[0].disallows, vec!["/private/", "/tmp*.html$"]);
        assert_eq!(rules[0].allows, vec!["/private/public-note"]);
        assert_eq!(rules[0].crawl_delay, Some(2.0));
        assert_eq!(rules[1].disallows, rules[2].disallows);
        assert_eq!(rules[2].crawl_delay, Some(5.0));
        assert_eq!(
            sitemaps,
            vec![
                "https://example.com/sitemap.xml",
                "https://example.com/news-sitemap.xml"
            ]
        );
    }

    #[test]
    fn directives_are_case_insensitive() {
        let (rules, _) = parse_robots_txt("USER-AGENT: *\nDISALLOW: /x\ncrawl-DELAY: 1.5");
        assert_eq!(rules[0].disallows, vec!["/x"]);
        assert_eq!(rules[0].crawl_delay, Some(1.5));
    }

    #[test]
    fn unknown_directives_are_ignored() {
        let text = "Crawl-delay: 9\nUser-agent: *\nHost: example.com\nClean-param: ref /\nDisallow: /admin\n";
        let (rules, sitemaps) = parse_robots_txt(text);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].disallows, vec!["/admin"]);
        assert_eq!(rules[0].crawl_delay, None);
        assert!(sitemaps.is_empty());
    }

    #[test]
    fn exact_agent_preferred_over_wildcard() {
        let r = robots();
        assert!(!r.check("gleaner", "/no-gleaner/page").allowed);
        // Gleaner's group does not disallow /private/.
        assert!(r.check("Gleaner", "/private/x").allowed);
        assert!(!r.check("SomeBot", "/private/x").allowed);
        assert_eq!(r.check("gleaner", "/").crawl_delay, Some(5.0));
    }

    #[test]
    fn allow_wins_over_disallow() {
        let verdict = robots().check("SomeBot", "/private/public-note");
        assert!(verdict.allowed);
        assert!(verdict.reason.contains("Allow"));
    }

    #[test]
    fn wildcard_and_anchor_patterns() {
        assert!(pattern_matches("/tmp*.html$", "/tmp/file.html"));
        assert!(!pattern_matches("/tmp*.html$", "/tmp/file.html?x=1"));
        assert!(pattern_matches("/*.pdf", "/docs/a.pdf"));
        assert!(pattern_matches("/", "/anything"));
        assert!(!pattern_matches("", "/anything"));
        assert!(!pattern_matches("/a", "/b/a"));
    }

    #[test]
    fn slash_blocks_everything() {
        assert!(!robots().check("BlockAll", "/").allowed);
        assert!(!robots().check("BlockAll", "/deep/path").allowed);
    }

    #[test]
    fn no_rules_allows() {
        let r = RobotsTxt::allow_all(Duration::from_secs(60));
        assert!(r.check("gleaner", "/anything").allowed);
    }

    #[test]
    fn agent_token_extraction() {
        assert_eq!(agent_token("Gleaner/0.1 (+https://x)"), "Gleaner");
        assert_eq!(agent_token("curl"), "curl");
        assert_eq!(agent_token(""), "*");
    }

    #[test]
    fn origin_normalization() {
        assert_eq!(origin_for("example.com").unwrap(), "https://example.com");
        assert_eq!(
            origin_for("http://example.com:8080/a/b").unwrap(),
            "http://example.com:8080"
        );
        assert!(origin_for("http://").is_err());
    }

    fn checker(fetcher: MockFetcher) -> RobotsChecker<MockFetcher> {
        RobotsChecker::new(
            fetcher,
            fast_limiter(),
            RobotsConfig {
                user_agent: "Gleaner/0.1".into(),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn missing_robots_allows() {
        let fetcher = MockFetcher::new().route_status("https://example.com/robots.txt", 404);
        let verdict = checker(fetcher).is_allowed("https://example.com/a").await.unwrap();
        assert!(verdict.allowed);
    }

    #[tokio::test]
    async fn network_error_allows() {
        let fetcher = MockFetcher::new().route_error(
            "https://example.com/robots.txt",
            AppError::ConnectionRefused("https://example.com/robots.txt".into()),
        );
        let verdict = checker(fetcher).is_allowed("https://example.com/a").await.unwrap();
        assert!(verdict.allowed);
    }

    #[tokio::test]
    async fn fetched_rules_are_applied_and_cached() {
        let fetcher = MockFetcher::new().route_html("https://example.com/robots.txt", SAMPLE);
        let checker = checker(fetcher.clone());

        assert!(!checker.is_allowed("https://example.com/no-gleaner/1").await.unwrap().allowed);
        assert!(checker.is_allowed("https://example.com/ok").await.unwrap().allowed);
        assert_eq!(
            checker.get_crawl_delay("example.com").await.unwrap(),
            Some(5.0)
        );
        assert_eq!(checker.get_sitemaps("example.com").await.unwrap().len(), 2);

        assert_eq!(fetcher.calls_to("https://example.com/robots.txt"), 1);
    }

    #[tokio::test]
    async fn expired_entries_are_refetched() {
        let fetcher = MockFetcher::new().route_html("https://example.com/robots.txt", SAMPLE);
        let checker = RobotsChecker::new(
            fetcher.clone(),
            RateLimiter::new(RateLimiterConfig {
                requests_per_second: 1000.0,
                ..Default::default()
            }),
            RobotsConfig {
                ttl: Duration::from_millis(30),
                ..Default::default()
            },
        );

        checker.is_allowed("https://example.com/a").await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        checker.is_allowed("https://example.com/b").await.unwrap();

        assert_eq!(fetcher.calls_to("https://example.com/robots.txt"), 2);
    }

    #[tokio::test]
    async fn disabled_checker_never_fetches() {
        let fetcher = MockFetcher::new();
        let checker = RobotsChecker::new(
            fetcher.clone(),
            fast_limiter(),
            RobotsConfig {
                respect_robots: false,
                ..Default::default()
            },
        );
        assert!(checker.is_allowed("https://example.com/a").await.unwrap().allowed);
        assert_eq!(fetcher.total_calls(), 0);
    }
}
