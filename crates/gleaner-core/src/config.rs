use std::time::Duration;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::AppError;
use crate::rate_limiter::RateLimiterConfig;
use crate::robots::RobotsConfig;

pub const DEFAULT_USER_AGENT: &str = "Gleaner/0.1 (content discovery bot)";

/// Default OpenAI-compatible endpoint used by the AI search fallback.
pub const DEFAULT_SEARCH_BASE_URL: &str = "https://api.perplexity.ai";
pub const DEFAULT_SEARCH_MODEL: &str = "sonar";

/// External search settings for the HTML scraper's last-resort fallback.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_SEARCH_BASE_URL.to_string(),
            model: DEFAULT_SEARCH_MODEL.to_string(),
        }
    }
}

/// Every tunable of the acquisition pipeline.
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub user_agent: String,
    pub rate_limiter: RateLimiterConfig,
    pub circuit_breaker: CircuitBreakerConfig,

    pub respect_robots: bool,
    pub robots_timeout: Duration,
    pub robots_ttl: Duration,

    /// Timeout for HEAD probes during feed and sitemap discovery.
    pub probe_timeout: Duration,
    pub feed_timeout: Duration,
    pub html_timeout: Duration,
    pub sitemap_timeout: Duration,
    pub sitemap_max_bytes: u64,
    pub content_timeout: Duration,
    pub content_max_bytes: u64,

    /// Upper bound on candidates one orchestration run may return.
    pub max_articles_per_source: usize,
    /// Listing pages followed by the HTML strategy in auto mode.
    pub html_max_pages: usize,

    pub ai_fallback: bool,
    pub search: SearchConfig,

    /// Allow sources and articles on loopback or private networks.
    pub allow_private_urls: bool,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            rate_limiter: RateLimiterConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            respect_robots: true,
            robots_timeout: Duration::from_secs(5),
            robots_ttl: Duration::from_secs(24 * 60 * 60),
            probe_timeout: Duration::from_secs(5),
            feed_timeout: Duration::from_secs(10),
            html_timeout: Duration::from_secs(10),
            sitemap_timeout: Duration::from_secs(15),
            sitemap_max_bytes: 50 * 1024 * 1024,
            content_timeout: Duration::from_secs(15),
            content_max_bytes: 10 * 1024 * 1024,
            max_articles_per_source: 1000,
            html_max_pages: 3,
            ai_fallback: false,
            search: SearchConfig::default(),
            allow_private_urls: false,
        }
    }
}

impl ScraperConfig {
    /// Defaults overlaid with `GLEANER_*` environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) but reads variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let mut config = Self::default();

        if let Some(ua) = lookup("GLEANER_USER_AGENT").filter(|v| !v.trim().is_empty()) {
            config.user_agent = ua;
        }

        if let Some(raw) = lookup("GLEANER_REQUESTS_PER_SECOND") {
            let rps: f64 = raw.parse().map_err(|_| {
                AppError::ConfigError(format!(
                    "Invalid GLEANER_REQUESTS_PER_SECOND '{raw}': must be a number"
                ))
            })?;
            if !(rps.is_finite() && rps > 0.0) {
                return Err(AppError::ConfigError(
                    "GLEANER_REQUESTS_PER_SECOND must be greater than 0".into(),
                ));
            }
            config.rate_limiter.requests_per_second = rps;
        }

        if let Some(raw) = lookup("GLEANER_MAX_CONCURRENT") {
            let parsed: usize = raw.parse().map_err(|_| {
                AppError::ConfigError(format!(
                    "Invalid GLEANER_MAX_CONCURRENT '{raw}': must be a positive integer"
                ))
            })?;
            if parsed == 0 {
                return Err(AppError::ConfigError(
                    "GLEANER_MAX_CONCURRENT must be at least 1".into(),
                ));
            }
            config.rate_limiter.max_concurrent = parsed;
        }

        if let Some(raw) = lookup("GLEANER_MAX_RETRIES") {
            config.rate_limiter.max_retries = raw.parse().map_err(|_| {
                AppError::ConfigError(format!(
                    "Invalid GLEANER_MAX_RETRIES '{raw}': must be a non-negative integer"
                ))
            })?;
        }

        if let Some(raw) = lookup("GLEANER_RESPECT_ROBOTS") {
            config.respect_robots = parse_bool("GLEANER_RESPECT_ROBOTS", &raw)?;
        }

        if let Some(raw) = lookup("GLEANER_ALLOW_PRIVATE_URLS") {
            config.allow_private_urls = parse_bool("GLEANER_ALLOW_PRIVATE_URLS", &raw)?;
        }

        if let Some(raw) = lookup("GLEANER_AI_FALLBACK") {
            config.ai_fallback = parse_bool("GLEANER_AI_FALLBACK", &raw)?;
        }

        config.search.api_key = lookup("GLEANER_SEARCH_API_KEY").filter(|v| !v.is_empty());
        if let Some(base_url) = lookup("GLEANER_SEARCH_BASE_URL") {
            config.search.base_url = base_url;
        }
        if let Some(model) = lookup("GLEANER_SEARCH_MODEL") {
            config.search.model = model;
        }

        Ok(config)
    }

    /// AI fallback is active only when enabled and a key is configured.
    pub fn ai_fallback_enabled(&self) -> bool {
        self.ai_fallback && self.search.api_key.is_some()
    }

    pub fn robots_config(&self) -> RobotsConfig {
        RobotsConfig {
            user_agent: self.user_agent.clone(),
            timeout: self.robots_timeout,
            ttl: self.robots_ttl,
            respect_robots: self.respect_robots,
        }
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool, AppError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AppError::ConfigError(format!(
            "Invalid {name} '{raw}': expected true or false"
        ))),
    }
}
