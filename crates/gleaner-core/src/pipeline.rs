//! Top-level scrape pipeline: discover, filter, extract, score.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::ScraperConfig;
use crate::content::{ContentConfig, ContentExtractor};
use crate::error::AppError;
use crate::models::{
    ArticleSource, CandidateArticle, ExtractedContent, ExtractionMethod, ExtractionStats, ResultConfidence,
    ScrapeResult, ScrapedArticle, SourceType,
};
use crate::orchestrator::{SourceOptions, SourceOrchestrator};
use crate::progress::{Phase, ProgressEvent, ProgressReporter, TracingProgressReporter};
use crate::quality::{DEFAULT_DENY_PATHS, QualityConfig, calculate_article_quality_score, should_deny_url};
use crate::rate_limiter::RateLimiter;
use crate::robots::RobotsChecker;
use crate::sitemap::parse_w3c_date;
use crate::ssrf;
use crate::traits::{Cleaner, ContentIsolator, Fetcher, SearchProvider};

/// Quality assigned to candidates returned without content extraction.
pub const PLACEHOLDER_QUALITY: f64 = 0.5;

/// Options for one [`ScrapePipeline::scrape`] call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScrapeOptions {
    pub source_type: SourceType,
    pub max_articles: usize,
    pub extract_full_content: bool,
    pub deny_paths: Vec<String>,
    pub allow_paths: Vec<String>,
    pub quality_threshold: f64,
    /// Log per-candidate decisions at `info` instead of `debug`.
    pub debug: bool,
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        Self {
            source_type: SourceType::Auto,
            max_articles: 50,
            extract_full_content: true,
            deny_paths: DEFAULT_DENY_PATHS.iter().map(|p| p.to_string()).collect(),
            allow_paths: vec![],
            quality_threshold: 0.6,
            debug: false,
        }
    }
}

macro_rules! candidate_log {
    ($debug:expr, $($arg:tt)+) => {
        if $debug {
            tracing::info!($($arg)+);
        } else {
            tracing::debug!($($arg)+);
        }
    };
}

/// Owns every component of a scrape: limiter, robots cache, breakers,
/// discovery strategies, and the content extractor.
#[derive(Clone)]
pub struct ScrapePipeline<F: Fetcher, I: ContentIsolator, C: Cleaner, S: SearchProvider> {
    orchestrator: SourceOrchestrator<F, S>,
    extractor: ContentExtractor<F, I>,
    cleaner: C,
    limiter: RateLimiter,
    robots: RobotsChecker<F>,
    quality: QualityConfig,
    config: ScraperConfig,
}

impl<F, I, C, S> ScrapePipeline<F, I, C, S>
where
    F: Fetcher,
    I: ContentIsolator,
    C: Cleaner,
    S: SearchProvider,
{
    pub fn new(fetcher: F, isolator: I, cleaner: C, search: S, config: ScraperConfig) -> Self {
        let limiter = RateLimiter::new(config.rate_limiter.clone());
        let robots = RobotsChecker::new(fetcher.clone(), limiter.clone(), config.robots_config());
        let orchestrator =
            SourceOrchestrator::new(fetcher.clone(), limiter.clone(), robots.clone(), search, &config);
        let content = ContentConfig {
            timeout: config.content_timeout,
            max_bytes: config.content_max_bytes,
            allow_private_urls: config.allow_private_urls,
            ..Default::default()
        };
        let extractor = ContentExtractor::new(fetcher, limiter.clone(), robots.clone(), isolator, content);

        Self {
            orchestrator,
            extractor,
            cleaner,
            limiter,
            robots,
            quality: QualityConfig::default(),
            config,
        }
    }

    pub fn with_quality_config(mut self, quality: QualityConfig) -> Self {
        self.quality = quality;
        self
    }

    pub fn config(&self) -> &ScraperConfig {
        &self.config
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn robots(&self) -> &RobotsChecker<F> {
        &self.robots
    }

    pub fn orchestrator(&self) -> &SourceOrchestrator<F, S> {
        &self.orchestrator
    }

    /// [`scrape_with`](Self::scrape_with) logging progress through `tracing`
    /// and without cancellation.
    pub async fn scrape(&self, url: &str, options: &ScrapeOptions) -> Result<ScrapeResult, AppError> {
        self.scrape_with(url, options, &TracingProgressReporter, &CancellationToken::new())
            .await
    }

    /// Discovered URLs only: no extraction and no quality filter.
    pub async fn quick_scrape(&self, url: &str) -> Result<Vec<String>, AppError> {
        let options = ScrapeOptions {
            max_articles: self.config.max_articles_per_source,
            extract_full_content: false,
            quality_threshold: 0.0,
            ..Default::default()
        };
        let result = self.scrape(url, &options).await?;
        Ok(result.articles.into_iter().map(|a| a.candidate.url).collect())
    }

    /// Run the full pipeline for one source.
    ///
    /// Per-article and per-strategy failures end up in
    /// [`ScrapeResult::errors`]. `Err` is returned only for an unusable
    /// URL, an open circuit, or cancellation ([`AppError::Aborted`], after
    /// which no `complete` event is reported).
    pub async fn scrape_with(
        &self,
        url: &str,
        options: &ScrapeOptions,
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<ScrapeResult, AppError> {
        let started = Instant::now();
        let elapsed = || started.elapsed().as_millis() as u64;

        let result = self.run(url, options, reporter, cancel, &started).await;
        if let Err(e) = &result
            && !e.is_aborted()
        {
            reporter.report(&ProgressEvent::new(Phase::Error, e.to_string(), elapsed()).with_url(url));
        }
        result
    }

    async fn run(
        &self,
        url: &str,
        options: &ScrapeOptions,
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
        started: &Instant,
    ) -> Result<ScrapeResult, AppError> {
        let elapsed = || started.elapsed().as_millis() as u64;

        reporter.report(
            &ProgressEvent::new(Phase::Initializing, format!("Starting scrape of {url}"), elapsed())
                .with_url(url),
        );
        ssrf::check_url_with(url, self.config.allow_private_urls)?;
        ensure_active(cancel)?;

        reporter.report(&ProgressEvent::new(Phase::Detecting, "Detecting source type", elapsed()));
        let source_options = SourceOptions {
            source_type: options.source_type,
            allow_paths: options.allow_paths.clone(),
            ..Default::default()
        };
        let source = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::Aborted),
            result = self.orchestrator.process_source(url, &source_options) => result?,
        };

        let mut errors = source.errors;
        let mut candidates = source.articles;
        let mut stats = ExtractionStats {
            raw_discovered: candidates.len(),
            ..Default::default()
        };
        reporter.report(
            &ProgressEvent::new(
                Phase::Discovering,
                format!("Found {} candidate articles", candidates.len()),
                elapsed(),
            )
            .with_articles_found(candidates.len()),
        );

        candidates.retain(|c| {
            let denied = should_deny_url(&c.url, &options.deny_paths);
            if denied {
                candidate_log!(options.debug, url = %c.url, "Denied by path filter");
            }
            !denied
        });
        stats.after_deny_filter = candidates.len();
        reporter.report(
            &ProgressEvent::new(
                Phase::Filtering,
                format!("{} candidates after path filtering", candidates.len()),
                elapsed(),
            )
            .with_articles_found(candidates.len()),
        );

        let articles = if options.extract_full_content {
            let extracted = self
                .extract_candidates(candidates, options, reporter, cancel, &mut errors, started)
                .await?;
            stats.after_content_validation = extracted.len();

            reporter.report(
                &ProgressEvent::new(
                    Phase::Scoring,
                    format!("Applying quality threshold {:.2}", options.quality_threshold),
                    elapsed(),
                )
                .with_articles_found(extracted.len()),
            );
            extracted
                .into_iter()
                .filter(|a| {
                    let keep = a.quality_score >= options.quality_threshold;
                    if !keep {
                        candidate_log!(
                            options.debug,
                            url = %a.candidate.url,
                            score = a.quality_score,
                            "Below quality threshold"
                        );
                    }
                    keep
                })
                .collect::<Vec<_>>()
        } else {
            let placeholder: Vec<_> = candidates
                .into_iter()
                .take(options.max_articles)
                .map(|candidate| ScrapedArticle {
                    candidate,
                    full_content: None,
                    full_content_markdown: None,
                    full_content_text: None,
                    quality_score: PLACEHOLDER_QUALITY,
                })
                .collect();
            stats.after_content_validation = placeholder.len();
            placeholder
        };
        stats.after_quality_filter = articles.len();

        let detected_type = source.source_info.detected_type;
        let confidence = match (articles.is_empty(), detected_type) {
            (true, _) => ResultConfidence::Low,
            (false, Some(SourceType::Rss | SourceType::Sitemap)) => ResultConfidence::High,
            (false, _) => ResultConfidence::Medium,
        };

        reporter.report(
            &ProgressEvent::new(
                Phase::Complete,
                format!("Scrape complete: {} articles", articles.len()),
                elapsed(),
            )
            .with_articles_found(articles.len()),
        );
        tracing::info!(
            url = %url,
            detected_type = ?detected_type,
            articles = articles.len(),
            errors = errors.len(),
            "Scrape finished"
        );

        Ok(ScrapeResult {
            url: url.to_string(),
            detected_type,
            source_info: Some(source.source_info),
            articles,
            errors,
            extraction_stats: stats,
            confidence,
            processing_time_ms: elapsed(),
        })
    }

    /// Sequential extraction over at most `max_articles * 2` candidates,
    /// stopping at `max_articles` successes.
    async fn extract_candidates(
        &self,
        candidates: Vec<CandidateArticle>,
        options: &ScrapeOptions,
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
        errors: &mut Vec<String>,
        started: &Instant,
    ) -> Result<Vec<ScrapedArticle>, AppError> {
        let budget = candidates.len().min(options.max_articles.saturating_mul(2));
        let mut articles = Vec::new();

        for (i, candidate) in candidates.into_iter().take(budget).enumerate() {
            if articles.len() >= options.max_articles {
                break;
            }
            ensure_active(cancel)?;

            reporter.report(
                &ProgressEvent::new(
                    Phase::Extracting,
                    format!("Extracting article {} of {budget}", i + 1),
                    started.elapsed().as_millis() as u64,
                )
                .with_progress(i + 1, budget)
                .with_url(&candidate.url)
                .with_articles_found(articles.len()),
            );

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AppError::Aborted),
                result = self.extractor.extract_content(&candidate.url) => result,
            };

            match outcome {
                Ok(Some(content)) => {
                    let article = self.build_article(candidate, content);
                    candidate_log!(
                        options.debug,
                        url = %article.candidate.url,
                        score = article.quality_score,
                        "Extracted article"
                    );
                    articles.push(article);
                }
                Ok(None) => {
                    candidate_log!(options.debug, url = %candidate.url, "No extractable content");
                    errors.push(format!("{}: no extractable content", candidate.url));
                }
                Err(e) if e.is_aborted() => return Err(e),
                Err(e) => {
                    candidate_log!(options.debug, url = %candidate.url, error = %e, "Extraction failed");
                    errors.push(format!("{}: {e}", candidate.url));
                }
            }
        }

        Ok(articles)
    }

    /// Extract a single page without discovery.
    pub async fn extract_article(&self, url: &str) -> Result<Option<ScrapedArticle>, AppError> {
        let Some(content) = self.extractor.extract_content(url).await? else {
            return Ok(None);
        };
        let candidate = CandidateArticle::new(
            url,
            content.title.clone(),
            None,
            content.confidence,
            ArticleSource::Discovery,
            ExtractionMethod::ContentExtraction,
        );
        Ok(Some(self.build_article(candidate, content)))
    }

    fn build_article(&self, mut candidate: CandidateArticle, content: ExtractedContent) -> ScrapedArticle {
        let quality_score = calculate_article_quality_score(&content, &self.quality);

        let markdown = match self.cleaner.clean(&content.content) {
            Ok(md) => Some(md),
            Err(e) => {
                tracing::warn!(url = %content.url, error = %e, "Markdown conversion failed");
                None
            }
        };

        if candidate.title.trim().is_empty() {
            candidate.title = content.title.clone();
        }
        if candidate.published_at.is_none() {
            candidate.published_at = content.published_time.as_deref().and_then(parse_w3c_date);
        }
        if candidate.excerpt.is_none() {
            candidate.excerpt = content.excerpt.clone();
        }
        if let Some(byline) = &content.byline {
            candidate.metadata.insert("byline".into(), byline.clone().into());
        }
        candidate
            .metadata
            .insert("wordCount".into(), content.word_count.into());
        candidate
            .metadata
            .insert("readingTime".into(), content.reading_time.into());
        candidate
            .metadata
            .insert("extractionConfidence".into(), content.confidence.into());

        ScrapedArticle {
            candidate,
            full_content: Some(content.content),
            full_content_markdown: markdown,
            full_content_text: Some(content.text_content),
            quality_score,
        }
    }
}

fn ensure_active(cancel: &CancellationToken) -> Result<(), AppError> {
    if cancel.is_cancelled() {
        Err(AppError::Aborted)
    } else {
        Ok(())
    }
}
