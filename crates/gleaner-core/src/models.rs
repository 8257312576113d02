use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Requested or detected shape of a source URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    #[default]
    Auto,
    Rss,
    Sitemap,
    Html,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Auto => "auto",
            SourceType::Rss => "rss",
            SourceType::Sitemap => "sitemap",
            SourceType::Html => "html",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(SourceType::Auto),
            "rss" => Ok(SourceType::Rss),
            "sitemap" => Ok(SourceType::Sitemap),
            "html" => Ok(SourceType::Html),
            _ => Err(format!("Unknown source type: {s}")),
        }
    }
}

/// Which discovery strategy produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArticleSource {
    Rss,
    Sitemap,
    Html,
    Discovery,
}

/// How a candidate's metadata was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractionMethod {
    Rss,
    Sitemap,
    HtmlLinks,
    ContentExtraction,
}

/// A discovered article URL with minimal metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateArticle {
    pub url: String,
    pub title: String,
    pub published_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    pub guid: String,
    pub confidence: f64,
    pub source: ArticleSource,
    pub extraction_method: ExtractionMethod,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl CandidateArticle {
    /// Build a candidate, deriving `guid` from `(url, published_at)`.
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        published_at: Option<DateTime<Utc>>,
        confidence: f64,
        source: ArticleSource,
        extraction_method: ExtractionMethod,
    ) -> Self {
        let url = url.into();
        let guid = create_guid(&url, published_at.as_ref());
        Self {
            url,
            title: title.into(),
            published_at,
            content: None,
            excerpt: None,
            guid,
            confidence: confidence.clamp(0.0, 1.0),
            source,
            extraction_method,
            metadata: serde_json::Map::new(),
        }
    }
}

/// Which tier of the content extractor produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentMethod {
    Readability,
    Fallback,
}

/// Readable article text extracted from a single URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedContent {
    pub url: String,
    pub title: String,
    /// Cleaned article HTML.
    pub content: String,
    pub text_content: String,
    pub excerpt: Option<String>,
    pub byline: Option<String>,
    pub published_time: Option<String>,
    pub site_name: Option<String>,
    pub lang: Option<String>,
    /// First JSON-LD block found on the page.
    pub structured: Option<serde_json::Value>,
    pub word_count: usize,
    /// Minutes, rounded up.
    pub reading_time: u32,
    pub confidence: f64,
    pub extraction_method: ContentMethod,
    pub extracted_at: DateTime<Utc>,
}

/// Final output unit: a candidate merged with its extracted content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapedArticle {
    #[serde(flatten)]
    pub candidate: CandidateArticle,
    pub full_content: Option<String>,
    pub full_content_markdown: Option<String>,
    pub full_content_text: Option<String>,
    pub quality_score: f64,
}

/// Feed flavour of a discovered feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedType {
    Rss,
    Atom,
    Rdf,
}

/// Where a feed URL was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeedSource {
    /// The probed URL itself answered with a feed content type.
    Direct,
    LinkTag,
    CommonPath,
    ContentScan,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredFeed {
    pub url: String,
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub feed_type: FeedType,
    pub source: FeedSource,
    pub confidence: f64,
}

/// Google News sitemap extension.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsMeta {
    pub title: Option<String>,
    pub publication_name: Option<String>,
    pub publication_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SitemapEntry {
    pub url: String,
    pub lastmod: Option<DateTime<Utc>>,
    pub changefreq: Option<String>,
    pub priority: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub news: Option<NewsMeta>,
}

/// What the orchestrator settled on for a source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceInfo {
    pub detected_type: Option<SourceType>,
    /// URL the winning strategy actually read (feed, sitemap, or page).
    pub resolved_url: Option<String>,
    /// Name of the strategy that produced the articles.
    pub strategy: Option<String>,
    pub title: Option<String>,
}

/// Counts reported by the orchestrator after finalization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStats {
    pub discovered: usize,
    pub after_dedup: usize,
    pub after_path_filters: usize,
    pub returned: usize,
}

/// Output of one orchestration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceResult {
    pub articles: Vec<CandidateArticle>,
    pub source_info: SourceInfo,
    pub processing_time_ms: u64,
    pub errors: Vec<String>,
    pub extraction_stats: SourceStats,
}

/// Counts at each pipeline stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionStats {
    pub raw_discovered: usize,
    pub after_deny_filter: usize,
    pub after_content_validation: usize,
    pub after_quality_filter: usize,
}

/// Overall trust in a scrape result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultConfidence {
    High,
    Medium,
    Low,
}

/// Result of [`ScrapePipeline::scrape`](crate::pipeline::ScrapePipeline::scrape).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeResult {
    pub url: String,
    pub detected_type: Option<SourceType>,
    pub source_info: Option<SourceInfo>,
    pub articles: Vec<ScrapedArticle>,
    pub errors: Vec<String>,
    pub extraction_stats: ExtractionStats,
    pub confidence: ResultConfidence,
    pub processing_time_ms: u64,
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Deterministic identifier for a `(url, published_at)` pair.
pub fn create_guid(url: &str, published_at: Option<&DateTime<Utc>>) -> String {
    let date = published_at.map(|d| d.to_rfc3339()).unwrap_or_default();
    compute_hash(&format!("{url}|{date}"))
}
