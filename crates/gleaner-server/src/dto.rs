use serde::{Deserialize, Serialize};

use gleaner_core::ScrapeOptions;

// ---------------------------------------------------------------------------
// Scrape
// ---------------------------------------------------------------------------

/// Body of `POST /v1/scrape` and `POST /v1/scrape/stream`.
///
/// Every [`ScrapeOptions`] field may appear alongside `url` and falls back
/// to its default when omitted.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeRequest {
    /// Source URL: a feed, sitemap, listing page or site root
    pub url: String,
    #[serde(flatten)]
    pub options: ScrapeOptions,
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use gleaner_core::models::SourceType;

    use super::*;

    #[test]
    fn request_flattens_options() {
        let req: ScrapeRequest = serde_json::from_str(
            r#"{"url": "https://example.com", "sourceType": "rss", "maxArticles": 5}"#,
        )
        .unwrap();
        assert_eq!(req.url, "https://example.com");
        assert_eq!(req.options.source_type, SourceType::Rss);
        assert_eq!(req.options.max_articles, 5);
        assert!(req.options.extract_full_content);
        assert!(!req.options.deny_paths.is_empty());
    }

    #[test]
    fn request_requires_url() {
        assert!(serde_json::from_str::<ScrapeRequest>(r#"{"maxArticles": 5}"#).is_err());
    }
}
