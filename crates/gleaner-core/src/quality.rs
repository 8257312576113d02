//! Post-extraction quality scoring and boilerplate URL denial.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::models::ExtractedContent;

/// Paths that are almost never articles.
pub const DEFAULT_DENY_PATHS: &[&str] = &[
    "/",
    "/about",
    "/about/*",
    "/about-us",
    "/careers",
    "/careers/*",
    "/jobs",
    "/jobs/*",
    "/contact",
    "/contact-us",
    "/team",
    "/team/*",
    "/privacy",
    "/privacy-policy",
    "/terms",
    "/terms-of-service",
    "/legal",
    "/legal/*",
    "/cookie-policy",
    "/tag/*",
    "/tags/*",
    "/category/*",
    "/categories/*",
    "/author/*",
    "/authors/*",
    "/archive",
    "/archive/*",
    "/search",
    "/search/*",
    "/login",
    "/signup",
    "/subscribe",
];

const ARTICLE_SCHEMA_TYPES: &[&str] = &[
    "Article",
    "NewsArticle",
    "BlogPosting",
    "ReportageNewsArticle",
    "AnalysisNewsArticle",
    "OpinionNewsArticle",
    "TechArticle",
    "ScholarlyArticle",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityWeights {
    pub content_validity: f64,
    pub publication_date: f64,
    pub byline: f64,
    pub schema: f64,
    pub reading_time: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            content_validity: 0.6,
            publication_date: 0.12,
            byline: 0.08,
            schema: 0.08,
            reading_time: 0.12,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QualityConfig {
    pub weights: QualityWeights,
    pub min_text_chars: usize,
    pub min_title_chars: usize,
    pub max_title_chars: usize,
    /// Minimum text-to-HTML length ratio.
    pub min_text_ratio: f64,
    pub min_reading_minutes: u32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            weights: QualityWeights::default(),
            min_text_chars: 200,
            min_title_chars: 10,
            max_title_chars: 200,
            min_text_ratio: 0.1,
            min_reading_minutes: 2,
        }
    }
}

/// Content-validity sub-score in `[0, 1]`.
pub fn content_validity_score(content: &ExtractedContent, config: &QualityConfig) -> f64 {
    let mut score: f64 = 1.0;

    if content.text_content.chars().count() < config.min_text_chars {
        score -= 0.5;
    }

    let title_len = content.title.trim().chars().count();
    if !(config.min_title_chars..=config.max_title_chars).contains(&title_len) {
        score -= 0.2;
    }

    let ratio = if content.content.is_empty() {
        0.0
    } else {
        content.text_content.len() as f64 / content.content.len() as f64
    };
    if ratio < config.min_text_ratio {
        score -= 0.2;
    }

    score.clamp(0.0, 1.0)
}

/// Weighted quality score in `[0, 1]`.
pub fn calculate_article_quality_score(content: &ExtractedContent, config: &QualityConfig) -> f64 {
    let w = &config.weights;
    let flag = |present: bool| if present { 1.0 } else { 0.0 };

    let has_date = content
        .published_time
        .as_deref()
        .is_some_and(|d| !d.trim().is_empty());
    let has_byline = content.byline.as_deref().is_some_and(|b| !b.trim().is_empty());

    let total = w.content_validity + w.publication_date + w.byline + w.schema + w.reading_time;
    if total <= 0.0 {
        return 0.0;
    }

    let sum = w.content_validity * content_validity_score(content, config)
        + w.publication_date * flag(has_date)
        + w.byline * flag(has_byline)
        + w.schema * flag(has_article_schema(content.structured.as_ref()))
        + w.reading_time * flag(content.reading_time >= config.min_reading_minutes);

    (sum / total).clamp(0.0, 1.0)
}

/// Does the JSON-LD value contain an Article-family node?
pub fn has_article_schema(structured: Option<&Value>) -> bool {
    fn walk(value: &Value) -> bool {
        match value {
            Value::Array(items) => items.iter().any(walk),
            Value::Object(obj) => {
                is_article_schema_type(obj.get("@type")) || obj.get("@graph").is_some_and(walk)
            }
            _ => false,
        }
    }
    structured.is_some_and(walk)
}

/// `@type` value naming an Article-family schema.org type.
pub fn is_article_schema_type(value: Option<&Value>) -> bool {
    match value {
        Some(Value::String(t)) => ARTICLE_SCHEMA_TYPES.contains(&t.as_str()),
        Some(Value::Array(types)) => types
            .iter()
            .any(|t| t.as_str().is_some_and(|t| ARTICLE_SCHEMA_TYPES.contains(&t))),
        _ => false,
    }
}

/// Does the URL's path hit a deny pattern?
pub fn should_deny_url<S: AsRef<str>>(url: &str, deny_paths: &[S]) -> bool {
    matches_path_pattern(url, deny_paths)
}

/// Does the URL's path match any of `patterns`?
///
/// Patterns are exact paths (`/about`) or prefix globs (`/tag/*`, which
/// also matches `/tag` itself). Trailing slashes and case are ignored.
pub fn matches_path_pattern<S: AsRef<str>>(url: &str, patterns: &[S]) -> bool {
    let path = Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string());
    let path = normalize_path(&path);

    patterns.iter().any(|pattern| {
        let pattern = pattern.as_ref().trim();
        match pattern.strip_suffix("/*") {
            Some(prefix) => {
                let prefix = normalize_path(prefix);
                path == prefix || path.starts_with(&format!("{}/", prefix.trim_end_matches('/')))
            }
            None => path == normalize_path(pattern),
        }
    })
}

fn normalize_path(path: &str) -> String {
    let lower = path.trim().to_ascii_lowercase();
    let trimmed = lower.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::models::ContentMethod;
    use crate::testutil::lorem;

    fn content(text: &str, title: &str) -> ExtractedContent {
        let words = text.split_whitespace().count();
        ExtractedContent {
            url: "https://example.com/post".into(),
            title: title.into(),
            content: format!("<p>{text}</p>"),
            text_content: text.into(),
            excerpt: None,
            byline: None,
            published_time: None,
            site_name: None,
            lang: None,
            structured: None,
            word_count: words,
            reading_time: words.div_ceil(200) as u32,
            confidence: 0.9,
            extraction_method: ContentMethod::Readability,
            extracted_at: Utc::now(),
        }
    }

    #[test]
    fn full_marks_for_complete_article() {
        let mut c = content(&lorem(500), "A perfectly reasonable title");
        c.published_time = Some("2024-05-01".into());
        c.byline = Some("Ada".into());
        c.structured = Some(json!({"@graph": [{"@type": "WebPage"}, {"@type": ["NewsArticle"]}]}));

        let score = calculate_article_quality_score(&c, &QualityConfig::default());
        assert!((score - 1.0).abs() < 1e-9, "{score}");
    }

    #[test]
    fn bare_article_scores_validity_only() {
        let c = content(&lorem(100), "A perfectly reasonable title");
        let score = calculate_article_quality_score(&c, &QualityConfig::default());
        assert!((score - 0.6).abs() < 1e-9, "{score}");
    }

    #[test]
    fn validity_penalties_stack_and_clamp() {
        let config = QualityConfig::default();
        let v = content_validity_score(&content("short", "Tiny"), &config);
        assert!((v - 0.3).abs() < 1e-9, "{v}");

        let mut c = content("short", "Tiny");
        c.content = format!("<div>{}</div>", "x".repeat(1000));
        let v = content_validity_score(&c, &config);
        assert!((v - 0.1).abs() < 1e-9, "{v}");
    }

    #[test]
    fn score_is_bounded() {
        let mut c = content("", "");
        c.content.clear();
        let config = QualityConfig {
            weights: QualityWeights {
                content_validity: 5.0,
                ..Default::default()
            },
            ..Default::default()
        };
        let score = calculate_article_quality_score(&c, &config);
        assert!((0.0..=1.0).contains(&score));

        let zero = QualityConfig {
            weights: QualityWeights {
                content_validity: 0.0,
                publication_date: 0.0,
                byline: 0.0,
                schema: 0.0,
                reading_time: 0.0,
            },
            ..Default::default()
        };
        assert_eq!(calculate_article_quality_score(&c, &zero), 0.0);
    }

    #[test]
    fn deny_glob_and_exact() {
        assert!(should_deny_url("https://x.com/tag/foo", &["/tag/*"]));
        assert!(!should_deny_url("https://x.com/article/1", &["/tag/*"]));
        assert!(should_deny_url("https://x.com/tag", &["/tag/*"]));
        assert!(!should_deny_url("https://x.com/tagged/foo", &["/tag/*"]));
        assert!(should_deny_url("https://x.com/About/", &["/about"]));
        assert!(!should_deny_url("https://x.com/about/team", &["/about"]));
    }

    #[test]
    fn default_deny_list_blocks_boilerplate() {
        for url in [
            "https://x.com/",
            "https://x.com/about",
            "https://x.com/careers/engineer",
            "https://x.com/category/news",
            "https://x.com/author/ada",
            "https://x.com/search?q=rust",
            "https://x.com/privacy-policy",
        ] {
            assert!(should_deny_url(url, DEFAULT_DENY_PATHS), "{url}");
        }
        assert!(!should_deny_url("https://x.com/2024/05/release-notes", DEFAULT_DENY_PATHS));
    }
}
