pub mod circuit_breaker;
pub mod config;
pub mod content;
pub mod discovery;
mod dom;
pub mod error;
pub mod html_links;
pub mod http;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod quality;
pub mod rate_limiter;
pub mod robots;
pub mod rss;
pub mod sitemap;
pub mod sse;
pub mod ssrf;
pub mod traits;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use config::ScraperConfig;
pub use dom::{resolve_url, title_from_url};
pub use error::AppError;
pub use http::{FetchRequest, FetchResponse, Method};
pub use models::{
    CandidateArticle, ExtractedContent, ResultConfidence, ScrapeResult, ScrapedArticle, SourceType, compute_hash,
    create_guid,
};
pub use pipeline::{ScrapeOptions, ScrapePipeline};
pub use progress::{Phase, ProgressEvent, ProgressReporter};
pub use traits::{Cleaner, ContentIsolator, Fetcher, IsolatedContent, NoSearch, SearchProvider};
