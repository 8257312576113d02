use gleaner_client::{HtmdCleaner, OpenAiSearchProvider, ReadabilityIsolator, ReqwestFetcher};
use gleaner_core::{AppError, ScrapePipeline, ScraperConfig};

/// Pipeline wired with the production HTTP client and extractors.
pub type ServerPipeline =
    ScrapePipeline<ReqwestFetcher, ReadabilityIsolator, HtmdCleaner, OpenAiSearchProvider>;

/// Shared application state, available to all route handlers via `State<Arc<AppState>>`.
pub struct AppState {
    pub pipeline: ServerPipeline,
    /// Bearer token for `/v1/*` (None = no authentication).
    pub api_key: Option<String>,
}

impl AppState {
    pub fn new(config: ScraperConfig, api_key: Option<String>) -> Result<Self, AppError> {
        let fetcher = ReqwestFetcher::with_user_agent(&config.user_agent)?;
        let fetcher = if config.allow_private_urls {
            fetcher.allow_private_urls()
        } else {
            fetcher
        };
        let search = OpenAiSearchProvider::from_config(&config.search)?;

        let pipeline = ScrapePipeline::new(
            fetcher,
            ReadabilityIsolator::new(),
            HtmdCleaner::new(),
            search,
            config,
        );

        Ok(Self { pipeline, api_key })
    }
}
