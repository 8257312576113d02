pub mod cleaner;
pub mod fetcher;
pub mod isolator;
pub mod search;

pub use cleaner::HtmdCleaner;
pub use fetcher::ReqwestFetcher;
pub use isolator::ReadabilityIsolator;
pub use search::OpenAiSearchProvider;
