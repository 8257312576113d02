use std::sync::Arc;

use gleaner_core::error::AppError;
use gleaner_core::traits::Cleaner;
use htmd::HtmlToMarkdown;

/// HTML-to-Markdown cleaner using htmd.
///
/// Turns an article's isolated HTML into Markdown, dropping elements that
/// never carry article text.
pub struct HtmdCleaner {
    converter: Arc<HtmlToMarkdown>,
}

impl Clone for HtmdCleaner {
    fn clone(&self) -> Self {
        Self {
            converter: Arc::clone(&self.converter),
        }
    }
}

impl HtmdCleaner {
    pub fn new() -> Self {
        let converter = HtmlToMarkdown::builder()
            .skip_tags(vec![
                "script", "style", "nav", "footer", "header", "aside", "noscript", "iframe", "svg",
                "form", "button",
            ])
            .build();

        Self {
            converter: Arc::new(converter),
        }
    }
}

impl Default for HtmdCleaner {
    fn default() -> Self {
        Self::new()
    }
}

impl Cleaner for HtmdCleaner {
    fn clean(&self, html: &str) -> Result<String, AppError> {
        self.converter
            .convert(html)
            .map(|md| md.trim().to_string())
            .map_err(|e| AppError::CleanerError(e.to_string()))
    }
}
