use std::time::Duration;

use gleaner_core::config::SearchConfig;
use gleaner_core::error::AppError;
use gleaner_core::traits::SearchProvider;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::fetcher::connect_error;

const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(30);
const SYSTEM_PROMPT: &str = "You find recent articles and blog posts on a given website. Respond with one absolute article URL per line and nothing else.";

/// OpenAI-compatible chat-completions client used as the HTML scraper's
/// last-resort article source.
///
/// Search-grounded providers (Perplexity and friends) return a top-level
/// `citations` array; those are preferred. URLs mentioned in the message
/// body are used otherwise.
#[derive(Clone)]
pub struct OpenAiSearchProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    timeout_secs: u64,
}

impl OpenAiSearchProvider {
    pub fn new(api_key: &str, model: &str, base_url: &str) -> Result<Self, AppError> {
        Self::build(Some(api_key.to_string()), model, base_url, DEFAULT_SEARCH_TIMEOUT)
    }

    /// Provider configured from `GLEANER_SEARCH_*` settings.
    ///
    /// Without an API key every search returns no URLs.
    pub fn from_config(config: &SearchConfig) -> Result<Self, AppError> {
        Self::build(
            config.api_key.clone(),
            &config.model,
            &config.base_url,
            DEFAULT_SEARCH_TIMEOUT,
        )
    }

    pub fn with_timeout(self, timeout: Duration) -> Result<Self, AppError> {
        Self::build(self.api_key, &self.model, &self.base_url, timeout)
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    fn build(
        api_key: Option<String>,
        model: &str,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
            timeout_secs: timeout.as_secs(),
        })
    }
}

// ---- Chat completions API types ----

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    citations: Vec<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl SearchProvider for OpenAiSearchProvider {
    async fn search_articles(&self, domain: &str, page_url: &str) -> Result<Vec<String>, AppError> {
        let Some(api_key) = &self.api_key else {
            tracing::debug!(domain, "Search provider has no API key, skipping");
            return Ok(vec![]);
        };

        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                Message {
                    role: "user",
                    content: format!(
                        "List the most recent articles published on {domain}. Their listing page is {page_url}."
                    ),
                },
            ],
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(self.timeout_secs)
                } else if e.is_connect() {
                    connect_error(&e)
                } else {
                    AppError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(AppError::RateLimitExceeded);
        }
        if !status.is_success() {
            return Err(AppError::HttpStatus {
                status: status.as_u16(),
                url,
            });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::SerializationError(format!("Invalid search response: {e}")))?;

        let mut urls = chat.citations;
        if urls.is_empty() {
            urls = chat
                .choices
                .first()
                .and_then(|c| c.message.content.as_deref())
                .map(urls_in_text)
                .unwrap_or_default();
        }
        urls.retain(|u| Url::parse(u).is_ok_and(|u| matches!(u.scheme(), "http" | "https")));
        urls.dedup();

        tracing::debug!(domain, found = urls.len(), "Search provider answered");
        Ok(urls)
    }
}

fn urls_in_text(text: &str) -> Vec<String> {
    text.split(|c: char| c.is_whitespace() || matches!(c, '<' | '>' | '(' | ')' | '[' | ']' | '"'))
        .map(|token| token.trim_end_matches(['.', ',', ';', ':']))
        .filter(|token| token.starts_with("http://") || token.starts_with("https://"))
        .map(str::to_string)
        .collect()
}
