use std::error::Error as _;
use std::io::ErrorKind;
use std::time::Duration;

use gleaner_core::config::DEFAULT_USER_AGENT;
use gleaner_core::error::AppError;
use gleaner_core::http::{FetchRequest, FetchResponse, Method};
use gleaner_core::ssrf::{check_url, is_private_ip};
use gleaner_core::traits::Fetcher;
use reqwest::Client;
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE};
use url::{Host, Url};

/// HTTP fetcher using reqwest.
///
/// Every request carries its own timeout and optional body cap from the
/// [`FetchRequest`]. Non-2xx responses are returned as `Ok` so callers can
/// inspect the status.
///
/// By default, SSRF protection is **enabled**: hostnames are resolved and
/// requests to private/reserved IP ranges are blocked. Use
/// [`allow_private_urls`](Self::allow_private_urls) to disable this (e.g.,
/// for CLI usage where the user controls the machine).
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
    ssrf_protection: bool,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, AppError> {
        Self::with_user_agent(DEFAULT_USER_AGENT)
    }

    pub fn with_user_agent(user_agent: &str) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            ssrf_protection: true,
        })
    }

    /// Disable SSRF protection, allowing requests to private/reserved IPs.
    ///
    /// Only use this for CLI usage where the user controls the machine.
    pub fn allow_private_urls(mut self) -> Self {
        self.ssrf_protection = false;
        self
    }
}

impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, AppError> {
        if self.ssrf_protection {
            validate_url(&request.url).await?;
        }

        let timeout_secs = request.timeout.as_secs();
        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                AppError::Timeout(timeout_secs)
            } else if e.is_connect() {
                connect_error(&e)
            } else {
                AppError::HttpError(e.to_string())
            }
        };

        let builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Head => self.client.head(&request.url),
        };
        let builder = match &request.accept {
            Some(accept) => builder.header(ACCEPT, accept),
            None => builder,
        };

        let mut response = builder
            .timeout(request.timeout)
            .send()
            .await
            .map_err(map_err)?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        if let (Some(limit), Some(size)) = (request.max_bytes, content_length)
            && size > limit
        {
            return Err(AppError::PayloadTooLarge { size, limit });
        }

        let mut body = Vec::new();
        if request.method == Method::Get {
            while let Some(chunk) = response.chunk().await.map_err(map_err)? {
                body.extend_from_slice(&chunk);
                if let Some(limit) = request.max_bytes
                    && body.len() as u64 > limit
                {
                    return Err(AppError::PayloadTooLarge {
                        size: body.len() as u64,
                        limit,
                    });
                }
            }
        }

        tracing::debug!(
            url = %request.url,
            status,
            bytes = body.len(),
            "Fetched"
        );

        Ok(FetchResponse {
            url: final_url,
            status,
            content_type,
            content_length,
            body,
        })
    }
}

/// Classify a connect failure. A refused connection is only visible as an
/// `io::Error` somewhere in the source chain, not in the display text.
pub(crate) fn connect_error(err: &reqwest::Error) -> AppError {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>()
            && io.kind() == ErrorKind::ConnectionRefused
        {
            let target = err.url().map(|u| u.to_string()).unwrap_or_default();
            return AppError::ConnectionRefused(target);
        }
        source = cause.source();
    }
    AppError::NetworkError(format!("Connection failed: {err}"))
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Validate a URL to prevent server-side request forgery (SSRF).
///
/// 1. Run the static checks (scheme, localhost, literal IPs).
/// 2. Resolve the hostname via DNS.
/// 3. Reject if any resolved IP is private/reserved.
async fn validate_url(url: &str) -> Result<(), AppError> {
    let parsed: Url = check_url(url)?;

    let host = match parsed.host() {
        Some(Host::Domain(domain)) => domain.to_string(),
        // Literal IPs were already checked.
        _ => return Ok(()),
    };

    let port = parsed.port_or_known_default().unwrap_or(80);
    let addrs: Vec<_> = tokio::net::lookup_host((host.as_str(), port))
        .await
        .map_err(|e| AppError::NetworkError(format!("DNS resolution failed for {host}: {e}")))?
        .collect();

    if addrs.is_empty() {
        return Err(AppError::NetworkError(format!(
            "DNS resolution returned no addresses for {host}"
        )));
    }

    if let Some(blocked) = addrs.iter().find(|a| is_private_ip(a.ip())) {
        return Err(AppError::SsrfBlocked(format!(
            "{host} resolves to private/reserved IP {}",
            blocked.ip()
        )));
    }

    Ok(())
}
