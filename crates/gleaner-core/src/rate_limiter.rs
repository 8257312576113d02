//! Per-host request scheduling for polite fetching.
//!
//! Every network call in the crate goes through [`RateLimiter::execute`].
//! Each host owns a priority queue drained by a single worker task which
//! enforces:
//!
//! - a global concurrency cap shared by all hosts,
//! - a minimum spacing of `1 / requests_per_second` between requests to the
//!   same host,
//! - an exponential backoff window that pauses only the offending host.
//!
//! Failed operations that are retryable are re-queued at a lower priority so
//! fresh requests are not stuck behind a flapping one.
//!
//! # Example
//!
//! ```rust,no_run
//! use gleaner_core::rate_limiter::{RateLimiter, RateLimiterConfig, RequestOptions};
//!
//! # async fn run() -> Result<(), gleaner_core::error::AppError> {
//! let limiter = RateLimiter::new(RateLimiterConfig::default());
//! let body = limiter
//!     .execute("https://example.com/feed", RequestOptions::default(), || async {
//!         Ok::<_, gleaner_core::error::AppError>("<rss/>".to_string())
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, oneshot};
use tokio::time::Instant;
use url::Url;

use crate::error::AppError;
use crate::http::{FetchRequest, FetchResponse};
use crate::traits::Fetcher;

/// Lowest priority a retried request can sink to.
pub const MIN_PRIORITY: i32 = -10;

const MAX_BACKOFF_MULTIPLIER: f64 = 10.0;
const BACKOFF_GROWTH: f64 = 1.5;

/// Configuration for the rate limiter.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Sustained request rate per host.
    pub requests_per_second: f64,

    /// Requests in flight across all hosts.
    pub max_concurrent: usize,

    /// Upper bound for a single backoff window.
    pub max_backoff: Duration,

    /// Retries per call when [`RequestOptions::max_retries`] is not set.
    pub max_retries: u32,
}

impl RateLimiterConfig {
    /// Minimum spacing between two requests to the same host.
    pub fn base_delay(&self) -> Duration {
        if self.requests_per_second <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(1.0 / self.requests_per_second)
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 2.0,
            max_concurrent: 10,
            max_backoff: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

/// Per-call scheduling options.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestOptions {
    /// Higher values are dequeued first.
    pub priority: i32,
    /// Overrides [`RateLimiterConfig::max_retries`].
    pub max_retries: Option<u32>,
}

impl RequestOptions {
    pub fn with_priority(priority: i32) -> Self {
        Self {
            priority,
            max_retries: None,
        }
    }

    pub fn no_retry() -> Self {
        Self {
            priority: 0,
            max_retries: Some(0),
        }
    }
}

/// Returns true if a failed operation should be attempted again.
pub fn should_retry(error: &AppError) -> bool {
    error.is_retryable()
}

/// Returns true if a failed operation should pause its host.
pub fn should_backoff(error: &AppError) -> bool {
    error.should_backoff()
}

/// A request waiting for its turn on a host queue.
struct PendingRequest {
    priority: i32,
    grant: oneshot::Sender<Slot>,
}

/// Priority-then-FIFO queue.
struct HostQueue<T> {
    items: Vec<(i32, T)>,
}

impl<T> Default for HostQueue<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T> HostQueue<T> {
    fn push(&mut self, priority: i32, item: T) {
        // Insert after every element of equal or higher priority.
        let pos = self
            .items
            .iter()
            .position(|(p, _)| *p < priority)
            .unwrap_or(self.items.len());
        self.items.insert(pos, (priority, item));
    }

    fn pop(&mut self) -> Option<T> {
        if self.items.is_empty() {
            None
        } else {
            Some(self.items.remove(0).1)
        }
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

struct HostQueueState {
    last_request: Option<Instant>,
    backoff_until: Option<Instant>,
    backoff_multiplier: f64,
    queue: HostQueue<PendingRequest>,
    processing: bool,
}

impl HostQueueState {
    fn new() -> Self {
        Self {
            last_request: None,
            backoff_until: None,
            backoff_multiplier: 1.0,
            queue: HostQueue::default(),
            processing: false,
        }
    }
}

/// Point-in-time view of a host's scheduling state.
#[derive(Debug, Clone)]
pub struct HostSnapshot {
    pub last_request: Option<Instant>,
    pub backoff_until: Option<Instant>,
    pub backoff_multiplier: f64,
    pub queued: usize,
    pub processing: bool,
}

/// Permission to run one operation. Holding it keeps a global concurrency
/// permit; dropping it lets the host worker move on.
struct Slot {
    _permit: OwnedSemaphorePermit,
    _done: oneshot::Sender<()>,
}

struct Inner {
    config: RateLimiterConfig,
    hosts: Mutex<HashMap<String, HostQueueState>>,
    global: Arc<Semaphore>,
}

/// Host-aware adaptive rate limiter. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let permits = config.max_concurrent.max(1);
        Self {
            inner: Arc::new(Inner {
                config,
                hosts: Mutex::new(HashMap::new()),
                global: Arc::new(Semaphore::new(permits)),
            }),
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.inner.config
    }

    /// Extract the queue key (lowercased host) from a URL.
    pub fn host_key(url: &str) -> Result<String, AppError> {
        let parsed = Url::parse(url).map_err(|e| AppError::InvalidUrl(format!("{url}: {e}")))?;
        parsed
            .host_str()
            .map(|h| h.to_ascii_lowercase())
            .ok_or_else(|| AppError::InvalidUrl(format!("{url}: missing host")))
    }

    /// Run `operation` once the host queue grants a slot, retrying transient
    /// failures up to `max_retries` times.
    pub async fn execute<T, F, Fut>(
        &self,
        url: &str,
        options: RequestOptions,
        mut operation: F,
    ) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let host = Self::host_key(url)?;
        let max_retries = options.max_retries.unwrap_or(self.inner.config.max_retries);
        let mut priority = options.priority;
        let mut attempt: u32 = 0;

        loop {
            let slot = self.acquire(&host, priority).await?;
            let result = operation().await;

            match result {
                Ok(value) => {
                    self.record_success(&host);
                    drop(slot);
                    return Ok(value);
                }
                Err(error) => {
                    if should_backoff(&error) {
                        self.record_backoff(&host, attempt);
                    }
                    drop(slot);

                    if !should_retry(&error) || attempt >= max_retries {
                        return Err(error);
                    }

                    attempt += 1;
                    priority = (priority - 1).max(MIN_PRIORITY);
                    tracing::debug!(
                        host = %host,
                        attempt,
                        priority,
                        error = %error,
                        "Re-queueing failed request"
                    );
                }
            }
        }
    }

    /// Fetch through the limiter, turning non-success statuses into errors.
    pub async fn fetch<F: Fetcher>(
        &self,
        fetcher: &F,
        request: FetchRequest,
        options: RequestOptions,
    ) -> Result<FetchResponse, AppError> {
        let url = request.url.clone();
        self.execute(&url, options, move || {
            let request = request.clone();
            async move { fetcher.fetch(request).await?.error_for_status() }
        })
        .await
    }

    /// Snapshot of a host's state, if the host has been seen.
    pub fn host_state(&self, host: &str) -> Option<HostSnapshot> {
        let hosts = self.lock_hosts();
        hosts.get(host).map(|s| HostSnapshot {
            last_request: s.last_request,
            backoff_until: s.backoff_until,
            backoff_multiplier: s.backoff_multiplier,
            queued: s.queue.len(),
            processing: s.processing,
        })
    }

    fn lock_hosts(&self) -> MutexGuard<'_, HashMap<String, HostQueueState>> {
        self.inner.hosts.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned rate limiter mutex");
            poisoned.into_inner()
        })
    }

    async fn acquire(&self, host: &str, priority: i32) -> Result<Slot, AppError> {
        let (grant, granted) = oneshot::channel();

        let spawn_worker = {
            let mut hosts = self.lock_hosts();
            let state = hosts
                .entry(host.to_string())
                .or_insert_with(HostQueueState::new);
            state.queue.push(priority, PendingRequest { priority, grant });
            if state.processing {
                false
            } else {
                state.processing = true;
                true
            }
        };

        if spawn_worker {
            let limiter = self.clone();
            let host = host.to_string();
            tokio::spawn(async move { limiter.drain(host).await });
        }

        granted
            .await
            .map_err(|_| AppError::Generic(format!("Rate limiter dropped request for {host}")))
    }

    /// Worker loop for one host. Exits when the queue is empty.
    async fn drain(self, host: String) {
        let base_delay = self.inner.config.base_delay();

        loop {
            let (request, wait) = {
                let mut hosts = self.lock_hosts();
                let Some(state) = hosts.get_mut(&host) else {
                    return;
                };
                let Some(request) = state.queue.pop() else {
                    state.processing = false;
                    return;
                };

                let now = Instant::now();
                let spacing_ready = state
                    .last_request
                    .map(|last| last + base_delay)
                    .unwrap_or(now);
                let backoff_ready = state.backoff_until.unwrap_or(now);
                let ready_at = spacing_ready.max(backoff_ready);
                (request, ready_at.saturating_duration_since(now))
            };

            if !wait.is_zero() {
                tracing::debug!(
                    host = %host,
                    priority = request.priority,
                    wait_ms = %wait.as_millis(),
                    "Throttling request"
                );
                tokio::time::sleep(wait).await;
            }

            let Ok(permit) = self.inner.global.clone().acquire_owned().await else {
                return;
            };

            {
                let mut hosts = self.lock_hosts();
                if let Some(state) = hosts.get_mut(&host) {
                    state.last_request = Some(Instant::now());
                }
            }

            let (done, finished) = oneshot::channel();
            let slot = Slot {
                _permit: permit,
                _done: done,
            };

            // Caller went away while queued.
            if request.grant.send(slot).is_err() {
                continue;
            }

            let _ = finished.await;
        }
    }

    fn record_success(&self, host: &str) {
        let mut hosts = self.lock_hosts();
        if let Some(state) = hosts.get_mut(host) {
            state.backoff_multiplier = 1.0;
            state.backoff_until = None;
        }
    }

    fn record_backoff(&self, host: &str, retry_count: u32) {
        let config = &self.inner.config;
        let mut hosts = self.lock_hosts();
        let Some(state) = hosts.get_mut(host) else {
            return;
        };

        let factor = state.backoff_multiplier * 2f64.powi(retry_count.min(16) as i32);
        let delay = config.base_delay().mul_f64(factor).min(config.max_backoff);
        let until = Instant::now() + delay;

        state.backoff_until = Some(match state.backoff_until {
            Some(existing) if existing > until => existing,
            _ => until,
        });
        state.backoff_multiplier =
            (state.backoff_multiplier * BACKOFF_GROWTH).min(MAX_BACKOFF_MULTIPLIER);

        tracing::warn!(
            host = %host,
            delay_ms = %delay.as_millis(),
            multiplier = state.backoff_multiplier,
            "Backing off host"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_config() -> RateLimiterConfig {
        RateLimiterConfig {
            requests_per_second: 1000.0,
            max_concurrent: 10,
            max_backoff: Duration::from_millis(50),
            max_retries: 3,
        }
    }

    fn status(code: u16) -> AppError {
        AppError::HttpStatus {
            status: code,
            url: "https://example.com".into(),
        }
    }

    #[test]
    fn host_queue_orders_by_priority_then_fifo() {
        let mut queue = HostQueue::default();
        queue.push(3, "a");
        queue.push(1, "b");
        queue.push(3, "c");
        queue.push(2, "d");

        let order: Vec<_> = std::iter::from_fn(|| queue.pop()).collect();
        assert_eq!(order, vec!["a", "c", "d", "b"]);
    }

    #[test]
    fn host_key_extracts_lowercase_host() {
        assert_eq!(
            RateLimiter::host_key("https://Example.COM/path?q=1").unwrap(),
            "example.com"
        );
        assert!(matches!(
            RateLimiter::host_key("not-a-url"),
            Err(AppError::InvalidUrl(_))
        ));
    }

    #[test]
    fn base_delay_from_rate() {
        let config = RateLimiterConfig {
            requests_per_second: 4.0,
            ..Default::default()
        };
        assert_eq!(config.base_delay(), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn invalid_url_rejected_immediately() {
        let limiter = RateLimiter::new(fast_config());
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let err = limiter
            .execute("::bad::", RequestOptions::default(), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, AppError>(())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::InvalidUrl(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let limiter = RateLimiter::new(fast_config());
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let value = limiter
            .execute("https://example.com/a", RequestOptions::default(), move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 { Err(status(503)) } else { Ok(n) }
            })
            .await
            .unwrap();

        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let state = limiter.host_state("example.com").unwrap();
        assert_eq!(state.backoff_multiplier, 1.0);
        assert!(state.backoff_until.is_none());
    }

    #[tokio::test]
    async fn gives_up_after_max_retries_with_last_error() {
        let limiter = RateLimiter::new(fast_config());
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let err = limiter
            .execute(
                "https://example.com/a",
                RequestOptions {
                    priority: 0,
                    max_retries: Some(2),
                },
                move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(status(502))
                },
            )
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(502));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_fast() {
        let limiter = RateLimiter::new(fast_config());
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let err = limiter
            .execute("https://example.com/a", RequestOptions::default(), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(status(404))
            })
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(404));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn backoff_is_monotonic_and_capped() {
        let limiter = RateLimiter::new(fast_config());
        let mut last_until = None;
        let mut last_multiplier = 1.0;

        for _ in 0..12 {
            let _ = limiter
                .execute("https://slow.example/a", RequestOptions::no_retry(), || async {
                    Err::<(), _>(status(429))
                })
                .await;

            let state = limiter.host_state("slow.example").unwrap();
            let until = state.backoff_until.expect("backoff window set");
            if let Some(prev) = last_until {
                assert!(until >= prev);
            }
            assert!(state.backoff_multiplier >= last_multiplier);
            assert!(state.backoff_multiplier <= MAX_BACKOFF_MULTIPLIER);
            last_until = Some(until);
            last_multiplier = state.backoff_multiplier;
        }

        assert_eq!(last_multiplier, MAX_BACKOFF_MULTIPLIER);
    }

    #[tokio::test]
    async fn refused_connection_backs_off_host() {
        let limiter = RateLimiter::new(fast_config());
        let _ = limiter
            .execute("https://down.example/a", RequestOptions::no_retry(), || async {
                Err::<(), _>(AppError::ConnectionRefused("https://down.example/a".into()))
            })
            .await;
        assert!(limiter.host_state("down.example").unwrap().backoff_until.is_some());

        let _ = limiter
            .execute("https://flaky.example/a", RequestOptions::no_retry(), || async {
                Err::<(), _>(AppError::NetworkError("dns error".into()))
            })
            .await;
        assert!(limiter.host_state("flaky.example").unwrap().backoff_until.is_none());
    }

    #[tokio::test]
    async fn success_resets_backoff() {
        let limiter = RateLimiter::new(fast_config());
        let _ = limiter
            .execute("https://example.com/a", RequestOptions::no_retry(), || async {
                Err::<(), _>(status(500))
            })
            .await;
        assert!(limiter.host_state("example.com").unwrap().backoff_until.is_some());

        limiter
            .execute("https://example.com/b", RequestOptions::default(), || async {
                Ok::<_, AppError>(())
            })
            .await
            .unwrap();

        let state = limiter.host_state("example.com").unwrap();
        assert!(state.backoff_until.is_none());
        assert_eq!(state.backoff_multiplier, 1.0);
    }

    #[tokio::test]
    async fn enforces_spacing_on_same_host() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            requests_per_second: 10.0,
            ..fast_config()
        });

        let start = std::time::Instant::now();
        for path in ["a", "b", "c"] {
            limiter
                .execute(
                    &format!("https://example.com/{path}"),
                    RequestOptions::default(),
                    || async { Ok::<_, AppError>(()) },
                )
                .await
                .unwrap();
        }

        assert!(
            start.elapsed() >= Duration::from_millis(200),
            "three requests at 10 rps should take at least 200ms, took {:?}",
            start.elapsed()
        );
    }

    #[tokio::test]
    async fn does_not_delay_different_hosts() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            requests_per_second: 2.0,
            ..fast_config()
        });

        let start = std::time::Instant::now();
        for host in ["a.example", "b.example", "c.example"] {
            limiter
                .execute(
                    &format!("https://{host}/"),
                    RequestOptions::default(),
                    || async { Ok::<_, AppError>(()) },
                )
                .await
                .unwrap();
        }

        assert!(start.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn dequeues_waiting_requests_by_priority() {
        let limiter = RateLimiter::new(fast_config());
        let order = Arc::new(StdMutex::new(Vec::new()));
        let (release_tx, release_rx) = oneshot::channel::<()>();

        // Hold the host busy so the next requests pile up in the queue.
        let blocker = {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                let mut release_rx = Some(release_rx);
                limiter
                    .execute("https://example.com/block", RequestOptions::default(), || {
                        let rx = release_rx.take();
                        async move {
                            if let Some(rx) = rx {
                                let _ = rx.await;
                            }
                            Ok::<_, AppError>(())
                        }
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut handles = Vec::new();
        for (label, priority) in [("p3a", 3), ("p1", 1), ("p3b", 3), ("p2", 2)] {
            let limiter = limiter.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                limiter
                    .execute(
                        "https://example.com/item",
                        RequestOptions::with_priority(priority),
                        || {
                            let order = order.clone();
                            async move {
                                order.lock().unwrap().push(label);
                                Ok::<_, AppError>(())
                            }
                        },
                    )
                    .await
            }));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        release_tx.send(()).unwrap();
        blocker.await.unwrap().unwrap();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec!["p3a", "p3b", "p2", "p1"]);
    }

    #[tokio::test]
    async fn global_concurrency_is_bounded() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            max_concurrent: 2,
            ..fast_config()
        });
        let in_flight = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for i in 0..6 {
            let limiter = limiter.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                limiter
                    .execute(
                        &format!("https://host{i}.example/"),
                        RequestOptions::default(),
                        || {
                            let in_flight = in_flight.clone();
                            let peak = peak.clone();
                            async move {
                                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                                peak.fetch_max(now, Ordering::SeqCst);
                                tokio::time::sleep(Duration::from_millis(20)).await;
                                in_flight.fetch_sub(1, Ordering::SeqCst);
                                Ok::<_, AppError>(())
                            }
                        },
                    )
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
