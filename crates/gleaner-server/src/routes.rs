use std::convert::Infallible;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::middleware;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use gleaner_core::progress::{ProgressEvent, ProgressReporter};
use gleaner_core::sse::StreamEvent;

use crate::auth::require_api_key;
use crate::dto::{HealthResponse, ScrapeRequest};
use crate::error::ApiError;
use crate::state::AppState;

/// Build the full router with all routes and middleware.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/v1/scrape", post(scrape))
        .route("/v1/scrape/stream", post(scrape_stream))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    let public = Router::new().route("/health", get(health));

    public.merge(api).with_state(state)
}

// ---------------------------------------------------------------------------
// Scrape
// ---------------------------------------------------------------------------

pub async fn scrape(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<ScrapeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!(url = %body.url, source_type = %body.options.source_type, "Scrape requested");
    let result = state.pipeline.scrape(&body.url, &body.options).await?;
    Ok(axum::Json(result))
}

/// Forwards pipeline progress into the SSE channel.
struct ChannelReporter(mpsc::UnboundedSender<StreamEvent>);

impl ProgressReporter for ChannelReporter {
    fn report(&self, event: &ProgressEvent) {
        let _ = self.0.send(StreamEvent::Progress(event.clone()));
    }
}

/// Stream a scrape as server-sent events: `progress` events, then exactly
/// one `result` or `error`. Dropping the connection cancels the scrape.
pub async fn scrape_stream(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<ScrapeRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::info!(url = %body.url, "Streaming scrape requested");

    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();

    tokio::spawn(async move {
        let reporter = ChannelReporter(tx.clone());
        let outcome = state
            .pipeline
            .scrape_with(&body.url, &body.options, &reporter, &cancel)
            .await;
        let last = match outcome {
            Ok(result) => StreamEvent::Result(Box::new(result)),
            Err(e) => {
                tracing::debug!(url = %body.url, error = %e, "Streaming scrape ended with error");
                StreamEvent::error(&e)
            }
        };
        let _ = tx.send(last);
    });

    // The stream ends when the task drops its sender after the terminal
    // event. Dropping the stream early drops `guard`, cancelling the scrape.
    let stream = futures::stream::unfold((rx, guard), |(mut rx, guard)| async move {
        let event = rx.recv().await?;
        Some((Ok(to_sse_event(&event)), (rx, guard)))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn to_sse_event(event: &StreamEvent) -> Event {
    match serde_json::to_string(event) {
        Ok(json) => Event::default().data(json),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode stream event");
            Event::default().data(r#"{"type":"error","data":{"message":"encoding failed"}}"#)
        }
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

pub async fn health() -> impl IntoResponse {
    axum::Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}
