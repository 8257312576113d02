use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response};
use http_body_util::BodyExt;
use httpmock::prelude::*;
use tower::ServiceExt;

use gleaner_core::ScraperConfig;
use gleaner_core::rate_limiter::RateLimiterConfig;
use gleaner_core::testutil::{article_page, rss_feed};
use gleaner_server::routes;
use gleaner_server::state::AppState;

pub const TEST_API_KEY: &str = "test-secret-key";

/// Config that lets the pipeline reach the local mock server quickly.
fn test_config(allow_private_urls: bool) -> ScraperConfig {
    ScraperConfig {
        rate_limiter: RateLimiterConfig {
            requests_per_second: 1000.0,
            max_backoff: Duration::from_millis(5),
            max_retries: 0,
            ..Default::default()
        },
        allow_private_urls,
        ..Default::default()
    }
}

pub fn setup_test_app() -> Router {
    build(Some(TEST_API_KEY), true)
}

pub fn setup_test_app_no_auth() -> Router {
    build(None, true)
}

pub fn setup_test_app_strict() -> Router {
    build(None, false)
}

fn build(api_key: Option<&str>, allow_private_urls: bool) -> Router {
    let state = AppState::new(test_config(allow_private_urls), api_key.map(str::to_string))
        .expect("Failed to build app state");
    routes::router(Arc::new(state))
}

/// Mock site with an RSS feed at `/feed.xml` linking two article pages.
pub async fn mock_blog() -> MockServer {
    let server = MockServer::start_async().await;

    let first = server.url("/posts/first");
    let second = server.url("/posts/second");
    let feed = rss_feed(&[
        ("Shipping the first release", &first, Some("Wed, 01 May 2024 10:00:00 GMT")),
        ("Notes on the second release", &second, Some("Thu, 02 May 2024 10:00:00 GMT")),
    ]);

    server
        .mock_async(|when, then| {
            when.method(GET).path("/feed.xml");
            then.status(200)
                .header("content-type", "application/rss+xml")
                .body(feed);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/posts/first");
            then.status(200)
                .header("content-type", "text/html; charset=utf-8")
                .body(article_page("Shipping the first release", 450));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/posts/second");
            then.status(200)
                .header("content-type", "text/html; charset=utf-8")
                .body(article_page("Notes on the second release", 450));
        })
        .await;

    server
}

pub fn post_json(uri: &str, body: serde_json::Value, token: Option<&str>) -> Request<Body> {
    let builder = Request::post(uri).header("content-type", "application/json");
    let builder = match token {
        Some(token) => builder.header("authorization", format!("Bearer {token}")),
        None => builder,
    };
    builder.body(Body::from(body.to_string())).unwrap()
}

pub async fn send(app: Router, request: Request<Body>) -> Response<Body> {
    app.oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
