use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;

use gleaner_core::Phase;
use gleaner_core::sse::{SseParser, StreamEvent};

use crate::integration::common::{
    TEST_API_KEY, body_bytes, body_json, mock_blog, post_json, send, setup_test_app,
    setup_test_app_no_auth, setup_test_app_strict,
};

#[tokio::test]
async fn health_returns_200() {
    let response = send(
        setup_test_app(),
        Request::get("/health").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn unauthenticated_request_returns_401() {
    let response = send(
        setup_test_app(),
        post_json("/v1/scrape", json!({"url": "https://example.com"}), None),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "unauthorized");
}

#[tokio::test]
async fn wrong_api_key_returns_401() {
    let response = send(
        setup_test_app(),
        post_json(
            "/v1/scrape/stream",
            json!({"url": "https://example.com"}),
            Some("wrong-key"),
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn invalid_url_returns_400() {
    let response = send(
        setup_test_app(),
        post_json("/v1/scrape", json!({"url": "not a url"}), Some(TEST_API_KEY)),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "invalid_url");
}

#[tokio::test]
async fn private_source_is_rejected_without_opt_in() {
    let response = send(
        setup_test_app_strict(),
        post_json("/v1/scrape", json!({"url": "http://127.0.0.1:9/feed.xml"}), None),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["message"].as_str().unwrap().contains("SSRF"));
}

#[tokio::test]
async fn missing_url_is_a_client_error() {
    let response = send(
        setup_test_app_no_auth(),
        post_json("/v1/scrape", json!({"maxArticles": 3}), None),
    )
    .await;

    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn scrape_feed_returns_articles() {
    let server = mock_blog().await;

    let response = send(
        setup_test_app(),
        post_json(
            "/v1/scrape",
            json!({
                "url": server.url("/feed.xml"),
                "sourceType": "rss",
                "qualityThreshold": 0.5
            }),
            Some(TEST_API_KEY),
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["detectedType"], "rss");
    assert_eq!(json["confidence"], "high");

    let articles = json["articles"].as_array().unwrap();
    assert_eq!(articles.len(), 2);
    for article in articles {
        assert!(article["url"].as_str().unwrap().contains("/posts/"));
        assert!(article["fullContentText"].as_str().unwrap().contains("lorem ipsum"));
        assert!(article["qualityScore"].as_f64().unwrap() >= 0.5);
    }
}

#[tokio::test]
async fn scrape_without_content_uses_placeholder_score() {
    let server = mock_blog().await;

    let response = send(
        setup_test_app_no_auth(),
        post_json(
            "/v1/scrape",
            json!({
                "url": server.url("/feed.xml"),
                "sourceType": "rss",
                "extractFullContent": false,
                "maxArticles": 1
            }),
            None,
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let articles = json["articles"].as_array().unwrap();
    assert_eq!(articles.len(), 1);
    assert_eq!(articles[0]["qualityScore"], 0.5);
    assert!(articles[0]["fullContent"].is_null());
}

#[tokio::test]
async fn stream_emits_progress_then_result() {
    let server = mock_blog().await;

    let response = send(
        setup_test_app(),
        post_json(
            "/v1/scrape/stream",
            json!({
                "url": server.url("/feed.xml"),
                "sourceType": "rss",
                "qualityThreshold": 0.5
            }),
            Some(TEST_API_KEY),
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );

    let mut parser = SseParser::new();
    let events = parser.feed(&body_bytes(response).await);
    assert!(events.len() >= 3, "{events:?}");

    match &events[0] {
        StreamEvent::Progress(p) => assert_eq!(p.phase, Phase::Initializing),
        other => panic!("expected progress, got {other:?}"),
    }
    let phases: Vec<Phase> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Progress(p) => Some(p.phase),
            _ => None,
        })
        .collect();
    assert!(phases.contains(&Phase::Extracting));
    assert_eq!(phases.last(), Some(&Phase::Complete));

    let terminal: Vec<_> = events.iter().filter(|e| e.is_terminal()).collect();
    assert_eq!(terminal.len(), 1);
    match events.last().unwrap() {
        StreamEvent::Result(result) => assert_eq!(result.articles.len(), 2),
        other => panic!("expected result, got {other:?}"),
    }
}

#[tokio::test]
async fn stream_reports_errors_as_terminal_event() {
    let response = send(
        setup_test_app_no_auth(),
        post_json("/v1/scrape/stream", json!({"url": "ftp://example.com/feed"}), None),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);

    let mut parser = SseParser::new();
    let events = parser.feed(&body_bytes(response).await);
    match events.last() {
        Some(StreamEvent::Error(err)) => {
            assert_eq!(err.code.as_deref(), Some("invalid_url"));
            assert!(err.message.contains("not allowed"));
        }
        other => panic!("expected error event, got {other:?}"),
    }
    assert!(!events.iter().any(|e| matches!(
        e,
        StreamEvent::Progress(p) if p.phase == Phase::Complete
    )));
}
