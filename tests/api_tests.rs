//! HTTP API tests: the axum router wired to a mocked vLLM server.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use httpmock::prelude::*;
use serde_json::{json, Value};
use tower::ServiceExt;

use vllm_tool_proxy::config::Config;
use vllm_tool_proxy::server::{build_router, AppState};
use vllm_tool_proxy::upstream::VllmClient;

fn app_for(server: &MockServer) -> Router {
    let mut config = Config::default();
    config.upstream.base_url = server.base_url();
    app_with(config)
}

fn app_with(config: Config) -> Router {
    let config = Arc::new(config);
    let backend = Arc::new(VllmClient::new(&config.upstream).unwrap());
    let state = Arc::new(AppState::new(config, backend).unwrap());
    build_router(state)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, String) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let (status, body) = send(app, request).await;
    (status, serde_json::from_str(&body).unwrap())
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let (status, body) = send(app, request).await;
    (status, serde_json::from_str(&body).unwrap())
}

fn text_completion(content: &str) -> Value {
    json!({
        "id": "chatcmpl-mock",
        "object": "chat.completion",
        "created": 1,
        "model": "openai/gpt-oss-20b",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }]
    })
}

#[tokio::test]
async fn test_health_reports_upstream_state() {
    let server = MockServer::start_async().await;
    let app = app_for(&server);

    // No /health mock yet: vLLM answers 404.
    let (status, body) = get_json(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["upstream"]["reachable"], false);

    server
        .mock_async(|when, then| {
            when.method(GET).path("/health");
            then.status(200);
        })
        .await;
    let (_, body) = get_json(&app, "/health").await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["upstream"]["model"], "openai/gpt-oss-20b");
    assert!(body["tools"].as_u64().unwrap() > 0);
    assert_eq!(body["stats"]["statistics"]["total_requests"], 0);
}

#[tokio::test]
async fn test_tool_listing_and_info() {
    let server = MockServer::start_async().await;
    let app = app_for(&server);

    let (status, body) = get_json(&app, "/api/tools/tools").await;
    assert_eq!(status, StatusCode::OK);
    let tools = body["tools"].as_array().unwrap();
    assert_eq!(body["total_count"].as_u64().unwrap() as usize, tools.len());
    assert!(tools.iter().any(|t| t["name"] == "calculator"));
    assert!(body["categories"]
        .as_array()
        .unwrap()
        .contains(&json!("math")));

    let (status, body) = get_json(&app, "/api/tools/tools/calculator").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["category"], "math");

    let (status, body) = get_json(&app, "/api/tools/tools/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["type"], "NotFoundError");
}

#[tokio::test]
async fn test_tool_execution_and_stats() {
    let server = MockServer::start_async().await;
    let app = app_for(&server);

    let (status, body) = post_json(
        &app,
        "/api/tools/tools/calculator/execute",
        json!({"expression": "2 + 3 * 4"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["data"]["result"], json!(14));

    let (status, body) = post_json(
        &app,
        "/api/tools/execute",
        json!({"tool_name": "does_not_exist", "parameters": {}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "error");
    assert!(body["error"].as_str().unwrap().contains("not found"));

    let (_, stats) = get_json(&app, "/api/tools/stats").await;
    let calculator = stats["tools"]
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["name"] == "calculator")
        .unwrap()
        .clone();
    assert_eq!(calculator["usage_count"], 1);
    assert_eq!(calculator["success_count"], 1);

    let (_, body) = post_json(&app, "/api/tools/stats/reset", json!({})).await;
    assert_eq!(body["status"], "success");
    let (_, stats) = get_json(&app, "/api/tools/stats").await;
    assert!(stats["tools"]
        .as_array()
        .unwrap()
        .iter()
        .all(|t| t["usage_count"] == 0));
}

#[tokio::test]
async fn test_chat_completion_rejects_empty_messages() {
    let server = MockServer::start_async().await;
    let app = app_for(&server);

    let (status, body) = post_json(&app, "/v1/chat/completions", json!({"messages": []})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], 400);
}

#[tokio::test]
async fn test_chat_completion_passthrough_and_metrics() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(200).json_body(text_completion("Hi there"));
        })
        .await;
    let app = app_for(&server);

    let (status, body) = post_json(
        &app,
        "/v1/chat/completions",
        json!({"messages": [{"role": "user", "content": "hello"}]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["choices"][0]["message"]["content"], "Hi there");

    let (_, stats) = get_json(&app, "/stats").await;
    assert_eq!(stats["statistics"]["passthrough"], 1);

    let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
    let (status, text) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("tool_proxy_requests_total 1"));
}

#[tokio::test]
async fn test_chat_completion_streams_sse() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(200).json_body(text_completion("streamed"));
        })
        .await;
    let app = app_for(&server);

    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({
                "messages": [{"role": "user", "content": "hello"}],
                "stream": true
            })
            .to_string(),
        ))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("\"object\":\"chat.completion.chunk\""));
    assert!(text.contains("streamed"));
    assert!(text.trim_end().ends_with("data: [DONE]"));
}

#[tokio::test]
async fn test_models_fall_back_to_configured_model() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/v1/models");
            then.status(500);
        })
        .await;
    let app = app_for(&server);

    let (status, body) = get_json(&app, "/v1/models").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["object"], "list");
    assert_eq!(body["data"][0]["id"], "openai/gpt-oss-20b");
}

#[tokio::test]
async fn test_slow_upstream_outlives_server_timeout_floor() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(200)
                .delay(Duration::from_millis(1500))
                .json_body(text_completion("slow but fine"));
        })
        .await;

    let mut config = Config::default();
    config.upstream.base_url = server.base_url();
    config.upstream.timeout_secs = 5;
    config.server.request_timeout_secs = 1;
    let app = app_with(config);

    let (status, body) = post_json(
        &app,
        "/v1/chat/completions",
        json!({"messages": [{"role": "user", "content": "hello"}]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["choices"][0]["message"]["content"], "slow but fine");
}
