//! End-to-end tests for the tool calling proxy against a mocked vLLM server.

use std::sync::Arc;

use httpmock::prelude::*;
use serde_json::{json, Value};

use vllm_tool_proxy::config::{RoutingConfig, ToolsConfig, UpstreamConfig};
use vllm_tool_proxy::error::ProxyError;
use vllm_tool_proxy::metrics::Metrics;
use vllm_tool_proxy::protocol::{ChatCompletionRequest, ChatMessage, ToolDefinition};
use vllm_tool_proxy::proxy::ToolCallProxy;
use vllm_tool_proxy::tools::ToolRegistry;
use vllm_tool_proxy::upstream::VllmClient;

fn completion(message: Value, finish_reason: &str) -> Value {
    json!({
        "id": "chatcmpl-mock",
        "object": "chat.completion",
        "created": 1,
        "model": "openai/gpt-oss-20b",
        "choices": [{"index": 0, "message": message, "finish_reason": finish_reason}],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
    })
}

fn proxy_for(server: &MockServer) -> ToolCallProxy {
    let upstream = UpstreamConfig {
        base_url: server.base_url(),
        ..UpstreamConfig::default()
    };
    let backend = Arc::new(VllmClient::new(&upstream).unwrap());
    let registry = Arc::new(ToolRegistry::with_builtin_tools(&ToolsConfig::default()));
    ToolCallProxy::new(
        backend,
        registry,
        Arc::new(Metrics::new().unwrap()),
        RoutingConfig::default(),
        &upstream.model,
    )
}

fn calculator_request(text: &str) -> ChatCompletionRequest {
    let mut request = ChatCompletionRequest::new("", vec![ChatMessage::user(text)]);
    request.tools = Some(vec![ToolDefinition::function(
        "calculator",
        "Evaluate arithmetic",
        json!({
            "type": "object",
            "properties": {"expression": {"type": "string"}},
            "required": ["expression"]
        }),
    )]);
    request
}

#[tokio::test]
async fn test_passthrough_strips_tools_and_fills_model() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .body_contains("\"model\":\"openai/gpt-oss-20b\"");
            then.status(200).json_body(completion(
                json!({"role": "assistant", "content": "Hello!"}),
                "stop",
            ));
        })
        .await;

    let proxy = proxy_for(&server);
    let request = ChatCompletionRequest::new("", vec![ChatMessage::user("hi")]);
    let response = proxy.process(request).await.unwrap();

    mock.assert_hits_async(1).await;
    assert_eq!(response.first_content(), "Hello!");
    assert_eq!(proxy.stats().statistics.passthrough, 1);
}

#[tokio::test]
async fn test_named_function_answers_first() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .body_contains("\"tool_choice\":{\"type\":\"function\"");
            then.status(200).json_body(completion(
                json!({
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {"name": "calculator", "arguments": "{\"expression\":\"123*456\"}"}
                    }]
                }),
                "tool_calls",
            ));
        })
        .await;

    let proxy = proxy_for(&server);
    let response = proxy
        .process(calculator_request("123 곱하기 456 계산해줘"))
        .await
        .unwrap();

    mock.assert_hits_async(1).await;
    assert_eq!(response.tool_calls()[0].function.name, "calculator");
    assert_eq!(proxy.stats().statistics.priority_1_success, 1);
}

#[tokio::test]
async fn test_bridge_recovers_when_model_never_calls_tools() {
    let server = MockServer::start_async().await;
    // Every call, including the routing prompt, gets prose back.
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(200).json_body(completion(
                json!({"role": "assistant", "content": "I think the answer is large."}),
                "stop",
            ));
        })
        .await;

    let proxy = proxy_for(&server);
    let response = proxy
        .process(calculator_request("123 곱하기 456 계산해줘"))
        .await
        .unwrap();

    // Named function, auto guided, then the routing prompt.
    mock.assert_hits_async(3).await;
    let call = &response.tool_calls()[0];
    assert_eq!(call.function.name, "calculator");
    assert_eq!(
        call.function.parsed_arguments().unwrap()["expression"],
        json!("123 * 456")
    );
    assert_eq!(response.choices[0].finish_reason.as_deref(), Some("tool_calls"));

    let stats = proxy.stats();
    assert_eq!(stats.statistics.priority_3_success, 1);
    assert_eq!(stats.statistics.failures, 0);
}

#[tokio::test]
async fn test_all_strategies_fail_on_upstream_errors() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(500).body("engine dead");
        })
        .await;

    let proxy = proxy_for(&server);
    let err = proxy
        .process(calculator_request("123 곱하기 456 계산해줘"))
        .await
        .unwrap_err();

    mock.assert_hits_async(4).await;
    assert!(matches!(err, ProxyError::StrategiesExhausted));
    assert_eq!(proxy.stats().statistics.failures, 1);
}

#[tokio::test]
async fn test_agent_executes_tools_server_side() {
    let server = MockServer::start_async().await;
    // Second round: the conversation now carries the tool result.
    let final_answer = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .body_contains("\"role\":\"tool\"");
            then.status(200).json_body(completion(
                json!({"role": "assistant", "content": "The result is 56088."}),
                "stop",
            ));
        })
        .await;
    let tool_round = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(200).json_body(completion(
                json!({
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "calculator", "arguments": "{\"expression\":\"123*456\"}"}
                    }]
                }),
                "tool_calls",
            ));
        })
        .await;

    let proxy = proxy_for(&server);
    let request = ChatCompletionRequest::new("", vec![ChatMessage::user("What is 123*456?")]);
    let outcome = proxy.run_agent(request).await.unwrap();

    tool_round.assert_hits_async(1).await;
    final_answer.assert_hits_async(1).await;
    assert_eq!(outcome.response.first_content(), "The result is 56088.");
    assert_eq!(outcome.tool_trace.len(), 1);
    assert_eq!(outcome.tool_trace[0].tool, "calculator");
    assert_eq!(outcome.tool_trace[0].result.data["result"], json!(56088));
}
