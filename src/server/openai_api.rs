//! OpenAI-compatible HTTP API and proxy status endpoints.
//!
//! - POST /v1/chat/completions
//! - GET /v1/models
//! - POST /api/chat (agent mode)
//! - GET /health, /stats, /metrics, /

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::ProxyError;
use crate::metrics::Metrics;
use crate::protocol::{ChatCompletionRequest, ModelList};
use crate::proxy::{AgentOutcome, ProxyStats, ToolCallProxy};
use crate::server::streaming::response_to_sse_stream;
use crate::server::tools_api;
use crate::tools::ToolRegistry;
use crate::upstream::ChatBackend;

/// Application state shared across handlers.
pub struct AppState {
    pub proxy: ToolCallProxy,
    pub registry: Arc<ToolRegistry>,
    pub metrics: Arc<Metrics>,
    pub config: Arc<Config>,
    pub start_time: Instant,
}

impl AppState {
    /// Wire the registry, metrics and proxy around an upstream backend.
    pub fn new(config: Arc<Config>, backend: Arc<dyn ChatBackend>) -> Result<Self, prometheus::Error> {
        let metrics = Arc::new(Metrics::new()?);
        let mut registry = ToolRegistry::with_builtin_tools(&config.tools);
        registry.set_metrics(metrics.clone());
        let registry = Arc::new(registry);

        let proxy = ToolCallProxy::new(
            backend,
            registry.clone(),
            metrics.clone(),
            config.routing.clone(),
            &config.upstream.model,
        );

        Ok(Self {
            proxy,
            registry,
            metrics,
            config,
            start_time: Instant::now(),
        })
    }
}

/// Upstream calls a tool-calling request can make across the fallback chain.
const CHAIN_UPSTREAM_CALLS: u64 = 6;
/// Headroom on top of the upstream budget for local tool execution.
const DEADLINE_MARGIN_SECS: u64 = 30;

/// Whole-request deadline. Never shorter than the worst case of the fallback
/// chain or the agent loop, so the proxy is not cut off mid-strategy.
pub fn request_deadline(config: &Config) -> Duration {
    let calls = CHAIN_UPSTREAM_CALLS.max(config.routing.max_tool_rounds as u64 + 1);
    let upstream = config
        .upstream
        .timeout_secs
        .saturating_mul(calls)
        .saturating_add(DEADLINE_MARGIN_SECS);
    Duration::from_secs(config.server.request_timeout_secs.max(upstream))
}

fn timeout_layer(deadline: Duration) -> TimeoutLayer {
    TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, deadline)
}

/// Build the axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    let deadline = request_deadline(&state.config);
    info!(deadline_secs = deadline.as_secs(), "Request deadline");

    Router::new()
        .route("/", get(index))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .route("/api/chat", post(agent_chat))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(metrics))
        .nest("/api/tools", tools_api::router())
        .layer(timeout_layer(deadline))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── Response Types ────────────────────────────────────────────────────────

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `healthy` when vLLM answers, `degraded` otherwise.
    pub status: &'static str,
    pub proxy_version: &'static str,
    pub uptime_secs: u64,
    pub upstream: UpstreamHealth,
    pub tools: usize,
    pub stats: ProxyStats,
}

#[derive(Debug, Serialize)]
pub struct UpstreamHealth {
    pub url: String,
    pub model: String,
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn chat_completions(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatCompletionRequest>,
) -> Result<Response, ProxyError> {
    let stream = req.stream;
    info!(
        model = %req.model,
        messages = req.messages.len(),
        tools = req.tool_list().len(),
        stream,
        "Chat completion request"
    );
    if req.messages.is_empty() {
        return Err(ProxyError::BadRequest("messages must not be empty".to_string()));
    }

    let response = state.proxy.process(req).await?;
    if stream {
        let events = response_to_sse_stream(response);
        Ok(Sse::new(events).keep_alive(KeepAlive::default()).into_response())
    } else {
        Ok(Json(response).into_response())
    }
}

async fn agent_chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatCompletionRequest>,
) -> Result<Json<AgentOutcome>, ProxyError> {
    if req.messages.is_empty() {
        return Err(ProxyError::BadRequest("messages must not be empty".to_string()));
    }
    info!(messages = req.messages.len(), "Agent chat request");
    Ok(Json(state.proxy.run_agent(req).await?))
}

async fn list_models(State(state): State<Arc<AppState>>) -> Json<ModelList> {
    match state.proxy.backend().models().await {
        Ok(models) if !models.data.is_empty() => Json(models),
        Ok(_) => Json(ModelList::single(state.proxy.default_model(), "vllm-tool-proxy")),
        Err(e) => {
            warn!(error = %e, "Model listing failed, reporting configured model");
            Json(ModelList::single(state.proxy.default_model(), "vllm-tool-proxy"))
        }
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let upstream = state.proxy.backend().health().await;
    let reachable = upstream.is_ok();

    Json(HealthResponse {
        status: if reachable { "healthy" } else { "degraded" },
        proxy_version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.start_time.elapsed().as_secs(),
        upstream: UpstreamHealth {
            url: state.config.upstream.base_url.clone(),
            model: state.config.upstream.model.clone(),
            reachable,
            error: upstream.err().map(|e| e.to_string()),
        },
        tools: state.registry.len(),
        stats: state.proxy.stats(),
    })
}

async fn stats(State(state): State<Arc<AppState>>) -> Json<ProxyStats> {
    Json(state.proxy.stats())
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

async fn index() -> Json<Value> {
    Json(json!({
        "name": "vllm-tool-proxy",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "chat": "POST /v1/chat/completions",
            "agent": "POST /api/chat",
            "models": "GET /v1/models",
            "health": "GET /health",
            "stats": "GET /stats",
            "metrics": "GET /metrics",
            "tools": "GET /api/tools/tools",
            "tool_info": "GET /api/tools/tools/{name}",
            "execute": "POST /api/tools/execute",
            "execute_named": "POST /api/tools/tools/{name}/execute",
            "tool_stats": "GET /api/tools/stats",
            "reset_tool_stats": "POST /api/tools/stats/reset"
        }
    }))
}
