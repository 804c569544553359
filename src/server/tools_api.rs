//! Tool registry HTTP API, mounted under `/api/tools`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

use crate::error::ProxyError;
use crate::server::openai_api::AppState;
use crate::tools::registry::{RegistryStats, ToolInfo};
use crate::tools::ToolResult;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tools", get(list_tools))
        .route("/tools/{name}", get(tool_info))
        .route("/tools/{name}/execute", post(execute_named))
        .route("/execute", post(execute))
        .route("/stats", get(tool_stats))
        .route("/stats/reset", post(reset_stats))
}

/// Body of `POST /api/tools/execute`.
#[derive(Debug, Deserialize)]
pub struct ToolExecuteRequest {
    pub tool_name: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct ToolListResponse {
    pub tools: Vec<ToolInfo>,
    pub total_count: usize,
    pub categories: Vec<String>,
}

async fn list_tools(State(state): State<Arc<AppState>>) -> Json<ToolListResponse> {
    let tools = state.registry.infos();
    Json(ToolListResponse {
        total_count: tools.len(),
        tools,
        categories: state.registry.categories(),
    })
}

async fn tool_info(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<ToolInfo>, ProxyError> {
    state
        .registry
        .info(&name)
        .map(Json)
        .ok_or(ProxyError::ToolNotFound(name))
}

/// Unknown tools are reported in the result body, not as an HTTP error.
async fn execute(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ToolExecuteRequest>,
) -> Json<ToolResult> {
    info!(tool = %req.tool_name, "Tool execution request");
    Json(state.registry.execute(&req.tool_name, &req.parameters).await)
}

async fn execute_named(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    parameters: Option<Json<Map<String, Value>>>,
) -> Result<Json<ToolResult>, ProxyError> {
    if !state.registry.contains(&name) {
        return Err(ProxyError::ToolNotFound(name));
    }
    let parameters = parameters.map(|Json(p)| p).unwrap_or_default();
    info!(tool = %name, "Tool execution request");
    Ok(Json(state.registry.execute(&name, &parameters).await))
}

async fn tool_stats(State(state): State<Arc<AppState>>) -> Json<RegistryStats> {
    Json(state.registry.stats())
}

async fn reset_stats(State(state): State<Arc<AppState>>) -> Json<Value> {
    state.registry.reset_stats();
    Json(json!({"status": "success", "message": "Statistics reset"}))
}
