//! HTTP server: OpenAI-compatible proxy plus the tools API.
//!
//! - [`openai_api`]: Shared state, router and chat/status handlers
//! - [`tools_api`]: Tool registry endpoints under `/api/tools`
//! - [`streaming`]: SSE re-chunking of completed responses

pub mod openai_api;
pub mod streaming;
pub mod tools_api;

pub use openai_api::{build_router, AppState};
