//! Mounts every route under `/api/v1/gateway` per §6. The three LLM
//! providers each get a dataset-prefixed and a bare variant, mirroring the
//! dual route registration the original gateway used so that a request
//! with no dataset segment still matches.

use crate::handlers::{health, llm, mcp};
use crate::state::AppState;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

pub fn build(state: Arc<AppState>) -> Router {
    let gateway = Router::new()
        .route("/{dataset}/openai/chat/completions", post(llm::openai_chat_completions))
        .route("/openai/chat/completions", post(llm::openai_chat_completions))
        .route("/{dataset}/anthropic/v1/messages", post(llm::anthropic_messages))
        .route("/anthropic/v1/messages", post(llm::anthropic_messages))
        .route(
            "/{dataset}/gemini/{api_version}/models/{model_and_endpoint}",
            post(llm::gemini_generate_content_with_dataset),
        )
        .route("/gemini/{api_version}/models/{model_and_endpoint}", post(llm::gemini_generate_content))
        .route("/mcp/sse", get(mcp::sse_get))
        .route("/mcp/sse/messages/", post(mcp::sse_post_message))
        .route(
            "/mcp/streamable",
            post(mcp::streamable_post).get(mcp::streamable_get).delete(mcp::streamable_delete),
        )
        .route("/gateway/health", get(health::health));

    Router::new()
        .nest("/api/v1/gateway", gateway)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
