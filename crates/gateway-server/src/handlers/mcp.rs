//! MCP transport routes (§4.8.4, §4.8.5): thin axum wrappers around
//! [`gateway_transport::SseTransport`] and
//! [`gateway_transport::StreamableHttpTransport`]. All the interception
//! logic lives in those transports and in [`gateway_transport::Interceptor`]
//! — this module only extracts headers/query params, calls through, and
//! shapes the HTTP response, including the `X-Proxied-By: mcp-gateway`
//! header §6 requires on every MCP response.

use crate::config::rewrite_localhost_url;
use crate::error::ApiError;
use crate::state::AppState;
use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use futures::StreamExt;
use gateway_core::auth::{resolve, Credentials};
use gateway_core::error::GatewayError;
use gateway_core::jsonrpc::JsonRpcRequest;
use gateway_guardrails::policy::decode_header_policy;
use gateway_session::PushMode;
use gateway_transport::PostResponse;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;

const PROXIED_BY_HEADER: &str = "x-proxied-by";
const PROXIED_BY_VALUE: &str = "mcp-gateway";
const SSE_MESSAGES_PATH: &str = "/api/v1/gateway/mcp/sse/messages/";

fn mcp_server_base_url(state: &AppState, headers: &HeaderMap) -> Result<String, ApiError> {
    let raw = headers
        .get("mcp-server-base-url")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError(GatewayError::ClientAuth("Missing 'mcp-server-base-url' header".to_string())))?;
    Ok(rewrite_localhost_url(raw, state.config.rewrite_localhost))
}

fn mcp_dataset(headers: &HeaderMap) -> Option<String> {
    headers.get("project-name").and_then(|v| v.to_str().ok()).map(str::to_string)
}

fn mcp_push_mode(headers: &HeaderMap) -> PushMode {
    let enabled = headers
        .get("push-explorer")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    if enabled { PushMode::Push } else { PushMode::Skip }
}

fn mcp_header_policy(headers: &HeaderMap) -> Option<String> {
    headers
        .get("invariant-guardrails")
        .and_then(|v| v.to_str().ok())
        .map(decode_header_policy)
}

fn mcp_credentials(headers: &HeaderMap) -> Result<Credentials, ApiError> {
    Ok(resolve(headers, None)?)
}

fn parse_jsonrpc(body: &Bytes) -> Result<JsonRpcRequest, Response> {
    serde_json::from_slice(body).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("invalid JSON-RPC request: {e}") })),
        )
            .into_response()
    })
}

fn proxied(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(PROXIED_BY_HEADER, PROXIED_BY_VALUE.parse().expect("static header value"));
    response
}

fn sse_stream_response(rx: tokio::sync::mpsc::Receiver<String>) -> Response {
    let body = Body::from_stream(ReceiverStream::new(rx).map(|s| Ok::<Bytes, std::io::Error>(Bytes::from(s))));
    Response::builder()
        .status(StatusCode::OK)
        .header(axum::http::header::CONTENT_TYPE, "text/event-stream")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

// ---------------------------------------------------------------------
// SSE transport
// ---------------------------------------------------------------------

pub async fn sse_get(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Response, ApiError> {
    let base_url = mcp_server_base_url(&state, &headers)?;
    let dataset = mcp_dataset(&headers);
    let push_mode = mcp_push_mode(&headers);
    let credentials = mcp_credentials(&headers)?;
    let header_policy = mcp_header_policy(&headers);

    let rx = state
        .sse
        .clone()
        .open_get(base_url, SSE_MESSAGES_PATH.to_string(), dataset, push_mode, credentials, header_policy)
        .await?;

    Ok(proxied(sse_stream_response(rx)))
}

#[derive(Deserialize)]
pub struct SseMessagesQuery {
    session_id: Option<String>,
}

pub async fn sse_post_message(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SseMessagesQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let Some(session_id) = query.session_id else {
        return Ok(proxied(
            (StatusCode::BAD_REQUEST, Json(json!({ "error": "Missing 'session_id' query parameter" }))).into_response(),
        ));
    };
    let base_url = mcp_server_base_url(&state, &headers)?;
    let credentials = mcp_credentials(&headers)?;
    let header_policy = mcp_header_policy(&headers);

    let request = match parse_jsonrpc(&body) {
        Ok(r) => r,
        Err(resp) => return Ok(proxied(resp)),
    };

    let status = state
        .sse
        .post_message(&session_id, &base_url, request, credentials, header_policy)
        .await?;

    Ok(proxied(StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY).into_response()))
}

// ---------------------------------------------------------------------
// Streamable-HTTP transport
// ---------------------------------------------------------------------

fn mcp_session_id(headers: &HeaderMap) -> Option<String> {
    headers.get("mcp-session-id").and_then(|v| v.to_str().ok()).map(str::to_string)
}

pub async fn streamable_post(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let base_url = mcp_server_base_url(&state, &headers)?;
    let dataset = mcp_dataset(&headers);
    let push_mode = mcp_push_mode(&headers);
    let credentials = mcp_credentials(&headers)?;
    let header_policy = mcp_header_policy(&headers);
    let client_session_id = mcp_session_id(&headers);

    let request = match parse_jsonrpc(&body) {
        Ok(r) => r,
        Err(resp) => return Ok(proxied(resp)),
    };

    let outcome = state
        .streamable
        .handle_post(&base_url, client_session_id, request, credentials, header_policy, dataset, push_mode)
        .await?;

    let response = match outcome {
        PostResponse::Json { body, session_header } => {
            let mut response = Json(body).into_response();
            if let Some(id) = session_header {
                if let Ok(value) = id.parse() {
                    response.headers_mut().insert("mcp-session-id", value);
                }
            }
            response
        }
        PostResponse::Sse { stream, session_header } => {
            let mut response = sse_stream_response(stream);
            if let Some(id) = session_header {
                if let Ok(value) = id.parse() {
                    response.headers_mut().insert("mcp-session-id", value);
                }
            }
            response
        }
    };

    Ok(proxied(response))
}

pub async fn streamable_get(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Response, ApiError> {
    let Some(session_id) = mcp_session_id(&headers) else {
        return Ok(proxied(
            (StatusCode::BAD_REQUEST, Json(json!({ "error": "Missing 'mcp-session-id' header" }))).into_response(),
        ));
    };
    let rx = state.streamable.handle_get(&session_id).await?;
    Ok(proxied(sse_stream_response(rx)))
}

pub async fn streamable_delete(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Response, ApiError> {
    let Some(session_id) = mcp_session_id(&headers) else {
        return Ok(proxied(
            (StatusCode::BAD_REQUEST, Json(json!({ "error": "Missing 'mcp-session-id' header" }))).into_response(),
        ));
    };
    let base_url = mcp_server_base_url(&state, &headers)?;
    state.streamable.handle_delete(&session_id, &base_url).await?;
    Ok(proxied(StatusCode::OK.into_response()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for (k, v) in pairs {
            h.insert(axum::http::HeaderName::from_bytes(k.as_bytes()).unwrap(), v.parse().unwrap());
        }
        h
    }

    #[test]
    fn push_mode_defaults_to_skip() {
        assert_eq!(mcp_push_mode(&headers(&[])), PushMode::Skip);
    }

    #[test]
    fn push_mode_true_is_case_insensitive() {
        assert_eq!(mcp_push_mode(&headers(&[("push-explorer", "TRUE")])), PushMode::Push);
    }

    #[test]
    fn dataset_reads_project_name_header() {
        assert_eq!(mcp_dataset(&headers(&[("project-name", "my-dataset")])).as_deref(), Some("my-dataset"));
    }
}
