//! LLM proxy routes (§4.7): one handler per provider. Each request is
//! evaluated standalone — there is no session concept here, unlike the MCP
//! transports, since a proxied LLM call has no notion of a follow-up turn
//! the gateway needs to remember.
//!
//! OpenAI, Anthropic and Gemini each shape their streaming deltas
//! differently (`OpenAiMerger`/`GeminiMerger` feed a bare JSON chunk,
//! `AnthropicMerger` feeds an `(event, data)` pair), so rather than forcing
//! one generic streaming path, each provider gets its own unary and
//! streaming function built on shared helpers.

use crate::error::ApiError;
use crate::state::AppState;
use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use gateway_core::auth::{parse_push_header, resolve, Credentials};
use gateway_core::error::GatewayError;
use gateway_core::guardrail::{annotations_from_error, Annotation, GuardrailError};
use gateway_core::message::CanonicalMessage;
use gateway_providers::merger::{AnthropicMerger, GeminiMerger, OpenAiMerger};
use gateway_providers::{anthropic, gemini, openai};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com";

/// Headers stripped before forwarding, mirroring the original gateway's
/// `IGNORED_HEADERS` plus the gateway's own `Invariant-*` control headers,
/// none of which the upstream provider should ever see.
const STRIPPED_HEADERS: &[&str] = &[
    "accept-encoding",
    "host",
    "content-length",
    "invariant-authorization",
    "invariant-guardrail-service-authorization",
    "invariant-guardrails",
    "invariant-push",
    "x-forwarded-for",
    "x-forwarded-host",
    "x-forwarded-port",
    "x-forwarded-proto",
    "x-forwarded-server",
    "x-real-ip",
];

struct RequestContext {
    dataset: Option<String>,
    credentials: Credentials,
    push: bool,
    policy_text: String,
}

fn forward_headers(headers: &HeaderMap) -> reqwest::header::HeaderMap {
    let mut out = reqwest::header::HeaderMap::new();
    for (name, value) in headers.iter() {
        if STRIPPED_HEADERS.contains(&name.as_str()) {
            continue;
        }
        if let (Ok(n), Ok(v)) = (
            reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes()),
            reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            out.insert(n, v);
        }
    }
    out.insert(
        reqwest::header::ACCEPT_ENCODING,
        reqwest::header::HeaderValue::from_static("identity"),
    );
    out
}

async fn build_context(
    state: &AppState,
    headers: &HeaderMap,
    dataset: Option<String>,
) -> Result<RequestContext, ApiError> {
    let push = parse_push_header(headers.get("invariant-push").and_then(|v| v.to_str().ok()))
        .map_err(ApiError::from)?;
    let credentials = resolve(headers, dataset.as_deref()).map_err(ApiError::from)?;
    let header_policy = headers.get("invariant-guardrails").and_then(|v| v.to_str().ok());
    let resolved = state
        .policy
        .resolve(header_policy, dataset.as_deref(), credentials.gateway.as_deref())
        .await;
    Ok(RequestContext {
        dataset,
        credentials,
        push,
        policy_text: resolved.rule_set.enabled_policy_text(),
    })
}

fn canonical_to_json(messages: &[CanonicalMessage]) -> Vec<Value> {
    messages.iter().map(|m| serde_json::to_value(m).unwrap_or(Value::Null)).collect()
}

fn blocked_body(message: &str, details: &[GuardrailError]) -> Value {
    json!({ "error": message, "details": serde_json::to_value(details).unwrap_or(Value::Null) })
}

fn push_trace_async(state: &AppState, ctx: &RequestContext, messages: Vec<CanonicalMessage>, annotations: Vec<Annotation>) {
    if !ctx.push {
        return;
    }
    let Some(dataset) = ctx.dataset.clone() else { return };
    let explorer = state.explorer.clone();
    let credential = ctx.credentials.gateway.clone();
    tokio::spawn(async move {
        let messages_json = canonical_to_json(&messages);
        if let Err(e) = explorer
            .push_trace(&messages_json, Some(&dataset), json!({ "source": "llm" }), &annotations, credential.as_deref())
            .await
        {
            warn!(error = %e, dataset, "explorer push_trace failed");
        }
    });
}

/// Runs the request-side guardrail check (§4.7 step 2). On violation, the
/// input-only trace is still pushed and the caller should return the
/// resulting response without ever contacting the upstream provider.
async fn check_input(state: &AppState, ctx: &RequestContext, request_messages: &[CanonicalMessage]) -> Option<Response> {
    let candidate = canonical_to_json(request_messages);
    let eval = state
        .guardrails
        .evaluate(&candidate, &ctx.policy_text, Value::Null, ctx.credentials.guardrails_credential())
        .await;
    let blocking: Vec<GuardrailError> = eval.blocking().into_iter().cloned().collect();
    let annotations: Vec<Annotation> = eval.errors.iter().flat_map(annotations_from_error).collect();

    if blocking.is_empty() {
        return None;
    }

    warn!(dataset = ?ctx.dataset, "LLM request blocked by input guardrails");
    push_trace_async(state, ctx, request_messages.to_vec(), annotations);
    let body = blocked_body("[Invariant] The request did not pass the guardrails", &blocking);
    Some((StatusCode::BAD_REQUEST, Json(body)).into_response())
}

/// Runs the combined request+response guardrail check for a unary reply
/// (§4.7 step 4) and returns the response the client should see.
async fn check_output_unary(
    state: &AppState,
    ctx: &RequestContext,
    request_messages: Vec<CanonicalMessage>,
    response_messages: Vec<CanonicalMessage>,
    status: StatusCode,
    upstream_body: Bytes,
    content_type: Option<&str>,
) -> Response {
    let mut all_messages = request_messages;
    all_messages.extend(response_messages);
    let candidate = canonical_to_json(&all_messages);

    let eval = state
        .guardrails
        .evaluate(&candidate, &ctx.policy_text, Value::Null, ctx.credentials.guardrails_credential())
        .await;
    let blocking: Vec<GuardrailError> = eval.blocking().into_iter().cloned().collect();
    let annotations: Vec<Annotation> = eval.errors.iter().flat_map(annotations_from_error).collect();

    let response = if blocking.is_empty() {
        let mut builder = Response::builder().status(status);
        if let Some(ct) = content_type {
            builder = builder.header(axum::http::header::CONTENT_TYPE, ct);
        }
        builder.body(Body::from(upstream_body)).unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    } else {
        warn!(dataset = ?ctx.dataset, "LLM response blocked by output guardrails");
        let body = blocked_body("[Invariant] The response did not pass the guardrails", &blocking);
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    };

    push_trace_async(state, ctx, all_messages, annotations);
    response
}

async fn send_upstream(state: &AppState, url: &str, headers: reqwest::header::HeaderMap, body: Bytes) -> Result<reqwest::Response, ApiError> {
    state
        .http
        .post(url)
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(|e| ApiError(GatewayError::UpstreamTransport(e.to_string())))
}

// ---------------------------------------------------------------------
// OpenAI
// ---------------------------------------------------------------------

pub async fn openai_chat_completions(
    State(state): State<Arc<AppState>>,
    Path(dataset): Path<Option<String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let ctx = build_context(&state, &headers, dataset).await?;
    let request_json: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let request_messages = openai::request_to_canonical(&request_json);

    if let Some(blocked) = check_input(&state, &ctx, &request_messages).await {
        return Ok(blocked);
    }

    let streaming = request_json.get("stream").and_then(Value::as_bool).unwrap_or(false);
    let upstream = send_upstream(&state, OPENAI_URL, forward_headers(&headers), body).await?;

    if streaming {
        Ok(stream_openai(state, ctx, request_messages, upstream).await)
    } else {
        Ok(unary_openai(&state, &ctx, request_messages, upstream).await)
    }
}

async fn unary_openai(state: &AppState, ctx: &RequestContext, request_messages: Vec<CanonicalMessage>, upstream: reqwest::Response) -> Response {
    let status = StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = upstream
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = match upstream.bytes().await {
        Ok(b) => b,
        Err(e) => return ApiError(GatewayError::UpstreamTransport(e.to_string())).into_response(),
    };

    if !status.is_success() {
        let mut builder = Response::builder().status(status);
        if let Some(ct) = &content_type {
            builder = builder.header(axum::http::header::CONTENT_TYPE, ct);
        }
        return builder.body(Body::from(body)).unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
    }

    let response_json: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let response_messages = openai::response_to_canonical(&response_json);
    check_output_unary(state, ctx, request_messages, response_messages, status, body, content_type.as_deref()).await
}

async fn stream_openai(state: Arc<AppState>, ctx: RequestContext, request_messages: Vec<CanonicalMessage>, upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    if !status.is_success() {
        let body = upstream.bytes().await.unwrap_or_default();
        return (StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY), body).into_response();
    }

    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(256);
    tokio::spawn(async move {
        let mut merger = OpenAiMerger::new();
        let mut byte_stream = upstream.bytes_stream();
        let mut buffer = String::new();
        let mut blocked = false;

        while let Some(chunk) = byte_stream.next().await {
            let bytes = match chunk {
                Ok(b) => b,
                Err(e) => {
                    warn!(error = %e, "openai upstream stream read failed");
                    break;
                }
            };
            if tx.send(Ok(bytes.clone())).await.is_err() {
                return;
            }
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(pos) = buffer.find("\n\n") {
                let raw: String = buffer.drain(..pos + 2).collect();
                for line in raw.lines() {
                    let Some(data) = line.strip_prefix("data:") else { continue };
                    let data = data.trim();
                    if openai::is_stream_sentinel(data) {
                        if check_stream_blocking(&state, &ctx, &request_messages, merger.into_canonical(), &tx, encode_openai_error).await {
                            blocked = true;
                        }
                        return;
                    }
                    if let Ok(parsed) = serde_json::from_str::<Value>(data) {
                        merger.feed(&parsed);
                    }
                }
            }
        }

        if !blocked {
            push_trace_async(&state, &ctx, finish_messages(request_messages, merger.into_canonical()), Vec::new());
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(axum::http::header::CONTENT_TYPE, "text/event-stream")
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn encode_openai_error(message: &str, details: &[GuardrailError]) -> String {
    format!("data: {}\n\n", blocked_body(message, details))
}

// ---------------------------------------------------------------------
// Anthropic
// ---------------------------------------------------------------------

pub async fn anthropic_messages(
    State(state): State<Arc<AppState>>,
    Path(dataset): Path<Option<String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let ctx = build_context(&state, &headers, dataset).await?;
    let request_json: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let request_messages = anthropic::request_to_canonical(&request_json);

    if let Some(blocked) = check_input(&state, &ctx, &request_messages).await {
        return Ok(blocked);
    }

    let streaming = request_json.get("stream").and_then(Value::as_bool).unwrap_or(false);
    let upstream = send_upstream(&state, ANTHROPIC_URL, forward_headers(&headers), body).await?;

    if streaming {
        Ok(stream_anthropic(state, ctx, request_messages, upstream).await)
    } else {
        Ok(unary_anthropic(&state, &ctx, request_messages, upstream).await)
    }
}

async fn unary_anthropic(state: &AppState, ctx: &RequestContext, request_messages: Vec<CanonicalMessage>, upstream: reqwest::Response) -> Response {
    let status = StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = upstream
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = match upstream.bytes().await {
        Ok(b) => b,
        Err(e) => return ApiError(GatewayError::UpstreamTransport(e.to_string())).into_response(),
    };

    if !status.is_success() {
        let mut builder = Response::builder().status(status);
        if let Some(ct) = &content_type {
            builder = builder.header(axum::http::header::CONTENT_TYPE, ct);
        }
        return builder.body(Body::from(body)).unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
    }

    let response_json: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let response_messages = anthropic::response_to_canonical(&response_json);
    check_output_unary(state, ctx, request_messages, response_messages, status, body, content_type.as_deref()).await
}

async fn stream_anthropic(state: Arc<AppState>, ctx: RequestContext, request_messages: Vec<CanonicalMessage>, upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    if !status.is_success() {
        let body = upstream.bytes().await.unwrap_or_default();
        return (StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY), body).into_response();
    }

    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(256);
    tokio::spawn(async move {
        let mut merger = AnthropicMerger::new();
        let mut byte_stream = upstream.bytes_stream();
        let mut parser = gateway_transport::SseFrameParser::new();
        let mut blocked = false;

        while let Some(chunk) = byte_stream.next().await {
            let bytes = match chunk {
                Ok(b) => b,
                Err(e) => {
                    warn!(error = %e, "anthropic upstream stream read failed");
                    break;
                }
            };
            if tx.send(Ok(bytes.clone())).await.is_err() {
                return;
            }
            let text = String::from_utf8_lossy(&bytes).into_owned();
            for frame in parser.push(&text) {
                if anthropic::is_stream_sentinel(&frame.event) {
                    if check_stream_blocking(&state, &ctx, &request_messages, merger.into_canonical(), &tx, encode_anthropic_error).await {
                        blocked = true;
                    }
                    return;
                }
                if let Ok(data) = serde_json::from_str::<Value>(&frame.data) {
                    merger.feed(&frame.event, &data);
                }
            }
        }

        if !blocked {
            push_trace_async(&state, &ctx, finish_messages(request_messages, merger.into_canonical()), Vec::new());
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(axum::http::header::CONTENT_TYPE, "text/event-stream")
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn encode_anthropic_error(message: &str, details: &[GuardrailError]) -> String {
    format!("event: error\ndata: {}\n\n", blocked_body(message, details))
}

// ---------------------------------------------------------------------
// Gemini
// ---------------------------------------------------------------------

#[derive(serde::Deserialize)]
pub struct GeminiQuery {
    alt: Option<String>,
}

/// Bare route (no dataset segment): `/gemini/{api_version}/models/{model}:{endpoint}`.
pub async fn gemini_generate_content(
    state: State<Arc<AppState>>,
    Path((api_version, model_and_endpoint)): Path<(String, String)>,
    query: Query<GeminiQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    gemini_impl(state, None, api_version, model_and_endpoint, query, headers, body).await
}

/// Dataset-prefixed route: `/{dataset}/gemini/{api_version}/models/{model}:{endpoint}`.
pub async fn gemini_generate_content_with_dataset(
    state: State<Arc<AppState>>,
    Path((dataset, api_version, model_and_endpoint)): Path<(String, String, String)>,
    query: Query<GeminiQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    gemini_impl(state, Some(dataset), api_version, model_and_endpoint, query, headers, body).await
}

async fn gemini_impl(
    State(state): State<Arc<AppState>>,
    dataset: Option<String>,
    api_version: String,
    model_and_endpoint: String,
    Query(query): Query<GeminiQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    // axum's router can't capture two params in one path segment, so the
    // wire's `{model}:{endpoint}` segment arrives as one string and is split
    // here on its last colon (model names themselves never contain one).
    let Some((model, endpoint)) = model_and_endpoint.rsplit_once(':') else {
        return Ok((StatusCode::BAD_REQUEST, "Invalid endpoint - the only endpoints supported are generateContent or streamGenerateContent").into_response());
    };
    let model = model.to_string();

    if endpoint != "generateContent" && endpoint != "streamGenerateContent" {
        return Ok((
            StatusCode::BAD_REQUEST,
            "Invalid endpoint - the only endpoints supported are generateContent or streamGenerateContent",
        )
            .into_response());
    }

    let ctx = build_context(&state, &headers, dataset).await?;
    let request_json: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let request_messages = gemini::request_to_canonical(&request_json);

    if let Some(blocked) = check_input(&state, &ctx, &request_messages).await {
        return Ok(blocked);
    }

    let alt_sse = query.alt.as_deref() == Some("sse");
    let streaming = alt_sse || endpoint == "streamGenerateContent";

    let mut url = format!("{GEMINI_BASE}/{api_version}/models/{model}:{endpoint}");
    if alt_sse {
        url.push_str("?alt=sse");
    }
    let upstream = send_upstream(&state, &url, forward_headers(&headers), body).await?;

    if streaming {
        Ok(stream_gemini(state, ctx, request_messages, upstream).await)
    } else {
        Ok(unary_gemini(&state, &ctx, request_messages, upstream).await)
    }
}

async fn unary_gemini(state: &AppState, ctx: &RequestContext, request_messages: Vec<CanonicalMessage>, upstream: reqwest::Response) -> Response {
    let status = StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = upstream
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = match upstream.bytes().await {
        Ok(b) => b,
        Err(e) => return ApiError(GatewayError::UpstreamTransport(e.to_string())).into_response(),
    };

    if !status.is_success() {
        let mut builder = Response::builder().status(status);
        if let Some(ct) = &content_type {
            builder = builder.header(axum::http::header::CONTENT_TYPE, ct);
        }
        return builder.body(Body::from(body)).unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
    }

    let response_json: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let response_messages = gemini::response_to_canonical(&response_json);
    check_output_unary(state, ctx, request_messages, response_messages, status, body, content_type.as_deref()).await
}

async fn stream_gemini(state: Arc<AppState>, ctx: RequestContext, request_messages: Vec<CanonicalMessage>, upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    if !status.is_success() {
        let body = upstream.bytes().await.unwrap_or_default();
        return (StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY), body).into_response();
    }

    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(256);
    tokio::spawn(async move {
        let mut merger = GeminiMerger::new();
        let mut byte_stream = upstream.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk) = byte_stream.next().await {
            let bytes = match chunk {
                Ok(b) => b,
                Err(e) => {
                    warn!(error = %e, "gemini upstream stream read failed");
                    break;
                }
            };
            if tx.send(Ok(bytes.clone())).await.is_err() {
                return;
            }
            buffer.push_str(&String::from_utf8_lossy(&bytes));
            while let Some(pos) = buffer.find('\n') {
                let line: String = buffer.drain(..=pos).collect();
                let line = line.trim();
                let Some(data) = line.strip_prefix("data:") else { continue };
                if let Ok(parsed) = serde_json::from_str::<Value>(data.trim()) {
                    merger.feed(&parsed);
                }
            }
        }

        // Gemini has no explicit stream sentinel; end-of-body marks the end,
        // so the blocking check runs once after the stream closes rather
        // than in-band (there is no further frame left to rewrite).
        let all_messages = finish_messages(request_messages, merger.into_canonical());
        let candidate = canonical_to_json(&all_messages);
        let eval = state
            .guardrails
            .evaluate(&candidate, &ctx.policy_text, Value::Null, ctx.credentials.guardrails_credential())
            .await;
        let annotations: Vec<Annotation> = eval.errors.iter().flat_map(annotations_from_error).collect();
        push_trace_async(&state, &ctx, all_messages, annotations);
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(axum::http::header::CONTENT_TYPE, "text/event-stream")
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

// ---------------------------------------------------------------------
// Shared streaming helpers
// ---------------------------------------------------------------------

fn finish_messages(mut request_messages: Vec<CanonicalMessage>, response_messages: Vec<CanonicalMessage>) -> Vec<CanonicalMessage> {
    request_messages.extend(response_messages);
    request_messages
}

/// Runs the final-sentinel blocking check shared by OpenAI and Anthropic
/// streaming: on violation, emits the provider's in-band error event and
/// terminates the stream; either way the trace is pushed. Returns whether
/// the stream was blocked.
async fn check_stream_blocking(
    state: &AppState,
    ctx: &RequestContext,
    request_messages: &[CanonicalMessage],
    response_messages: Vec<CanonicalMessage>,
    tx: &mpsc::Sender<Result<Bytes, std::io::Error>>,
    encode_error: fn(&str, &[GuardrailError]) -> String,
) -> bool {
    let all_messages = finish_messages(request_messages.to_vec(), response_messages);
    let candidate = canonical_to_json(&all_messages);
    let eval = state
        .guardrails
        .evaluate(&candidate, &ctx.policy_text, Value::Null, ctx.credentials.guardrails_credential())
        .await;
    let blocking: Vec<GuardrailError> = eval.blocking().into_iter().cloned().collect();
    let annotations: Vec<Annotation> = eval.errors.iter().flat_map(annotations_from_error).collect();

    let blocked = !blocking.is_empty();
    if blocked {
        warn!(dataset = ?ctx.dataset, "LLM stream blocked by output guardrails");
        let frame = encode_error("[Invariant] The response did not pass the guardrails", &blocking);
        let _ = tx.send(Ok(Bytes::from(frame))).await;
    }

    push_trace_async(state, ctx, all_messages, annotations);
    blocked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_headers_strips_control_headers_and_forces_identity_encoding() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer sk-x".parse().unwrap());
        headers.insert("invariant-authorization", "Bearer gw".parse().unwrap());
        headers.insert("accept-encoding", "gzip".parse().unwrap());

        let forwarded = forward_headers(&headers);
        assert!(forwarded.contains_key("authorization"));
        assert!(!forwarded.contains_key("invariant-authorization"));
        assert_eq!(forwarded.get("accept-encoding").unwrap(), "identity");
    }

    #[test]
    fn blocked_body_carries_message_and_details() {
        let err = GuardrailError {
            args: vec!["bad stuff".into()],
            kwargs: Default::default(),
            ranges: vec![],
            guardrail: gateway_core::guardrail::GuardrailRef {
                id: "g".into(),
                name: "g".into(),
                action: gateway_core::guardrail::GuardrailAction::Block,
            },
        };
        let body = blocked_body("[Invariant] The request did not pass the guardrails", &[err]);
        assert_eq!(body["error"], "[Invariant] The request did not pass the guardrails");
        assert_eq!(body["details"][0]["args"][0], "bad stuff");
    }
}
