//! SSE MCP transport (§4.8.4): a GET endpoint that proxies an upstream SSE
//! stream (rewriting the `endpoint` event to point back at the gateway) and
//! a POST endpoint that forwards client JSON-RPC to the upstream's message
//! endpoint, multiplexed against the session's `pending_error_messages`.

use crate::core::{Interceptor, RequestOutcome};
use crate::frame::{SseFrame, SseFrameParser};
use gateway_core::auth::Credentials;
use gateway_core::error::GatewayError;
use gateway_core::jsonrpc::JsonRpcRequest;
use gateway_session::{PushMode, ServerResponseType, SessionMetadata, SessionStore};
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, warn};

/// How often the GET pump re-arms its select to check for newly-enqueued
/// pending error messages, per the "bounded-timeout, re-arm on every wake"
/// multiplexing pattern.
const PENDING_ERROR_POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct SseTransport {
    interceptor: Arc<Interceptor>,
    sessions: Arc<SessionStore>,
    http: reqwest::Client,
}

impl SseTransport {
    pub fn new(interceptor: Arc<Interceptor>, sessions: Arc<SessionStore>, http: reqwest::Client) -> Self {
        Self {
            interceptor,
            sessions,
            http,
        }
    }

    /// Opens the upstream SSE connection and returns a channel of already-
    /// wire-encoded frames (`event: X\ndata: Y\n\n`) for the client's GET
    /// stream. The first upstream `endpoint` event is rewritten to
    /// `own_messages_url?session_id=<id>` (the extracted session id is
    /// appended, mirroring the upstream's own query-string convention)
    /// before the session is considered open.
    pub async fn open_get(
        self: Arc<Self>,
        upstream_base_url: String,
        own_messages_url: String,
        dataset: Option<String>,
        push_mode: PushMode,
        credentials: Credentials,
        header_policy: Option<String>,
    ) -> Result<mpsc::Receiver<String>, GatewayError> {
        let resp = self
            .http
            .get(format!("{upstream_base_url}/sse"))
            .send()
            .await
            .map_err(|e| GatewayError::UpstreamTransport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(GatewayError::UpstreamTransport(format!(
                "upstream SSE endpoint returned {}",
                resp.status()
            )));
        }

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(self.pump_get(
            resp,
            own_messages_url,
            dataset,
            push_mode,
            credentials,
            header_policy,
            tx,
        ));
        Ok(rx)
    }

    async fn pump_get(
        self: Arc<Self>,
        resp: reqwest::Response,
        own_messages_url: String,
        dataset: Option<String>,
        push_mode: PushMode,
        credentials: Credentials,
        header_policy: Option<String>,
        tx: mpsc::Sender<String>,
    ) {
        let mut byte_stream = resp.bytes_stream();
        let mut parser = SseFrameParser::new();
        let mut session_id: Option<String> = None;

        loop {
            tokio::select! {
                biased;

                chunk = byte_stream.next() => {
                    let Some(chunk) = chunk else { break };
                    let bytes = match chunk {
                        Ok(b) => b,
                        Err(e) => {
                            error!(error = %e, "upstream SSE stream read failed");
                            break;
                        }
                    };
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    for frame in parser.push(&text) {
                        if session_id.is_none() && frame.event == "endpoint" {
                            let id = extract_session_id(&frame.data).unwrap_or_else(|| frame.data.clone());
                            self.sessions.create(
                                id.clone(),
                                SessionMetadata {
                                    dataset: dataset.clone(),
                                    push_mode,
                                    server_response_type: Some(ServerResponseType::Sse),
                                    ..Default::default()
                                },
                            );
                            session_id = Some(id.clone());
                            let rewritten = SseFrame {
                                event: "endpoint".to_string(),
                                data: format!("{own_messages_url}?session_id={id}"),
                            };
                            if tx.send(rewritten.encode()).await.is_err() {
                                return;
                            }
                            continue;
                        }

                        let Some(id) = session_id.clone() else {
                            // No endpoint event seen yet; forward raw.
                            if tx.send(frame.encode()).await.is_err() { return; }
                            continue;
                        };
                        let Some(session) = self.sessions.get(&id) else { continue };

                        if frame.event != "message" {
                            if tx.send(frame.encode()).await.is_err() { return; }
                            continue;
                        }

                        let out = match serde_json::from_str(&frame.data) {
                            Ok(response) => {
                                let outcome = self
                                    .interceptor
                                    .process_incoming_response(&session, response, header_policy.as_deref(), &credentials)
                                    .await;
                                let body = serde_json::to_string(&outcome.into_response()).unwrap_or_default();
                                SseFrame::message(body)
                            }
                            Err(e) => {
                                warn!(error = %e, "malformed JSON-RPC payload in upstream SSE message event; forwarding raw");
                                frame
                            }
                        };
                        if tx.send(out.encode()).await.is_err() { return; }
                    }
                }

                _ = tokio::time::sleep(PENDING_ERROR_POLL_INTERVAL) => {
                    let Some(id) = session_id.clone() else { continue };
                    let Some(session) = self.sessions.get(&id) else { continue };
                    for pending in session.drain_pending_errors().await {
                        let body = serde_json::to_string(&pending).unwrap_or_default();
                        if tx.send(SseFrame::message(body).encode()).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }

    /// POST `/mcp/sse/messages/?session_id=<id>`: forwards client JSON-RPC
    /// to the upstream's own message endpoint, or — if blocked — enqueues
    /// the error for out-of-band delivery on the GET stream and responds
    /// immediately with HTTP 202.
    pub async fn post_message(
        &self,
        session_id: &str,
        upstream_base_url: &str,
        request: JsonRpcRequest,
        credentials: Credentials,
        header_policy: Option<String>,
    ) -> Result<u16, GatewayError> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| GatewayError::UpstreamTransport(format!("unknown MCP session: {session_id}")))?;

        match self
            .interceptor
            .process_outgoing_request(&session, request, header_policy.as_deref(), &credentials)
            .await
        {
            RequestOutcome::Forward(request) => {
                let resp = self
                    .http
                    .post(format!("{upstream_base_url}/messages?session_id={session_id}"))
                    .json(&request)
                    .send()
                    .await
                    .map_err(|e| GatewayError::UpstreamTransport(e.to_string()))?;
                Ok(resp.status().as_u16())
            }
            RequestOutcome::Blocked(response) => {
                let body: Value = serde_json::to_value(&response).unwrap_or(Value::Null);
                session.add_pending_error(body).await;
                Ok(202)
            }
        }
    }
}

fn extract_session_id(endpoint_data: &str) -> Option<String> {
    let query = endpoint_data.split('?').nth(1)?;
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == "session_id").then(|| v.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_session_id_from_endpoint_url() {
        let id = extract_session_id("/messages?session_id=abc123").unwrap();
        assert_eq!(id, "abc123");
    }

    #[test]
    fn extracts_session_id_among_other_query_params() {
        let id = extract_session_id("/messages?foo=bar&session_id=xyz&baz=qux").unwrap();
        assert_eq!(id, "xyz");
    }

    #[test]
    fn missing_session_id_returns_none() {
        assert!(extract_session_id("/messages?foo=bar").is_none());
    }
}
