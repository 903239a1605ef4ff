//! Streamable-HTTP MCP transport (§4.8.5): one POST endpoint that handles
//! both unary JSON and server-to-client SSE responses, plus a GET channel
//! for server-initiated events and a DELETE that tears the session down.

use crate::core::{Interceptor, RequestOutcome};
use crate::frame::{SseFrame, SseFrameParser};
use gateway_core::auth::Credentials;
use gateway_core::error::GatewayError;
use gateway_core::jsonrpc::JsonRpcRequest;
use gateway_session::{generate_session_id, PushMode, Session, SessionMetadata, SessionStore};
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, warn};

const PENDING_ERROR_POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct StreamableHttpTransport {
    interceptor: Arc<Interceptor>,
    sessions: Arc<SessionStore>,
    http: reqwest::Client,
}

/// The gateway's reply to a POST, before an HTTP layer picks a status code
/// and header set around it.
pub enum PostResponse {
    Json {
        body: Value,
        session_header: Option<String>,
    },
    Sse {
        stream: mpsc::Receiver<String>,
        session_header: Option<String>,
    },
}

impl StreamableHttpTransport {
    pub fn new(interceptor: Arc<Interceptor>, sessions: Arc<SessionStore>, http: reqwest::Client) -> Self {
        Self {
            interceptor,
            sessions,
            http,
        }
    }

    pub async fn handle_post(
        &self,
        upstream_base_url: &str,
        client_session_id: Option<String>,
        request: JsonRpcRequest,
        credentials: Credentials,
        header_policy: Option<String>,
        dataset: Option<String>,
        push_mode: PushMode,
    ) -> Result<PostResponse, GatewayError> {
        let generated = client_session_id.is_none();
        let session_id = client_session_id.unwrap_or_else(generate_session_id);

        let session = self.sessions.get_or_create(&session_id, || SessionMetadata {
            dataset: dataset.clone(),
            push_mode,
            id_is_gateway_generated: generated,
            ..Default::default()
        });

        let outcome = self
            .interceptor
            .process_outgoing_request(&session, request, header_policy.as_deref(), &credentials)
            .await;

        let request = match outcome {
            RequestOutcome::Blocked(response) => {
                let body = serde_json::to_value(&response).unwrap_or(Value::Null);
                return Ok(PostResponse::Json {
                    body,
                    session_header: generated.then(|| session_id.clone()),
                });
            }
            RequestOutcome::Forward(request) => request,
        };

        let mut builder = self
            .http
            .post(upstream_base_url)
            .header("accept", "application/json, text/event-stream")
            .json(&request);
        if !generated {
            builder = builder.header("mcp-session-id", session_id.as_str());
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| GatewayError::UpstreamTransport(e.to_string()))?;

        let upstream_session_id = resp
            .headers()
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if let Some(upstream_id) = &upstream_session_id {
            if upstream_id != &session_id {
                self.sessions.alias(&session_id, upstream_id.clone());
                session.update_metadata(|m| m.id_is_gateway_generated = false).await;
            }
        }
        let session_header = upstream_session_id.or_else(|| generated.then(|| session_id.clone()));

        let is_sse = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("text/event-stream"))
            .unwrap_or(false);

        if is_sse {
            let (tx, rx) = mpsc::channel(256);
            tokio::spawn(pump_post_sse(
                resp,
                session,
                self.interceptor.clone(),
                credentials,
                header_policy,
                tx,
            ));
            Ok(PostResponse::Sse {
                stream: rx,
                session_header,
            })
        } else {
            let response = resp
                .json()
                .await
                .map_err(|e| GatewayError::UpstreamTransport(e.to_string()))?;
            let outcome = self
                .interceptor
                .process_incoming_response(&session, response, header_policy.as_deref(), &credentials)
                .await;
            let body = serde_json::to_value(&outcome.into_response()).unwrap_or(Value::Null);
            Ok(PostResponse::Json { body, session_header })
        }
    }

    /// `GET /mcp/streamable`: a server-initiated channel carrying only
    /// out-of-band messages queued by a concurrent blocked POST, since the
    /// gateway has no independent upstream GET contract to proxy here.
    pub async fn handle_get(&self, session_id: &str) -> Result<mpsc::Receiver<String>, GatewayError> {
        if !self.sessions.exists(session_id) {
            return Err(GatewayError::UpstreamTransport(format!("unknown MCP session: {session_id}")));
        }
        let (tx, rx) = mpsc::channel(64);
        let sessions = self.sessions.clone();
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(PENDING_ERROR_POLL_INTERVAL).await;
                let Some(session) = sessions.get(&session_id) else { break };
                for pending in session.drain_pending_errors().await {
                    let body = serde_json::to_string(&pending).unwrap_or_default();
                    if tx.send(SseFrame::message(body).encode()).await.is_err() {
                        return;
                    }
                }
            }
        });
        Ok(rx)
    }

    /// `DELETE /mcp/streamable`: if the id was gateway-generated the upstream
    /// was never told about it, so termination is purely local.
    pub async fn handle_delete(&self, session_id: &str, upstream_base_url: &str) -> Result<(), GatewayError> {
        if let Some(session) = self.sessions.get(session_id) {
            let generated = session.metadata().await.id_is_gateway_generated;
            if !generated {
                if let Err(e) = self
                    .http
                    .delete(upstream_base_url)
                    .header("mcp-session-id", session_id)
                    .send()
                    .await
                {
                    warn!(error = %e, session_id, "upstream DELETE failed; destroying session locally anyway");
                }
            }
        }
        self.sessions.destroy(session_id);
        Ok(())
    }
}

async fn pump_post_sse(
    resp: reqwest::Response,
    session: Arc<Session>,
    interceptor: Arc<Interceptor>,
    credentials: Credentials,
    header_policy: Option<String>,
    tx: mpsc::Sender<String>,
) {
    let mut byte_stream = resp.bytes_stream();
    let mut parser = SseFrameParser::new();

    while let Some(chunk) = byte_stream.next().await {
        let bytes = match chunk {
            Ok(b) => b,
            Err(e) => {
                error!(error = %e, "upstream streamable-HTTP SSE read failed");
                break;
            }
        };
        let text = String::from_utf8_lossy(&bytes).into_owned();
        for frame in parser.push(&text) {
            if frame.event != "message" {
                if tx.send(frame.encode()).await.is_err() {
                    return;
                }
                continue;
            }
            let out = match serde_json::from_str(&frame.data) {
                Ok(response) => {
                    let outcome = interceptor
                        .process_incoming_response(&session, response, header_policy.as_deref(), &credentials)
                        .await;
                    SseFrame::message(serde_json::to_string(&outcome.into_response()).unwrap_or_default())
                }
                Err(e) => {
                    warn!(error = %e, "malformed JSON-RPC payload in streamable-HTTP SSE event; forwarding raw");
                    frame
                }
            };
            if tx.send(out.encode()).await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_guardrails::{ExplorerClient, GuardrailsClient, PolicySourceResolver};

    fn transport() -> StreamableHttpTransport {
        let explorer = Arc::new(ExplorerClient::new("http://127.0.0.1:1"));
        let interceptor = Arc::new(Interceptor::new(
            Arc::new(GuardrailsClient::new("http://127.0.0.1:1")),
            Arc::new(PolicySourceResolver::new(explorer.clone(), None)),
            explorer,
        ));
        StreamableHttpTransport::new(interceptor, Arc::new(SessionStore::new()), reqwest::Client::new())
    }

    #[tokio::test]
    async fn get_on_unknown_session_errors() {
        let transport = transport();
        let result = transport.handle_get("nonexistent").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn delete_on_unknown_session_is_a_no_op() {
        let transport = transport();
        assert!(transport.handle_delete("nonexistent", "http://127.0.0.1:1").await.is_ok());
    }
}
