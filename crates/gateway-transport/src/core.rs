//! The transport-agnostic interception template (§4.8): every strategy
//! (stdio, SSE, streamable HTTP) calls `process_outgoing_request` on the way
//! in and `process_incoming_response` on the way back, and plugs in its own
//! framing around these two calls.

use gateway_core::auth::Credentials;
use gateway_core::guardrail::{annotations_from_error, render_errors, Annotation, GuardrailError};
use gateway_core::jsonrpc::{JsonRpcRequest, JsonRpcResponse, JsonRpcResponsePayload, RequestId};
use gateway_core::message::{tool_call_id, CanonicalMessage, FunctionCall, ToolCall, ToolCallKind};
use gateway_guardrails::{GuardrailsClient, PolicySourceResolver};
use gateway_session::{PushMode, Session, SessionMetadata, TraceSink};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

const TOOLS_CALL: &str = "tools/call";
const TOOLS_LIST: &str = "tools/list";
const INITIALIZE: &str = "initialize";

const BLOCKED_TOOL_MESSAGE_PREFIX: &str =
    "[Invariant Guardrails] The MCP tool call was blocked for security reasons. \
     Do not attempt to circumvent this block, rather explain to the user based on \
     the following output what went wrong:";

/// Outcome of intercepting an outgoing (client→server) JSON-RPC request.
pub enum RequestOutcome {
    /// Forward this (possibly unchanged) request upstream.
    Forward(JsonRpcRequest),
    /// A blocking guardrail fired; this is the JSON-RPC error to hand back
    /// to the client without ever contacting the upstream server.
    Blocked(JsonRpcResponse),
}

/// Outcome of intercepting an incoming (server→client) JSON-RPC response.
pub enum ResponseOutcome {
    /// Deliver this (possibly rewritten, e.g. neutered tools/list) response.
    Forward(JsonRpcResponse),
}

impl ResponseOutcome {
    pub fn into_response(self) -> JsonRpcResponse {
        match self {
            ResponseOutcome::Forward(r) => r,
        }
    }
}

/// Bundles the collaborators every transport strategy needs to run the
/// shared interception template: the guardrails evaluator, the policy
/// source resolver, and the Explorer sink traces get pushed through.
pub struct Interceptor {
    pub guardrails: Arc<GuardrailsClient>,
    pub policy: Arc<PolicySourceResolver>,
    pub sink: Arc<dyn TraceSink>,
}

impl Interceptor {
    pub fn new(
        guardrails: Arc<GuardrailsClient>,
        policy: Arc<PolicySourceResolver>,
        sink: Arc<dyn TraceSink>,
    ) -> Self {
        Self {
            guardrails,
            policy,
            sink,
        }
    }

    /// §4.8 `process_outgoing_request`.
    pub async fn process_outgoing_request(
        &self,
        session: &Session,
        request: JsonRpcRequest,
        header_policy: Option<&str>,
        credentials: &Credentials,
    ) -> RequestOutcome {
        session.record_method(request.id.to_string(), request.method.clone()).await;

        if request.method == INITIALIZE {
            if let Some(name) = request
                .params
                .as_ref()
                .and_then(|p| p.get("clientInfo"))
                .and_then(|c| c.get("name"))
                .and_then(Value::as_str)
            {
                let name = name.to_string();
                session.update_metadata(|m| m.mcp_client = Some(name)).await;
            }
        }

        if request.method != TOOLS_CALL && request.method != TOOLS_LIST {
            return RequestOutcome::Forward(request);
        }

        let metadata = session.metadata().await;
        let resolved = self
            .policy
            .resolve(header_policy, metadata.dataset.as_deref(), credentials.gateway.as_deref())
            .await;
        let policy_text = resolved.rule_set.enabled_policy_text();

        self.tool_call_request_hook(session, request, &policy_text, credentials, &metadata.dataset)
            .await
    }

    /// §4.8.1 Tool-call request hook, also used for the synthetic
    /// `tools/list` message.
    async fn tool_call_request_hook(
        &self,
        session: &Session,
        request: JsonRpcRequest,
        policy_text: &str,
        credentials: &Credentials,
        dataset: &Option<String>,
    ) -> RequestOutcome {
        let message = build_tool_call_message(&request);

        let mut candidate_trace = session.trace_snapshot().await;
        candidate_trace.push(message.clone());
        let candidate_json: Vec<Value> = candidate_trace
            .iter()
            .map(|m| serde_json::to_value(m).unwrap_or(Value::Null))
            .collect();

        let eval = self
            .guardrails
            .evaluate(
                &candidate_json,
                policy_text,
                json!({ "session_id": session.id, "action": request.method }),
                credentials.guardrails_credential(),
            )
            .await;

        let blocking: Vec<GuardrailError> = eval.blocking().into_iter().cloned().collect();
        let annotations: Vec<Annotation> = eval.errors.iter().flat_map(annotations_from_error).collect();

        let outcome = if blocking.is_empty() {
            RequestOutcome::Forward(request)
        } else {
            let rendered = render_errors(&blocking);
            warn!(session = %session.id, method = %request.method, "tool call blocked by guardrails");
            RequestOutcome::Blocked(JsonRpcResponse::blocked(
                request.id.clone(),
                format!("{BLOCKED_TOOL_MESSAGE_PREFIX} {rendered}"),
            ))
        };

        let metadata = session.metadata().await;
        session
            .append_and_push(
                self.sink.as_ref(),
                vec![message],
                annotations,
                dataset.as_deref(),
                push_metadata_for(&metadata),
                credentials.gateway.as_deref(),
                metadata.push_mode,
            )
            .await;

        outcome
    }

    /// §4.8 `process_incoming_response`.
    pub async fn process_incoming_response(
        &self,
        session: &Session,
        response: JsonRpcResponse,
        header_policy: Option<&str>,
        credentials: &Credentials,
    ) -> ResponseOutcome {
        if let JsonRpcResponsePayload::Success { result } = &response.payload {
            if let Some(name) = result.get("serverInfo").and_then(|s| s.get("name")).and_then(Value::as_str) {
                let name = name.to_string();
                session.update_metadata(|m| m.mcp_server = Some(name)).await;
            }
        }

        let method = match response.id.as_ref() {
            Some(id) => session.method_for(&id.to_string()).await,
            None => None,
        };

        match method.as_deref() {
            Some(TOOLS_CALL) | Some(TOOLS_LIST) => {
                let metadata = session.metadata().await;
                let resolved = self
                    .policy
                    .resolve(header_policy, metadata.dataset.as_deref(), credentials.gateway.as_deref())
                    .await;
                let policy_text = resolved.rule_set.enabled_policy_text();
                self.tool_result_response_hook(
                    session,
                    response,
                    method.as_deref().unwrap_or(""),
                    &policy_text,
                    credentials,
                    &metadata.dataset,
                )
                .await
            }
            _ => ResponseOutcome::Forward(response),
        }
    }

    /// §4.8.2 Tool-result response hook.
    async fn tool_result_response_hook(
        &self,
        session: &Session,
        response: JsonRpcResponse,
        method: &str,
        policy_text: &str,
        credentials: &Credentials,
        dataset: &Option<String>,
    ) -> ResponseOutcome {
        let (content, error) = match &response.payload {
            JsonRpcResponsePayload::Success { result } => (
                result.get("content").cloned().unwrap_or(Value::Null),
                result.get("error").cloned(),
            ),
            JsonRpcResponsePayload::Error { error } => (Value::Null, Some(json!({ "message": error.message }))),
        };

        let resp_id = response.id.clone().unwrap_or(RequestId::Number(0));
        let message = CanonicalMessage::tool_result(
            tool_call_id(&resp_id.to_string()),
            gateway_core::message::Content::Text(content_to_text(&content)),
            error,
        );

        let mut candidate_trace = session.trace_snapshot().await;
        candidate_trace.push(message.clone());
        let candidate_json: Vec<Value> = candidate_trace
            .iter()
            .map(|m| serde_json::to_value(m).unwrap_or(Value::Null))
            .collect();

        let eval = self
            .guardrails
            .evaluate(
                &candidate_json,
                policy_text,
                json!({ "session_id": session.id, "action": method }),
                credentials.guardrails_credential(),
            )
            .await;

        let blocking: Vec<GuardrailError> = eval.blocking().into_iter().cloned().collect();
        let annotations: Vec<Annotation> = eval.errors.iter().flat_map(annotations_from_error).collect();

        let outgoing = if blocking.is_empty() {
            response
        } else if method == TOOLS_LIST {
            neuter_tool_list(response, &blocking)
        } else {
            let rendered = render_errors(&blocking);
            warn!(session = %session.id, method, "tool result blocked by guardrails");
            JsonRpcResponse::blocked(resp_id, format!("{BLOCKED_TOOL_MESSAGE_PREFIX} {rendered}"))
        };

        let metadata = session.metadata().await;
        session
            .append_and_push(
                self.sink.as_ref(),
                vec![message],
                annotations,
                dataset.as_deref(),
                push_metadata_for(&metadata),
                credentials.gateway.as_deref(),
                metadata.push_mode,
            )
            .await;

        ResponseOutcome::Forward(outgoing)
    }
}

/// Builds the `metadata` blob attached to every `push_trace`/`append_messages`
/// call, mirroring the original gateway's `session_metadata()`: a handful of
/// well-known keys plus whatever `--metadata-<k>=<v>` the session carries.
fn push_metadata_for(metadata: &SessionMetadata) -> Value {
    let mut blob = json!({
        "source": "mcp",
        "session_id": metadata.session_id,
        "mcp_client": metadata.mcp_client,
        "mcp_server": metadata.mcp_server,
        "tools": metadata.tools,
    });
    if let Some(user) = &metadata.system_user {
        blob["system_user"] = json!(user);
    }
    if let Value::Object(map) = &mut blob {
        for (key, value) in &metadata.extra_metadata {
            map.insert(key.clone(), json!(value));
        }
    }
    blob
}

fn content_to_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn build_tool_call_message(request: &JsonRpcRequest) -> CanonicalMessage {
    let id = tool_call_id(&request.id.to_string());
    let (name, arguments) = match request.method.as_str() {
        TOOLS_CALL => {
            let params = request.params.clone().unwrap_or(Value::Null);
            let name = params.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
            let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
            (name, arguments)
        }
        _ => (TOOLS_LIST.to_string(), json!({})),
    };
    CanonicalMessage::assistant_tool_calls(vec![ToolCall {
        id,
        kind: ToolCallKind::Function,
        function: FunctionCall { name, arguments },
    }])
}

/// §4.8.2 tools/list neutering: rewrite every listed tool into a variant
/// the client can still see but cannot usefully invoke.
fn neuter_tool_list(response: JsonRpcResponse, blocking: &[GuardrailError]) -> JsonRpcResponse {
    let rendered = render_errors(blocking);
    let JsonRpcResponse { jsonrpc, payload, id } = response;
    let payload = match payload {
        JsonRpcResponsePayload::Success { mut result } => {
            if let Some(tools) = result.get_mut("tools").and_then(Value::as_array_mut) {
                for tool in tools.iter_mut() {
                    let original_name = tool.get("name").and_then(Value::as_str).unwrap_or("tool").to_string();
                    *tool = json!({
                        "name": format!("blocked_{original_name}"),
                        "description": format!(
                            "This tool was blocked by security guardrails: {rendered}"
                        ),
                        "inputSchema": { "type": "object", "properties": {}, "required": [] },
                        "annotations": { "title": "This tool was blocked by security guardrails." },
                    });
                }
            }
            JsonRpcResponsePayload::Success { result }
        }
        other => other,
    };
    JsonRpcResponse { jsonrpc, payload, id }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::jsonrpc::JsonRpcVersion;
    use gateway_guardrails::{ExplorerClient, GuardrailsClient, PolicySourceResolver};
    use gateway_session::{SessionMetadata, SessionStore};

    fn interceptor() -> Interceptor {
        let explorer = Arc::new(ExplorerClient::new("http://127.0.0.1:1"));
        Interceptor::new(
            Arc::new(GuardrailsClient::new("http://127.0.0.1:1")),
            Arc::new(PolicySourceResolver::new(explorer.clone(), None)),
            explorer,
        )
    }

    fn tools_call_request(id: i64) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: JsonRpcVersion,
            method: TOOLS_CALL.to_string(),
            params: Some(json!({ "name": "get_weather", "arguments": { "city": "NYC" } })),
            id: RequestId::Number(id),
        }
    }

    #[tokio::test]
    async fn unreachable_guardrails_service_forwards_request_and_records_trace() {
        let interceptor = interceptor();
        let store = SessionStore::new();
        let session = store.create("s1".into(), SessionMetadata::default());
        let creds = Credentials::default();

        let outcome = interceptor
            .process_outgoing_request(&session, tools_call_request(1), None, &creds)
            .await;

        assert!(matches!(outcome, RequestOutcome::Forward(_)));
        assert_eq!(session.trace_len().await, 1);
    }

    #[tokio::test]
    async fn non_tool_methods_bypass_the_hook_entirely() {
        let interceptor = interceptor();
        let store = SessionStore::new();
        let session = store.create("s1".into(), SessionMetadata::default());
        let creds = Credentials::default();

        let req = JsonRpcRequest {
            jsonrpc: JsonRpcVersion,
            method: "ping".to_string(),
            params: None,
            id: RequestId::Number(1),
        };
        let outcome = interceptor.process_outgoing_request(&session, req, None, &creds).await;
        assert!(matches!(outcome, RequestOutcome::Forward(_)));
        assert_eq!(session.trace_len().await, 0);
    }

    #[tokio::test]
    async fn initialize_records_client_name_in_metadata() {
        let interceptor = interceptor();
        let store = SessionStore::new();
        let session = store.create("s1".into(), SessionMetadata::default());
        let creds = Credentials::default();

        let req = JsonRpcRequest {
            jsonrpc: JsonRpcVersion,
            method: INITIALIZE.to_string(),
            params: Some(json!({ "clientInfo": { "name": "claude-desktop" } })),
            id: RequestId::Number(1),
        };
        interceptor.process_outgoing_request(&session, req, None, &creds).await;
        assert_eq!(session.metadata().await.mcp_client.as_deref(), Some("claude-desktop"));
    }

    #[test]
    fn push_metadata_merges_extra_metadata_keys() {
        let mut metadata = SessionMetadata {
            mcp_client: Some("claude-desktop".to_string()),
            ..Default::default()
        };
        metadata.extra_metadata.insert("team".to_string(), "core".to_string());

        let blob = push_metadata_for(&metadata);
        assert_eq!(blob["source"], "mcp");
        assert_eq!(blob["mcp_client"], "claude-desktop");
        assert_eq!(blob["team"], "core");
    }

    #[test]
    fn neuter_tool_list_rewrites_every_tool() {
        let resp = JsonRpcResponse {
            jsonrpc: JsonRpcVersion,
            payload: JsonRpcResponsePayload::Success {
                result: json!({ "tools": [{ "name": "get_last_message_from_user" }] }),
            },
            id: Some(RequestId::Number(1)),
        };
        let err = GuardrailError {
            args: vec!["food detected".into()],
            kwargs: Default::default(),
            ranges: vec![],
            guardrail: gateway_core::guardrail::GuardrailRef {
                id: "g".into(),
                name: "g".into(),
                action: gateway_core::guardrail::GuardrailAction::Block,
            },
        };
        let rewritten = neuter_tool_list(resp, &[err]);
        let v = serde_json::to_value(&rewritten).unwrap();
        let tool = &v["result"]["tools"][0];
        assert_eq!(tool["name"], "blocked_get_last_message_from_user");
        assert_eq!(tool["inputSchema"]["required"], json!([]));
    }
}
