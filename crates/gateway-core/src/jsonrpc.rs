//! JSON-RPC 2.0 envelope used on every MCP transport.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// JSON-RPC version marker; serializes/deserializes as the literal `"2.0"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonRpcVersion;

const JSONRPC_VERSION: &str = "2.0";

impl Serialize for JsonRpcVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(JSONRPC_VERSION)
    }
}

impl<'de> Deserialize<'de> for JsonRpcVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let version = String::deserialize(deserializer)?;
        if version == JSONRPC_VERSION {
            Ok(JsonRpcVersion)
        } else {
            Err(serde::de::Error::custom(format!(
                "invalid jsonrpc version: expected '{JSONRPC_VERSION}', got '{version}'"
            )))
        }
    }
}

/// A JSON-RPC request id: number or string, per the spec.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: JsonRpcVersion,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    pub id: RequestId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// The MCP tool-call-blocked error code used throughout §4.8.
pub const BLOCKED_ERROR_CODE: i64 = -32600;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcResponsePayload {
    Success { result: Value },
    Error { error: JsonRpcError },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: JsonRpcVersion,
    #[serde(flatten)]
    pub payload: JsonRpcResponsePayload,
    pub id: Option<RequestId>,
}

impl JsonRpcResponse {
    pub fn error(id: RequestId, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            payload: JsonRpcResponsePayload::Error {
                error: JsonRpcError {
                    code,
                    message: message.into(),
                    data: None,
                },
            },
            id: Some(id),
        }
    }

    pub fn blocked(id: RequestId, message: impl Into<String>) -> Self {
        Self::error(id, BLOCKED_ERROR_CODE, message)
    }
}

/// Either side of the wire: a client request or a server response, as seen by
/// a pump that doesn't yet know which one it's holding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips() {
        let raw = r#"{"jsonrpc":"2.0","method":"tools/call","params":{"name":"x"},"id":1}"#;
        let req: JsonRpcRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(req.method, "tools/call");
        assert_eq!(req.id, RequestId::Number(1));
        let back = serde_json::to_string(&req).unwrap();
        let req2: JsonRpcRequest = serde_json::from_str(&back).unwrap();
        assert_eq!(req2.id, req.id);
    }

    #[test]
    fn blocked_response_has_stable_shape() {
        let resp = JsonRpcResponse::blocked(RequestId::Number(7), "blocked for reasons");
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["error"]["code"], -32600);
        assert_eq!(v["id"], 7);
    }

    #[test]
    fn rejects_wrong_jsonrpc_version() {
        let raw = r#"{"jsonrpc":"1.0","method":"x","id":1}"#;
        let res: Result<JsonRpcRequest, _> = serde_json::from_str(raw);
        assert!(res.is_err());
    }
}
