//! The error kinds enumerated in the gateway's error handling design.
//!
//! `GatewayError` is shared by the LLM proxy routes and the MCP transports;
//! each caller maps a variant to its own wire shape (HTTP body, JSON-RPC
//! error, SSE event) rather than this crate knowing about any of them.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("missing or invalid credential: {0}")]
    ClientAuth(String),

    #[error("invalid policy: {0}")]
    PolicyParse(String),

    #[error("[Invariant] The request did not pass the guardrails")]
    BlockingInput { details: serde_json::Value },

    #[error("[Invariant] The response did not pass the guardrails")]
    BlockingOutput { details: serde_json::Value },

    #[error("upstream transport error: {0}")]
    UpstreamTransport(String),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("invalid Invariant-Push header value: {0}")]
    InvalidPushHeader(String),
}

impl GatewayError {
    pub fn client_auth(msg: impl Into<String>) -> Self {
        GatewayError::ClientAuth(msg.into())
    }
}
