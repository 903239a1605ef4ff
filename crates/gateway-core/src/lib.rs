//! Canonical message model, JSON-RPC envelope, guardrail types, auth
//! resolution and shared error kinds for the Invariant gateway.
//!
//! Every other gateway crate depends on this one and nothing else in it
//! depends back, so it stays the single shared vocabulary between the LLM
//! proxy routes and the MCP transport layer.

pub mod auth;
pub mod error;
pub mod guardrail;
pub mod jsonrpc;
pub mod message;

pub use error::GatewayError;
pub use message::{
    CanonicalMessage, Content, ContentPart, FunctionCall, Role, ToolCall, ToolCallKind,
    tool_call_id,
};
