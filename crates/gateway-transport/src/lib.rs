//! The MCP request/response interception template ([`core`]) and its three
//! transport strategies: [`stdio`] (subprocess pipes), [`sse`] (legacy
//! GET/POST SSE), and [`streamable_http`] (the unified POST/GET/DELETE
//! transport).

pub mod core;
pub mod frame;
pub mod sse;
pub mod stdio;
pub mod streamable_http;

pub use core::{Interceptor, RequestOutcome, ResponseOutcome};
pub use frame::{SseFrame, SseFrameParser};
pub use sse::SseTransport;
pub use streamable_http::{PostResponse, StreamableHttpTransport};
