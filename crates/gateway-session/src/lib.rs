//! Per-session state for the MCP proxy: the growing message trace, the
//! dedup'd annotation set, the request-id→method map used to interpret
//! tool-result responses, and the in-order append-and-push primitive that
//! keeps Explorer uploads at-most-once per trace.

pub mod sink;
pub mod store;

pub use sink::TraceSink;
pub use store::{
    generate_session_id, PushMode, ServerResponseType, Session, SessionMetadata, SessionStore,
    GATEWAY_SESSION_PREFIX,
};
