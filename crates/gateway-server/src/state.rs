//! Shared application state, built once at startup and handed to every
//! handler through axum's `State` extractor.
//!
//! The LLM side and the MCP side share credentials resolution and the
//! guardrails/Explorer clients, but otherwise stay architecturally separate:
//! LLM routes evaluate each request standalone (there is no session concept
//! for a one-shot proxy call), while MCP routes reuse the session-scoped
//! `Interceptor` built into `SseTransport`/`StreamableHttpTransport`.

use crate::config::Config;
use gateway_guardrails::{ExplorerClient, GuardrailsClient, PolicySourceResolver};
use gateway_session::SessionStore;
use gateway_transport::{Interceptor, SseTransport, StreamableHttpTransport};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub guardrails: Arc<GuardrailsClient>,
    pub policy: Arc<PolicySourceResolver>,
    pub explorer: Arc<ExplorerClient>,
    pub http: reqwest::Client,
    pub sessions: Arc<SessionStore>,
    pub sse: Arc<SseTransport>,
    pub streamable: Arc<StreamableHttpTransport>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);
        let guardrails = Arc::new(GuardrailsClient::from_env());
        let explorer = Arc::new(ExplorerClient::from_env());
        let policy = Arc::new(PolicySourceResolver::new(explorer.clone(), config.file_rules.clone()));
        let interceptor = Arc::new(Interceptor::new(guardrails.clone(), policy.clone(), explorer.clone()));
        let sessions = Arc::new(SessionStore::new());
        let http = reqwest::Client::builder()
            .timeout(config.client_timeout)
            .build()
            .expect("reqwest client builds with a well-formed timeout");

        let sse = Arc::new(SseTransport::new(interceptor.clone(), sessions.clone(), http.clone()));
        let streamable = Arc::new(StreamableHttpTransport::new(interceptor, sessions.clone(), http.clone()));

        Self {
            config,
            guardrails,
            policy,
            explorer,
            http,
            sessions,
            sse,
            streamable,
        }
    }
}
