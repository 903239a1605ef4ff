//! Wires one `mcp` invocation's collaborators together and runs the stdio
//! bridge to completion: one gateway process per MCP session.

use crate::args::McpArgs;
use gateway_core::auth::Credentials;
use gateway_core::error::GatewayError;
use gateway_guardrails::{load_file_rules, ExplorerClient, GuardrailsClient, PolicySourceResolver};
use gateway_session::{generate_session_id, PushMode, SessionMetadata, SessionStore};
use gateway_transport::Interceptor;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

pub async fn run(parsed: McpArgs, api_key: String) -> Result<(), GatewayError> {
    let explorer = Arc::new(ExplorerClient::from_env());
    let guardrails = Arc::new(GuardrailsClient::from_env());

    let file_rules = match std::env::var("GUARDRAILS_FILE_PATH") {
        Ok(path) if !path.is_empty() => Some(load_file_rules(&PathBuf::from(path))?),
        _ => None,
    };
    let policy = Arc::new(PolicySourceResolver::new(explorer.clone(), file_rules));
    let interceptor = Arc::new(Interceptor::new(guardrails, policy, explorer));

    let sessions = SessionStore::new();
    let session_id = generate_session_id();
    let metadata = SessionMetadata {
        session_id: session_id.clone(),
        system_user: Some(system_user()),
        dataset: parsed.project_name.clone(),
        push_mode: if parsed.push_explorer { PushMode::Push } else { PushMode::Skip },
        id_is_gateway_generated: true,
        extra_metadata: parsed.metadata.clone(),
        ..Default::default()
    };
    let session = sessions.create(session_id.clone(), metadata);

    let credentials = Credentials {
        gateway: Some(api_key),
        provider: None,
        guardrails: None,
    };

    info!(session_id = %session_id, exec = ?parsed.exec, "starting MCP stdio bridge");

    let header_policy = metadata_header_policy(&parsed);
    gateway_transport::stdio::run_default(&parsed.exec, interceptor, session, credentials, header_policy).await
}

/// `--metadata-<k>=<v>` carries free-form session metadata, not a policy
/// body; the bridge's `header_policy` slot stays unused in CLI mode, which
/// only ever resolves file or dataset policy.
fn metadata_header_policy(_parsed: &McpArgs) -> Option<String> {
    None
}

/// `user@host`, best-effort from the environment; stdio mode has no
/// per-request identity to fall back on the way the HTTP routes do.
fn system_user() -> String {
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
    format!("{user}@{host}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::parse;

    #[test]
    fn header_policy_is_unused_in_cli_mode() {
        let parsed = parse(&["--exec".to_string(), "server".to_string()]).unwrap();
        assert!(metadata_header_policy(&parsed).is_none());
    }
}
