//! Startup configuration: everything read from the environment once, then
//! shared read-only for the life of the process (§5's "single configuration
//! object is read-only after startup").

use gateway_core::error::GatewayError;
use gateway_guardrails::load_file_rules;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8005";

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    /// Every upstream call's bound timeout (§6 `CLIENT_TIMEOUT`).
    pub client_timeout: Duration,
    /// Rewrites `localhost`/`127.0.0.1` in `MCP-SERVER-BASE-URL` to
    /// `host.docker.internal`; off by default per §9's design note.
    pub rewrite_localhost: bool,
    pub file_rules: Option<gateway_core::guardrail::GuardrailRuleSet>,
}

impl Config {
    pub fn from_env() -> Result<Self, GatewayError> {
        let bind_addr = std::env::var("GATEWAY_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
        let client_timeout = std::env::var("CLIENT_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(60));
        let rewrite_localhost = std::env::var("GATEWAY_REWRITE_LOCALHOST")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let file_rules = match std::env::var("GUARDRAILS_FILE_PATH") {
            Ok(path) if !path.is_empty() => Some(load_file_rules(&PathBuf::from(path))?),
            _ => None,
        };

        Ok(Self {
            bind_addr,
            client_timeout,
            rewrite_localhost,
            file_rules,
        })
    }
}

/// `localhost`/`127.0.0.1` host rewriting for containerized deployments,
/// applied only when `rewrite_localhost` is enabled.
pub fn rewrite_localhost_url(url: &str, enabled: bool) -> String {
    if !enabled {
        return url.to_string();
    }
    url.replace("://localhost", "://host.docker.internal")
        .replace("://127.0.0.1", "://host.docker.internal")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_is_a_no_op_when_disabled() {
        assert_eq!(rewrite_localhost_url("http://localhost:3000", false), "http://localhost:3000");
    }

    #[test]
    fn rewrite_replaces_localhost_and_loopback_when_enabled() {
        assert_eq!(
            rewrite_localhost_url("http://localhost:3000", true),
            "http://host.docker.internal:3000"
        );
        assert_eq!(
            rewrite_localhost_url("http://127.0.0.1:3000", true),
            "http://host.docker.internal:3000"
        );
    }
}
