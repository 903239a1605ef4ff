//! HTTP client for the remote guardrails policy evaluator.

use gateway_core::guardrail::GuardrailError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

const DEFAULT_GUARDRAILS_API_URL: &str = "https://guardrail.invariantnet.com";
const EVALUATE_PATH: &str = "/api/v1/policy/check";

#[derive(Debug, Serialize)]
struct EvaluateRequest<'a> {
    messages: &'a [Value],
    policy: &'a str,
    parameters: Value,
}

#[derive(Debug, Deserialize, Default)]
struct EvaluateResponseBody {
    #[serde(default)]
    errors: Vec<GuardrailError>,
}

/// Result of a guardrails evaluation. Always present, even on a degraded
/// service call: the fail-open policy means a transport failure here yields
/// an empty `errors` list rather than an error type.
#[derive(Debug, Clone, Default)]
pub struct EvaluateResult {
    pub errors: Vec<GuardrailError>,
}

impl EvaluateResult {
    pub fn blocking(&self) -> Vec<&GuardrailError> {
        self.errors.iter().filter(|e| e.is_blocking()).collect()
    }

    pub fn logging(&self) -> Vec<&GuardrailError> {
        self.errors.iter().filter(|e| !e.is_blocking()).collect()
    }

    pub fn has_blocking(&self) -> bool {
        self.errors.iter().any(|e| e.is_blocking())
    }
}

#[derive(Debug, Clone)]
pub struct GuardrailsClient {
    http: reqwest::Client,
    base_url: String,
}

impl GuardrailsClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("guardrails http client must build");
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    pub fn from_env() -> Self {
        let base = std::env::var("GUARDRAILS_API_URL")
            .unwrap_or_else(|_| DEFAULT_GUARDRAILS_API_URL.to_string());
        Self::new(base)
    }

    /// Sends `{messages, policy, parameters}` to the policy service.
    ///
    /// Fails open: any transport error, non-2xx status, or malformed body is
    /// logged and treated as "no errors" so a sick evaluator never denies
    /// service. `parameters` is forwarded verbatim.
    pub async fn evaluate(
        &self,
        messages: &[Value],
        policy_text: &str,
        parameters: Value,
        credential: Option<&str>,
    ) -> EvaluateResult {
        if policy_text.trim().is_empty() {
            return EvaluateResult::default();
        }

        let mut req = self
            .http
            .post(format!("{}{EVALUATE_PATH}", self.base_url))
            .json(&EvaluateRequest {
                messages,
                policy: policy_text,
                parameters,
            });
        if let Some(cred) = credential {
            req = req.bearer_auth(cred);
        }

        match req.send().await {
            Ok(resp) if resp.status().is_success() => match resp.json::<EvaluateResponseBody>().await {
                Ok(body) => EvaluateResult { errors: body.errors },
                Err(err) => {
                    warn!(error = %err, "guardrails response body was malformed; failing open");
                    EvaluateResult::default()
                }
            },
            Ok(resp) => {
                warn!(status = %resp.status(), "guardrails service returned an error status; failing open");
                EvaluateResult::default()
            }
            Err(err) => {
                warn!(error = %err, "guardrails service call failed; failing open");
                EvaluateResult::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_policy_never_calls_out() {
        let client = GuardrailsClient::new("http://127.0.0.1:1".to_string());
        let result = client
            .evaluate(&[], "", Value::Null, None)
            .await;
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn unreachable_service_fails_open() {
        // Port 1 is reserved and should refuse the connection immediately.
        let client = GuardrailsClient::new("http://127.0.0.1:1".to_string());
        let result = client
            .evaluate(&[], "raise \"x\" if true", Value::Null, None)
            .await;
        assert!(result.errors.is_empty());
        assert!(!result.has_blocking());
    }
}
