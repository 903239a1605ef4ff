//! Client for the Explorer trace store: push/append traces, create
//! annotations, and look up a dataset's attached guardrails.

use gateway_core::guardrail::{Annotation, GuardrailRuleSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

const DEFAULT_API_URL: &str = "https://explorer.invariantlabs.ai";

#[derive(Debug, Error, Clone)]
pub enum ExplorerError {
    #[error("explorer request failed: {0}")]
    Request(String),
    #[error("explorer returned status {0}")]
    Status(u16),
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct DatasetMetadata {
    #[serde(default)]
    pub guardrails: GuardrailRuleSet,
}

#[derive(Debug, Deserialize)]
struct PushTraceResponse {
    id: String,
}

#[derive(Debug, Serialize)]
struct PushTraceRequest<'a> {
    messages: &'a [Value],
    #[serde(skip_serializing_if = "Option::is_none")]
    dataset: Option<&'a str>,
    metadata: &'a Value,
    annotations: &'a [Annotation],
}

#[derive(Debug, Serialize)]
struct AppendRequest<'a> {
    messages: &'a [Value],
    annotations: &'a [Annotation],
}

#[derive(Debug, Clone)]
pub struct ExplorerClient {
    http: reqwest::Client,
    base_url: String,
}

impl ExplorerClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("explorer http client must build");
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    pub fn from_env() -> Self {
        let base = std::env::var("INVARIANT_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        Self::new(base)
    }

    fn authed(&self, builder: reqwest::RequestBuilder, credential: Option<&str>) -> reqwest::RequestBuilder {
        match credential {
            Some(cred) => builder.bearer_auth(cred),
            None => builder,
        }
    }

    /// Pushes a new trace, creating the dataset if it doesn't exist. Returns
    /// the Explorer-assigned trace id.
    pub async fn push_trace(
        &self,
        messages: &[Value],
        dataset: Option<&str>,
        metadata: Value,
        annotations: &[Annotation],
        credential: Option<&str>,
    ) -> Result<String, ExplorerError> {
        let url = format!("{}/api/v1/push/trace", self.base_url);
        let req = self.authed(self.http.post(url), credential).json(&PushTraceRequest {
            messages,
            dataset,
            metadata: &metadata,
            annotations,
        });
        let resp = req.send().await.map_err(|e| {
            warn!(error = %e, "explorer push_trace failed");
            ExplorerError::Request(e.to_string())
        })?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            warn!(status, "explorer push_trace returned a non-2xx status");
            return Err(ExplorerError::Status(status));
        }
        resp.json::<PushTraceResponse>()
            .await
            .map(|b| b.id)
            .map_err(|e| ExplorerError::Request(e.to_string()))
    }

    /// Appends messages to an existing trace.
    pub async fn append_messages(
        &self,
        trace_id: &str,
        messages: &[Value],
        annotations: &[Annotation],
        credential: Option<&str>,
    ) -> Result<(), ExplorerError> {
        let url = format!("{}/api/v1/trace/{trace_id}/messages", self.base_url);
        let req = self
            .authed(self.http.post(url), credential)
            .json(&AppendRequest { messages, annotations });
        let resp = req.send().await.map_err(|e| {
            warn!(error = %e, trace_id, "explorer append_messages failed");
            ExplorerError::Request(e.to_string())
        })?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            warn!(status, trace_id, "explorer append_messages returned a non-2xx status");
            return Err(ExplorerError::Status(status));
        }
        Ok(())
    }

    /// Fetches dataset metadata, including the attached guardrails list.
    pub async fn get_dataset_metadata(
        &self,
        dataset: &str,
        credential: Option<&str>,
    ) -> Result<DatasetMetadata, ExplorerError> {
        let url = format!("{}/api/v1/dataset/byuser/{dataset}/meta", self.base_url);
        let req = self.authed(self.http.get(url), credential);
        let resp = req.send().await.map_err(|e| {
            warn!(error = %e, dataset, "explorer get_dataset_metadata failed");
            ExplorerError::Request(e.to_string())
        })?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            warn!(status, dataset, "explorer get_dataset_metadata returned a non-2xx status");
            return Err(ExplorerError::Status(status));
        }
        resp.json::<DatasetMetadata>()
            .await
            .map_err(|e| ExplorerError::Request(e.to_string()))
    }

    /// Offline validation of policy text; returns a parse error pointing at
    /// the offending token when the text is malformed.
    pub async fn validate(
        &self,
        policy_text: &str,
        credential: Option<&str>,
    ) -> Result<(), String> {
        let url = format!("{}/api/v1/policy/validate", self.base_url);
        let req = self
            .authed(self.http.post(url), credential)
            .json(&serde_json::json!({ "policy": policy_text }));
        let resp = match req.send().await {
            Ok(r) => r,
            Err(e) => return Err(e.to_string()),
        };
        if resp.status().is_success() {
            return Ok(());
        }
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        Err(body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("invalid policy")
            .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_host_surfaces_as_request_error() {
        let client = ExplorerClient::new("http://127.0.0.1:1");
        let err = client
            .push_trace(&[], None, Value::Null, &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExplorerError::Request(_)));
    }
}
