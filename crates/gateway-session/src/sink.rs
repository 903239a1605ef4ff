//! The trace-sink seam a `Session` pushes through; lets tests swap in a
//! recording fake instead of a real Explorer client.

use async_trait::async_trait;
use gateway_core::guardrail::Annotation;
use gateway_guardrails::ExplorerClient;
use serde_json::Value;

#[async_trait]
pub trait TraceSink: Send + Sync {
    async fn push_trace(
        &self,
        messages: &[Value],
        dataset: Option<&str>,
        metadata: Value,
        annotations: &[Annotation],
        credential: Option<&str>,
    ) -> Result<String, String>;

    async fn append_messages(
        &self,
        trace_id: &str,
        messages: &[Value],
        annotations: &[Annotation],
        credential: Option<&str>,
    ) -> Result<(), String>;
}

#[async_trait]
impl TraceSink for ExplorerClient {
    async fn push_trace(
        &self,
        messages: &[Value],
        dataset: Option<&str>,
        metadata: Value,
        annotations: &[Annotation],
        credential: Option<&str>,
    ) -> Result<String, String> {
        ExplorerClient::push_trace(self, messages, dataset, metadata, annotations, credential)
            .await
            .map_err(|e| e.to_string())
    }

    async fn append_messages(
        &self,
        trace_id: &str,
        messages: &[Value],
        annotations: &[Annotation],
        credential: Option<&str>,
    ) -> Result<(), String> {
        ExplorerClient::append_messages(self, trace_id, messages, annotations, credential)
            .await
            .map_err(|e| e.to_string())
    }
}
