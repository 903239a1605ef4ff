//! The guardrails evaluation client, policy source resolution, and the
//! Explorer trace-store client: the gateway's three external collaborators
//! besides the LLM providers and MCP servers themselves.

pub mod client;
pub mod explorer;
pub mod policy;

pub use client::{EvaluateResult, GuardrailsClient};
pub use explorer::{DatasetMetadata, ExplorerClient, ExplorerError};
pub use policy::{decode_header_policy, load_file_rules, PolicySource, PolicySourceResolver, ResolvedPolicy};
