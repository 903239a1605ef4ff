//! Resolves the effective rule set for a request from header, dataset, or
//! gateway-configured-file policy sources, in that precedence order.

use crate::explorer::ExplorerClient;
use gateway_core::error::GatewayError;
use gateway_core::guardrail::{GuardrailAction, GuardrailRule, GuardrailRuleSet};
use moka::future::Cache;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Which of the three sources produced the effective rule set for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicySource {
    Header,
    Dataset(String),
    File,
}

#[derive(Debug, Clone)]
pub struct ResolvedPolicy {
    pub rule_set: GuardrailRuleSet,
    pub source: PolicySource,
}

/// Decodes the `Invariant-Guardrails` header value: percent-decoded, then with
/// any literal `\uXXXX` escapes resolved, as the spec's "percent/unicode-escaped"
/// wording implies a client that cannot send raw UTF-8 in a header value.
pub fn decode_header_policy(raw: &str) -> String {
    let percent_decoded = percent_encoding::percent_decode_str(raw)
        .decode_utf8()
        .map(|cow| cow.into_owned())
        .unwrap_or_else(|_| raw.to_string());
    unescape_unicode(&percent_decoded)
}

fn unescape_unicode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' && chars.peek() == Some(&'u') {
            chars.next();
            let hex: String = chars.by_ref().take(4).collect();
            if let Ok(code) = u32::from_str_radix(&hex, 16) {
                if let Some(ch) = char::from_u32(code) {
                    out.push(ch);
                    continue;
                }
            }
            out.push_str("\\u");
            out.push_str(&hex);
        } else {
            out.push(c);
        }
    }
    out
}

/// Loads the `GUARDRAILS_FILE_PATH` startup file: its whole content is one
/// policy body, wrapped as a single always-enabled blocking rule the same way
/// a header policy is, since the gateway has no separate channel for
/// per-rule metadata at this source.
///
/// Validation is limited to read success and non-blankness; the full policy
/// grammar is the guardrails service's concern, not this gateway's.
pub fn load_file_rules(path: &Path) -> Result<GuardrailRuleSet, GatewayError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        GatewayError::PolicyParse(format!("unable to read guardrails file {}: {e}", path.display()))
    })?;

    if content.trim().is_empty() {
        return Err(GatewayError::PolicyParse(format!(
            "guardrails file {} is empty",
            path.display()
        )));
    }

    Ok(GuardrailRuleSet {
        blocking: vec![GuardrailRule {
            id: "file".to_string(),
            name: "file-policy".to_string(),
            content,
            action: GuardrailAction::Block,
            enabled: true,
        }],
        logging: Vec::new(),
    })
}

pub struct PolicySourceResolver {
    explorer: Arc<ExplorerClient>,
    dataset_cache: Cache<String, GuardrailRuleSet>,
    file_rules: Option<GuardrailRuleSet>,
}

impl PolicySourceResolver {
    pub fn new(explorer: Arc<ExplorerClient>, file_rules: Option<GuardrailRuleSet>) -> Self {
        Self {
            explorer,
            dataset_cache: Cache::builder()
                .time_to_live(Duration::from_secs(30))
                .max_capacity(10_000)
                .build(),
            file_rules,
        }
    }

    /// Invalidates the cached rule set for a dataset (e.g. after an
    /// operator edits its attached guardrails).
    pub fn invalidate(&self, dataset_name: &str) {
        self.dataset_cache.invalidate(&dataset_name.to_string());
    }

    pub async fn resolve(
        &self,
        header_policy: Option<&str>,
        dataset_name: Option<&str>,
        gateway_credential: Option<&str>,
    ) -> ResolvedPolicy {
        if let Some(raw) = header_policy {
            let text = decode_header_policy(raw);
            return ResolvedPolicy {
                rule_set: GuardrailRuleSet {
                    blocking: vec![GuardrailRule {
                        id: "header".to_string(),
                        name: "header-policy".to_string(),
                        content: text,
                        action: GuardrailAction::Block,
                        enabled: true,
                    }],
                    logging: Vec::new(),
                },
                source: PolicySource::Header,
            };
        }

        if let Some(dataset) = dataset_name {
            let key = dataset.to_string();
            let explorer = self.explorer.clone();
            let cred = gateway_credential.map(str::to_string);
            let dataset_for_fetch = key.clone();
            let rule_set = self
                .dataset_cache
                .get_with(key, async move {
                    explorer
                        .get_dataset_metadata(&dataset_for_fetch, cred.as_deref())
                        .await
                        .map(|meta| meta.guardrails)
                        .unwrap_or_default()
                })
                .await;
            return ResolvedPolicy {
                rule_set,
                source: PolicySource::Dataset(dataset.to_string()),
            };
        }

        ResolvedPolicy {
            rule_set: self.file_rules.clone().unwrap_or_default(),
            source: PolicySource::File,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_percent_and_unicode_escapes() {
        let raw = "raise%20%22Madrid%5Cu0020detected%22";
        let decoded = decode_header_policy(raw);
        assert_eq!(decoded, "raise \"Madrid detected\"");
    }

    #[test]
    fn plain_text_passes_through_unchanged() {
        assert_eq!(decode_header_policy("raise \"x\""), "raise \"x\"");
    }

    #[test]
    fn load_file_rules_wraps_content_as_one_blocking_rule() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"raise \"file policy\" if ...").unwrap();
        let rule_set = load_file_rules(file.path()).unwrap();
        assert_eq!(rule_set.blocking.len(), 1);
        assert_eq!(rule_set.blocking[0].content, "raise \"file policy\" if ...");
        assert!(rule_set.logging.is_empty());
    }

    #[test]
    fn load_file_rules_rejects_missing_file() {
        let err = load_file_rules(Path::new("/nonexistent/guardrails.pol")).unwrap_err();
        assert!(matches!(err, GatewayError::PolicyParse(_)));
    }

    #[test]
    fn load_file_rules_rejects_blank_content() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = load_file_rules(file.path()).unwrap_err();
        assert!(matches!(err, GatewayError::PolicyParse(_)));
    }

    #[tokio::test]
    async fn header_policy_takes_precedence_over_dataset() {
        let explorer = Arc::new(ExplorerClient::new("http://127.0.0.1:1"));
        let resolver = PolicySourceResolver::new(explorer, None);
        let resolved = resolver
            .resolve(Some("raise%20%22x%22"), Some("some-dataset"), None)
            .await;
        assert_eq!(resolved.source, PolicySource::Header);
    }

    #[tokio::test]
    async fn falls_back_to_file_rules_when_nothing_else_set() {
        let explorer = Arc::new(ExplorerClient::new("http://127.0.0.1:1"));
        let file_rules = GuardrailRuleSet {
            blocking: vec![GuardrailRule {
                id: "f1".into(),
                name: "file-rule".into(),
                content: "raise \"x\"".into(),
                action: GuardrailAction::Block,
                enabled: true,
            }],
            logging: vec![],
        };
        let resolver = PolicySourceResolver::new(explorer, Some(file_rules));
        let resolved = resolver.resolve(None, None, None).await;
        assert_eq!(resolved.source, PolicySource::File);
        assert_eq!(resolved.rule_set.blocking.len(), 1);
    }
}
