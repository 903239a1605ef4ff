//! Guardrail rules, evaluation errors, and the annotations derived from them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardrailAction {
    Block,
    Log,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailRule {
    pub id: String,
    pub name: String,
    /// The policy source text for this rule.
    pub content: String,
    pub action: GuardrailAction,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Two ordered groups so error attribution stays deterministic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardrailRuleSet {
    pub blocking: Vec<GuardrailRule>,
    pub logging: Vec<GuardrailRule>,
}

impl GuardrailRuleSet {
    pub fn is_empty(&self) -> bool {
        self.blocking.is_empty() && self.logging.is_empty()
    }

    /// Concatenates the enabled rules from both groups, blocking rules first,
    /// as the text the guardrails service receives.
    pub fn enabled_policy_text(&self) -> String {
        self.blocking
            .iter()
            .chain(self.logging.iter())
            .filter(|r| r.enabled)
            .map(|r| r.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn rule_by_id(&self, id: &str) -> Option<&GuardrailRule> {
        self.blocking
            .iter()
            .chain(self.logging.iter())
            .find(|r| r.id == id)
    }
}

/// A textual range inside the canonical trace, addressed by a dotted JSON
/// path optionally suffixed with `:start-end` character offsets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailRange {
    pub json_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<usize>,
}

impl GuardrailRange {
    /// The `messages.3.content.0.text:22-26` address form used in annotations.
    pub fn address(&self) -> String {
        match (self.start, self.end) {
            (Some(s), Some(e)) => format!("{}:{}-{}", self.json_path, s, e),
            _ => self.json_path.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailRef {
    pub id: String,
    pub name: String,
    pub action: GuardrailAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailError {
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub kwargs: serde_json::Map<String, Value>,
    #[serde(default)]
    pub ranges: Vec<GuardrailRange>,
    pub guardrail: GuardrailRef,
}

impl GuardrailError {
    /// The rendered text a blocking violation surfaces to the caller: the
    /// args joined, falling back to the guardrail's name.
    pub fn rendered(&self) -> String {
        if self.args.is_empty() {
            self.guardrail.name.clone()
        } else {
            self.args.join(" ")
        }
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self.guardrail.action, GuardrailAction::Block)
    }
}

/// Renders a list of guardrail errors the way every blocking-violation body
/// in the spec does: errors joined by `; `.
pub fn render_errors(errors: &[GuardrailError]) -> String {
    errors
        .iter()
        .map(GuardrailError::rendered)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationMetadata {
    pub source: String,
    pub guardrail: GuardrailRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    pub content: String,
    pub address: String,
    pub extra_metadata: AnnotationMetadata,
}

impl Annotation {
    /// The dedup key used by a session's annotation set: `(content, address, metadata)`.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}\u{1}{}\u{1}{}\u{1}{:?}",
            self.content,
            self.address,
            self.extra_metadata.source,
            self.extra_metadata.guardrail.id
        )
    }
}

/// Produces one annotation per `(error, range)` pair, as §3 requires.
pub fn annotations_from_error(error: &GuardrailError) -> Vec<Annotation> {
    let rendered = error.rendered();
    if error.ranges.is_empty() {
        return vec![Annotation {
            content: rendered,
            address: String::new(),
            extra_metadata: AnnotationMetadata {
                source: "guardrails-error".to_string(),
                guardrail: error.guardrail.clone(),
            },
        }];
    }
    error
        .ranges
        .iter()
        .map(|range| Annotation {
            content: rendered.clone(),
            address: range.address(),
            extra_metadata: AnnotationMetadata {
                source: "guardrails-error".to_string(),
                guardrail: error.guardrail.clone(),
            },
        })
        .collect()
}

/// Deduplicates a batch of candidate annotations against a session's existing
/// `seen` set, returning only the genuinely new ones and inserting their keys.
pub fn dedup_new_annotations(
    seen: &mut HashSet<String>,
    candidates: Vec<Annotation>,
) -> Vec<Annotation> {
    candidates
        .into_iter()
        .filter(|a| seen.insert(a.dedup_key()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_error(name: &str, action: GuardrailAction) -> GuardrailError {
        GuardrailError {
            args: vec!["Madrid detected in the response".into()],
            kwargs: Default::default(),
            ranges: vec![GuardrailRange {
                json_path: "messages.1.content".into(),
                start: None,
                end: None,
            }],
            guardrail: GuardrailRef {
                id: "g1".into(),
                name: name.into(),
                action,
            },
        }
    }

    #[test]
    fn annotations_are_one_per_range() {
        let mut err = sample_error("capital-check", GuardrailAction::Block);
        err.ranges.push(GuardrailRange {
            json_path: "messages.2.content".into(),
            start: Some(1),
            end: Some(3),
        });
        let anns = annotations_from_error(&err);
        assert_eq!(anns.len(), 2);
        assert_eq!(anns[1].address, "messages.2.content:1-3");
    }

    #[test]
    fn dedup_drops_repeats_across_calls() {
        let mut seen = HashSet::new();
        let err = sample_error("capital-check", GuardrailAction::Block);
        let first = dedup_new_annotations(&mut seen, annotations_from_error(&err));
        assert_eq!(first.len(), 1);
        let second = dedup_new_annotations(&mut seen, annotations_from_error(&err));
        assert!(second.is_empty());
    }

    #[test]
    fn rule_set_orders_blocking_before_logging() {
        let rs = GuardrailRuleSet {
            blocking: vec![GuardrailRule {
                id: "b".into(),
                name: "b".into(),
                content: "raise block".into(),
                action: GuardrailAction::Block,
                enabled: true,
            }],
            logging: vec![GuardrailRule {
                id: "l".into(),
                name: "l".into(),
                content: "raise log".into(),
                action: GuardrailAction::Log,
                enabled: true,
            }],
        };
        assert_eq!(rs.enabled_policy_text(), "raise block\nraise log");
    }

    #[test]
    fn disabled_rules_are_excluded_from_policy_text() {
        let rs = GuardrailRuleSet {
            blocking: vec![GuardrailRule {
                id: "b".into(),
                name: "b".into(),
                content: "raise block".into(),
                action: GuardrailAction::Block,
                enabled: false,
            }],
            logging: vec![],
        };
        assert_eq!(rs.enabled_policy_text(), "");
    }
}
