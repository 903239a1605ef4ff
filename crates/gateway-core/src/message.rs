//! The canonical conversation schema every provider and MCP payload is mapped to.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of a turn in a canonical conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One part of a multi-part message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: String },
}

/// Either a plain string body or an ordered sequence of parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Content {
    pub fn as_text(&self) -> String {
        match self {
            Content::Text(s) => s.clone(),
            Content::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.clone()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

/// A function call made by the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Arguments, stored as a parsed object wherever the wire format allows it.
    pub arguments: Value,
}

/// One `tool_calls[i]` entry on an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ToolCallKind,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallKind {
    Function,
}

impl Default for ToolCallKind {
    fn default() -> Self {
        ToolCallKind::Function
    }
}

/// Builds the stable `call_<request-id>` id used to bind a tool call to its
/// eventual tool response, even across transport hops.
pub fn tool_call_id(request_id: &str) -> String {
    format!("call_{request_id}")
}

/// One turn in the normalized conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMessage {
    pub role: Role,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl CanonicalMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(Content::Text(text.into())),
            tool_calls: None,
            tool_call_id: None,
            tool_name: None,
            error: None,
        }
    }

    pub fn user(content: Content) -> Self {
        Self {
            role: Role::User,
            content: Some(content),
            tool_calls: None,
            tool_call_id: None,
            tool_name: None,
            error: None,
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(Content::Text(text.into())),
            tool_calls: None,
            tool_call_id: None,
            tool_name: None,
            error: None,
        }
    }

    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(Content::Text(String::new())),
            tool_calls: Some(tool_calls),
            tool_call_id: None,
            tool_name: None,
            error: None,
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        content: Content,
        error: Option<Value>,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
            tool_name: None,
            error,
        }
    }

    /// Resolve a dotted JSON path (`content.0.text`, `tool_calls.0`) against
    /// this message, mirroring the addressing scheme `GuardrailError::ranges`
    /// uses to point back into the trace.
    pub fn resolve_path<'a>(&'a self, path: &str) -> Option<Value> {
        let full = serde_json::to_value(self).ok()?;
        let mut cur = &full;
        for segment in path.split('.') {
            if let Ok(idx) = segment.parse::<usize>() {
                cur = cur.get(idx)?;
            } else {
                cur = cur.get(segment)?;
            }
        }
        Some(cur.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_as_text_concatenates_text_parts() {
        let c = Content::Parts(vec![
            ContentPart::Text { text: "a".into() },
            ContentPart::ImageUrl {
                image_url: "data:...".into(),
            },
            ContentPart::Text { text: "b".into() },
        ]);
        assert_eq!(c.as_text(), "ab");
    }

    #[test]
    fn tool_call_id_is_stable_per_request_id() {
        assert_eq!(tool_call_id("42"), "call_42");
    }

    #[test]
    fn resolve_path_walks_dotted_segments() {
        let msg = CanonicalMessage::user(Content::Parts(vec![ContentPart::Text {
            text: "hello".into(),
        }]));
        let v = msg.resolve_path("content.0.text").unwrap();
        assert_eq!(v, Value::String("hello".into()));
    }

    #[test]
    fn canonical_message_round_trips_through_json() {
        let msg = CanonicalMessage::assistant_tool_calls(vec![ToolCall {
            id: "call_1".into(),
            kind: ToolCallKind::Function,
            function: FunctionCall {
                name: "get_weather".into(),
                arguments: serde_json::json!({"city": "New York"}),
            },
        }]);
        let s = serde_json::to_string(&msg).unwrap();
        let back: CanonicalMessage = serde_json::from_str(&s).unwrap();
        assert_eq!(back, msg);
    }
}
