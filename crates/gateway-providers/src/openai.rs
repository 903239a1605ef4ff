//! OpenAI Chat Completions converter.
//!
//! OpenAI's wire format is already close to canonical; the only real work is
//! decoding `tool_calls[i].function.arguments` from the JSON-encoded string
//! the API uses on the wire into a parsed object.

use gateway_core::message::{
    Content, ContentPart, FunctionCall, Role, ToolCall, ToolCallKind, tool_call_id,
};
use gateway_core::CanonicalMessage;
use serde_json::Value;

fn parse_arguments(raw: &Value) -> Value {
    match raw {
        Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone())),
        other => other.clone(),
    }
}

fn content_from_value(v: &Value) -> Content {
    match v {
        Value::String(s) => Content::Text(s.clone()),
        Value::Array(items) => Content::Parts(
            items
                .iter()
                .filter_map(|item| {
                    let kind = item.get("type")?.as_str()?;
                    match kind {
                        "text" => Some(ContentPart::Text {
                            text: item.get("text")?.as_str()?.to_string(),
                        }),
                        "image_url" => {
                            let url = item.get("image_url")?.get("url")?.as_str()?.to_string();
                            Some(ContentPart::ImageUrl { image_url: url })
                        }
                        _ => None,
                    }
                })
                .collect(),
        ),
        Value::Null => Content::Text(String::new()),
        other => Content::Text(other.to_string()),
    }
}

fn role_from_str(s: &str) -> Option<Role> {
    match s {
        "system" | "developer" => Some(Role::System),
        "user" => Some(Role::User),
        "assistant" => Some(Role::Assistant),
        "tool" => Some(Role::Tool),
        _ => None,
    }
}

fn tool_calls_from_value(items: &[Value]) -> Vec<ToolCall> {
    items
        .iter()
        .filter_map(|tc| {
            let id = tc.get("id")?.as_str()?.to_string();
            let function = tc.get("function")?;
            let name = function.get("name")?.as_str()?.to_string();
            let arguments = parse_arguments(function.get("arguments").unwrap_or(&Value::Null));
            Some(ToolCall {
                id,
                kind: ToolCallKind::Function,
                function: FunctionCall { name, arguments },
            })
        })
        .collect()
}

fn message_to_canonical(msg: &Value) -> Option<CanonicalMessage> {
    let role = role_from_str(msg.get("role")?.as_str()?)?;
    let tool_calls = msg
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|v| tool_calls_from_value(v))
        .filter(|v| !v.is_empty());

    let content = msg.get("content").map(content_from_value);

    Some(CanonicalMessage {
        role,
        content,
        tool_calls,
        tool_call_id: msg
            .get("tool_call_id")
            .and_then(Value::as_str)
            .map(String::from),
        tool_name: msg.get("name").and_then(Value::as_str).map(String::from),
        error: None,
    })
}

/// Maps an OpenAI Chat Completions request body to canonical messages.
pub fn request_to_canonical(request: &Value) -> Vec<CanonicalMessage> {
    request
        .get("messages")
        .and_then(Value::as_array)
        .map(|msgs| msgs.iter().filter_map(message_to_canonical).collect())
        .unwrap_or_default()
}

/// Maps a unary OpenAI Chat Completions response body to canonical messages.
pub fn response_to_canonical(response: &Value) -> Vec<CanonicalMessage> {
    response
        .get("choices")
        .and_then(Value::as_array)
        .map(|choices| {
            choices
                .iter()
                .filter_map(|c| c.get("message"))
                .filter_map(message_to_canonical)
                .collect()
        })
        .unwrap_or_default()
}

/// The sentinel that ends an OpenAI SSE stream.
pub fn is_stream_sentinel(data_line: &str) -> bool {
    data_line.trim() == "[DONE]"
}

/// Used when the gateway itself needs to mint a canonical tool-call id for a
/// chunk that only carries an OpenAI-native index (see stream merger).
pub fn synthetic_tool_call_id(request_id: &str, index: usize) -> String {
    tool_call_id(&format!("{request_id}-{index}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_tool_call_arguments_string_into_object() {
        let req = json!({
            "messages": [
                {"role": "assistant", "content": null, "tool_calls": [
                    {"id": "call_1", "type": "function", "function": {
                        "name": "get_weather", "arguments": "{\"city\":\"New York\"}"
                    }}
                ]}
            ]
        });
        let canon = request_to_canonical(&req);
        assert_eq!(canon.len(), 1);
        let tc = &canon[0].tool_calls.as_ref().unwrap()[0];
        assert_eq!(tc.function.arguments, json!({"city": "New York"}));
    }

    #[test]
    fn maps_tool_response_message() {
        let req = json!({
            "messages": [
                {"role": "tool", "tool_call_id": "call_1", "content": "15C"}
            ]
        });
        let canon = request_to_canonical(&req);
        assert_eq!(canon[0].role, Role::Tool);
        assert_eq!(canon[0].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn maps_multi_part_user_content() {
        let req = json!({
            "messages": [
                {"role": "user", "content": [
                    {"type": "text", "text": "what is this?"},
                    {"type": "image_url", "image_url": {"url": "data:image/png;base64,abc"}}
                ]}
            ]
        });
        let canon = request_to_canonical(&req);
        match canon[0].content.as_ref().unwrap() {
            Content::Parts(parts) => assert_eq!(parts.len(), 2),
            _ => panic!("expected parts"),
        }
    }

    #[test]
    fn stream_sentinel_is_recognized() {
        assert!(is_stream_sentinel("[DONE]"));
        assert!(!is_stream_sentinel("{\"id\":\"x\"}"));
    }
}
