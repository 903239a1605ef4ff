//! Anthropic Messages converter.

use gateway_core::message::{Content, ContentPart, FunctionCall, Role, ToolCall, ToolCallKind};
use gateway_core::CanonicalMessage;
use serde_json::Value;

fn image_part_to_data_url(block: &Value) -> Option<ContentPart> {
    let source = block.get("source")?;
    let media_type = source.get("media_type")?.as_str()?;
    let data = source.get("data")?.as_str()?;
    Some(ContentPart::ImageUrl {
        image_url: format!("data:{media_type};base64,{data}"),
    })
}

/// Maps an Anthropic Messages request body to canonical messages.
///
/// The top-level `system` field, if present, becomes a leading canonical
/// system message. An assistant turn whose `content` is a list yields one
/// canonical assistant message per content block; a user turn containing
/// `tool_result` blocks becomes one canonical tool message per block.
pub fn request_to_canonical(request: &Value) -> Vec<CanonicalMessage> {
    let mut out = Vec::new();

    if let Some(system) = request.get("system") {
        let text = match system {
            Value::String(s) => s.clone(),
            Value::Array(blocks) => blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join(""),
            _ => String::new(),
        };
        if !text.is_empty() {
            out.push(CanonicalMessage::system(text));
        }
    }

    if let Some(messages) = request.get("messages").and_then(Value::as_array) {
        for msg in messages {
            out.extend(message_to_canonical(msg));
        }
    }

    out
}

fn message_to_canonical(msg: &Value) -> Vec<CanonicalMessage> {
    let role = msg.get("role").and_then(Value::as_str).unwrap_or("user");
    let content = msg.get("content").cloned().unwrap_or(Value::Null);

    match content {
        Value::String(text) => {
            vec![match role {
                "assistant" => CanonicalMessage::assistant_text(text),
                _ => CanonicalMessage::user(Content::Text(text)),
            }]
        }
        Value::Array(blocks) if role == "assistant" => blocks
            .iter()
            .filter_map(assistant_block_to_canonical)
            .collect(),
        Value::Array(blocks) => user_blocks_to_canonical(&blocks),
        _ => Vec::new(),
    }
}

fn assistant_block_to_canonical(block: &Value) -> Option<CanonicalMessage> {
    match block.get("type").and_then(Value::as_str)? {
        "text" => Some(CanonicalMessage::assistant_text(
            block.get("text")?.as_str()?.to_string(),
        )),
        "tool_use" => {
            let id = block.get("id")?.as_str()?.to_string();
            let name = block.get("name")?.as_str()?.to_string();
            let arguments = block.get("input").cloned().unwrap_or(Value::Object(Default::default()));
            Some(CanonicalMessage::assistant_tool_calls(vec![ToolCall {
                id,
                kind: ToolCallKind::Function,
                function: FunctionCall { name, arguments },
            }]))
        }
        _ => None,
    }
}

fn user_blocks_to_canonical(blocks: &[Value]) -> Vec<CanonicalMessage> {
    let mut out = Vec::new();
    let mut parts = Vec::new();

    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("tool_result") => {
                if !parts.is_empty() {
                    out.push(CanonicalMessage::user(Content::Parts(std::mem::take(
                        &mut parts,
                    ))));
                }
                if let Some(tool_use_id) = block.get("tool_use_id").and_then(Value::as_str) {
                    let content = block
                        .get("content")
                        .map(content_value_to_content)
                        .unwrap_or(Content::Text(String::new()));
                    let error = if block.get("is_error").and_then(Value::as_bool).unwrap_or(false)
                    {
                        Some(Value::Bool(true))
                    } else {
                        None
                    };
                    out.push(CanonicalMessage::tool_result(tool_use_id, content, error));
                }
            }
            Some("text") => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    parts.push(ContentPart::Text {
                        text: text.to_string(),
                    });
                }
            }
            Some("image") => {
                if let Some(part) = image_part_to_data_url(block) {
                    parts.push(part);
                }
            }
            _ => {}
        }
    }

    if !parts.is_empty() {
        out.push(CanonicalMessage::user(Content::Parts(parts)));
    }
    out
}

fn content_value_to_content(v: &Value) -> Content {
    match v {
        Value::String(s) => Content::Text(s.clone()),
        Value::Array(items) => Content::Text(
            items
                .iter()
                .filter_map(|i| i.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join(""),
        ),
        other => Content::Text(other.to_string()),
    }
}

/// Maps a unary Anthropic Messages response body to canonical messages: one
/// message per content block, mirroring the request-side rule.
pub fn response_to_canonical(response: &Value) -> Vec<CanonicalMessage> {
    response
        .get("content")
        .and_then(Value::as_array)
        .map(|blocks| blocks.iter().filter_map(assistant_block_to_canonical).collect())
        .unwrap_or_default()
}

/// The SSE event type that ends an Anthropic stream.
pub const STREAM_END_EVENT: &str = "message_stop";

pub fn is_stream_sentinel(event_type: &str) -> bool {
    event_type == STREAM_END_EVENT
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn splits_system_field_into_leading_message() {
        let req = json!({
            "system": "be terse",
            "messages": [{"role": "user", "content": "hi"}]
        });
        let canon = request_to_canonical(&req);
        assert_eq!(canon[0].role, Role::System);
        assert_eq!(canon[0].content.as_ref().unwrap().as_text(), "be terse");
        assert_eq!(canon[1].role, Role::User);
    }

    #[test]
    fn assistant_content_list_yields_one_message_per_block() {
        let req = json!({
            "messages": [{
                "role": "assistant",
                "content": [
                    {"type": "text", "text": "let me check"},
                    {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"city": "Madrid"}}
                ]
            }]
        });
        let canon = request_to_canonical(&req);
        assert_eq!(canon.len(), 2);
        assert_eq!(canon[0].role, Role::Assistant);
        assert!(canon[1].tool_calls.is_some());
    }

    #[test]
    fn tool_result_block_becomes_canonical_tool_message() {
        let req = json!({
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": "15C"}
                ]
            }]
        });
        let canon = request_to_canonical(&req);
        assert_eq!(canon[0].role, Role::Tool);
        assert_eq!(canon[0].tool_call_id.as_deref(), Some("toolu_1"));
    }

    #[test]
    fn image_block_becomes_base64_data_url() {
        let req = json!({
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "abc"}}
                ]
            }]
        });
        let canon = request_to_canonical(&req);
        match canon[0].content.as_ref().unwrap() {
            Content::Parts(parts) => match &parts[0] {
                ContentPart::ImageUrl { image_url } => {
                    assert_eq!(image_url, "data:image/png;base64,abc")
                }
                _ => panic!("expected image part"),
            },
            _ => panic!("expected parts"),
        }
    }
}
