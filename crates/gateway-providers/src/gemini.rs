//! Gemini GenerateContent converter.

use gateway_core::message::{Content, ContentPart, FunctionCall, Role, ToolCall, ToolCallKind};
use gateway_core::CanonicalMessage;
use serde_json::Value;
use std::collections::HashMap;

/// Maps a Gemini `generateContent` request body to canonical messages.
///
/// `systemInstruction.parts[].text` concatenated becomes the leading
/// canonical system message. Each `contents[]` entry with role `user` maps to
/// a canonical user message (splitting out `functionResponse` parts into
/// their own canonical tool messages); role `model` maps to assistant
/// content and/or a single-entry tool call per `functionCall` part.
pub fn request_to_canonical(request: &Value) -> Vec<CanonicalMessage> {
    let mut out = Vec::new();

    if let Some(text) = system_instruction_text(request) {
        if !text.is_empty() {
            out.push(CanonicalMessage::system(text));
        }
    }

    // Tracks the most recent unmatched functionCall id per function name, so a
    // later functionResponse with the same name binds to it.
    let mut pending_calls: HashMap<String, String> = HashMap::new();
    let mut call_counter: usize = 0;

    if let Some(contents) = request.get("contents").and_then(Value::as_array) {
        for content in contents {
            let role = content.get("role").and_then(Value::as_str).unwrap_or("user");
            let parts = content
                .get("parts")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            match role {
                "model" => out.extend(model_parts_to_canonical(
                    &parts,
                    &mut pending_calls,
                    &mut call_counter,
                )),
                _ => out.extend(user_parts_to_canonical(&parts, &mut pending_calls)),
            }
        }
    }

    out
}

fn system_instruction_text(request: &Value) -> Option<String> {
    let parts = request
        .get("systemInstruction")
        .and_then(|si| si.get("parts"))
        .and_then(Value::as_array)?;
    Some(
        parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
    )
}

fn model_parts_to_canonical(
    parts: &[Value],
    pending_calls: &mut HashMap<String, String>,
    call_counter: &mut usize,
) -> Vec<CanonicalMessage> {
    let mut out = Vec::new();
    for part in parts {
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            out.push(CanonicalMessage::assistant_text(text.to_string()));
        } else if let Some(fc) = part.get("functionCall") {
            let name = fc
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let arguments = fc.get("args").cloned().unwrap_or(Value::Object(Default::default()));
            *call_counter += 1;
            let id = format!("call_gemini-{call_counter}");
            pending_calls.insert(name.clone(), id.clone());
            out.push(CanonicalMessage::assistant_tool_calls(vec![ToolCall {
                id,
                kind: ToolCallKind::Function,
                function: FunctionCall { name, arguments },
            }]));
        }
    }
    out
}

fn user_parts_to_canonical(
    parts: &[Value],
    pending_calls: &mut HashMap<String, String>,
) -> Vec<CanonicalMessage> {
    let mut out = Vec::new();
    let mut content_parts = Vec::new();

    for part in parts {
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            content_parts.push(ContentPart::Text {
                text: text.to_string(),
            });
        } else if let Some(inline) = part.get("inlineData") {
            if let (Some(mime), Some(data)) = (
                inline.get("mimeType").and_then(Value::as_str),
                inline.get("data").and_then(Value::as_str),
            ) {
                content_parts.push(ContentPart::ImageUrl {
                    image_url: format!("data:{mime};base64,{data}"),
                });
            }
        } else if let Some(fr) = part.get("functionResponse") {
            if !content_parts.is_empty() {
                out.push(CanonicalMessage::user(Content::Parts(std::mem::take(
                    &mut content_parts,
                ))));
            }
            let name = fr.get("name").and_then(Value::as_str).unwrap_or_default();
            let tool_call_id = pending_calls
                .remove(name)
                .unwrap_or_else(|| format!("call_gemini-unmatched-{name}"));
            let response = fr.get("response").cloned().unwrap_or(Value::Null);
            out.push(CanonicalMessage::tool_result(
                tool_call_id,
                Content::Text(response.to_string()),
                None,
            ));
        }
    }

    if !content_parts.is_empty() {
        out.push(CanonicalMessage::user(Content::Parts(content_parts)));
    }
    out
}

/// Maps a unary Gemini `generateContent` response body to canonical messages.
pub fn response_to_canonical(response: &Value) -> Vec<CanonicalMessage> {
    let mut pending_calls = HashMap::new();
    let mut counter = 0usize;
    response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(Value::as_array)
        .map(|parts| model_parts_to_canonical(parts, &mut pending_calls, &mut counter))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn system_instruction_becomes_leading_system_message() {
        let req = json!({
            "systemInstruction": {"parts": [{"text": "be terse"}]},
            "contents": [{"role": "user", "parts": [{"text": "hi"}]}]
        });
        let canon = request_to_canonical(&req);
        assert_eq!(canon[0].role, Role::System);
    }

    #[test]
    fn image_and_text_parts_both_map() {
        let req = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    {"text": "How many cats?"},
                    {"inlineData": {"mimeType": "image/png", "data": "YWJj"}}
                ]
            }]
        });
        let canon = request_to_canonical(&req);
        match canon[0].content.as_ref().unwrap() {
            Content::Parts(parts) => {
                assert_eq!(parts.len(), 2);
                assert!(matches!(parts[0], ContentPart::Text { .. }));
                assert!(matches!(parts[1], ContentPart::ImageUrl { .. }));
            }
            _ => panic!("expected parts"),
        }
    }

    #[test]
    fn function_call_and_response_pair_by_name() {
        let req = json!({
            "contents": [
                {"role": "model", "parts": [{"functionCall": {"name": "get_weather", "args": {"city": "NY"}}}]},
                {"role": "user", "parts": [{"functionResponse": {"name": "get_weather", "response": {"temp": "15C"}}}]}
            ]
        });
        let canon = request_to_canonical(&req);
        let call_id = canon[0].tool_calls.as_ref().unwrap()[0].id.clone();
        assert_eq!(canon[1].role, Role::Tool);
        assert_eq!(canon[1].tool_call_id.as_deref(), Some(call_id.as_str()));
    }
}
