//! Per-provider stream mergers.
//!
//! Each merger folds a stream of provider-specific delta events into one
//! accumulating canonical response. Merger state is a small typed struct
//! with maps from index to slot, never shared across requests.

use gateway_core::message::{FunctionCall, ToolCall, ToolCallKind};
use gateway_core::CanonicalMessage;
use serde_json::Value;
use std::collections::BTreeMap;

/// OpenAI `choices[].delta` merger, keyed by `(choice_index, tool_call_index)`
/// for tool-call slots so reordered indices from the provider still land in
/// the right place.
#[derive(Debug, Default)]
pub struct OpenAiMerger {
    choices: BTreeMap<usize, ChoiceSlot>,
}

#[derive(Debug, Default)]
struct ChoiceSlot {
    content: String,
    tool_calls: BTreeMap<usize, ToolCallSlot>,
    finish_reason: Option<String>,
}

#[derive(Debug, Default)]
struct ToolCallSlot {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl OpenAiMerger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &Value) {
        let Some(choices) = chunk.get("choices").and_then(Value::as_array) else {
            return;
        };
        for choice in choices {
            let index = choice.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
            let slot = self.choices.entry(index).or_default();

            if let Some(finish) = choice.get("finish_reason").and_then(Value::as_str) {
                slot.finish_reason = Some(finish.to_string());
            }

            let Some(delta) = choice.get("delta") else {
                continue;
            };

            if let Some(text) = delta.get("content").and_then(Value::as_str) {
                slot.content.push_str(text);
            }

            if let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) {
                for tc in tool_calls {
                    let tc_index = tc.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
                    let tc_slot = slot.tool_calls.entry(tc_index).or_default();
                    if let Some(id) = tc.get("id").and_then(Value::as_str) {
                        tc_slot.id = Some(id.to_string());
                    }
                    if let Some(function) = tc.get("function") {
                        if let Some(name) = function.get("name").and_then(Value::as_str) {
                            tc_slot.name = Some(tc_slot.name.take().unwrap_or_default() + name);
                        }
                        if let Some(args) = function.get("arguments").and_then(Value::as_str) {
                            tc_slot.arguments.push_str(args);
                        }
                    }
                }
            }
        }
    }

    /// Splits each choice into a content message and/or a tool-call message so
    /// the single-payload-per-message invariant on `CanonicalMessage` holds.
    pub fn into_canonical(self) -> Vec<CanonicalMessage> {
        let mut out = Vec::new();
        for (_, slot) in self.choices {
            if !slot.content.is_empty() {
                out.push(CanonicalMessage::assistant_text(slot.content));
            }
            if !slot.tool_calls.is_empty() {
                let calls = slot
                    .tool_calls
                    .into_values()
                    .filter_map(|tc| {
                        let id = tc.id?;
                        let name = tc.name.unwrap_or_default();
                        let arguments = serde_json::from_str(&tc.arguments)
                            .unwrap_or_else(|_| Value::String(tc.arguments.clone()));
                        Some(ToolCall {
                            id,
                            kind: ToolCallKind::Function,
                            function: FunctionCall { name, arguments },
                        })
                    })
                    .collect::<Vec<_>>();
                if !calls.is_empty() {
                    out.push(CanonicalMessage::assistant_tool_calls(calls));
                }
            }
        }
        out
    }
}

/// Anthropic `content_block_*` / `message_*` merger.
#[derive(Debug, Default)]
pub struct AnthropicMerger {
    blocks: BTreeMap<usize, Block>,
}

#[derive(Debug)]
enum Block {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        input: String,
    },
}

impl AnthropicMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one parsed SSE event (`event` name plus its `data` JSON body).
    pub fn feed(&mut self, event: &str, data: &Value) {
        match event {
            "content_block_start" => {
                let Some(index) = data.get("index").and_then(Value::as_u64) else {
                    return;
                };
                let Some(block) = data.get("content_block") else {
                    return;
                };
                match block.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        self.blocks.insert(index as usize, Block::Text(String::new()));
                    }
                    Some("tool_use") => {
                        let id = block
                            .get("id")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                        let name = block
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                        self.blocks.insert(
                            index as usize,
                            Block::ToolUse {
                                id,
                                name,
                                input: String::new(),
                            },
                        );
                    }
                    _ => {}
                }
            }
            "content_block_delta" => {
                let Some(index) = data.get("index").and_then(Value::as_u64) else {
                    return;
                };
                let Some(delta) = data.get("delta") else {
                    return;
                };
                if let Some(slot) = self.blocks.get_mut(&(index as usize)) {
                    match slot {
                        Block::Text(text) => {
                            if let Some(t) = delta.get("text").and_then(Value::as_str) {
                                text.push_str(t);
                            }
                        }
                        Block::ToolUse { input, .. } => {
                            if let Some(partial) = delta.get("partial_json").and_then(Value::as_str)
                            {
                                input.push_str(partial);
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }

    pub fn into_canonical(self) -> Vec<CanonicalMessage> {
        self.blocks
            .into_values()
            .map(|block| match block {
                Block::Text(text) => CanonicalMessage::assistant_text(text),
                Block::ToolUse { id, name, input } => {
                    let arguments = serde_json::from_str(&input)
                        .unwrap_or_else(|_| Value::Object(Default::default()));
                    CanonicalMessage::assistant_tool_calls(vec![ToolCall {
                        id,
                        kind: ToolCallKind::Function,
                        function: FunctionCall { name, arguments },
                    }])
                }
            })
            .collect()
    }
}

/// Gemini streaming passthrough. Folding is best-effort, kept only so a trace
/// capture isn't empty; it is not required for correctness of the pass-through
/// to the client.
#[derive(Debug, Default)]
pub struct GeminiMerger {
    text: String,
}

impl GeminiMerger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &Value) {
        if let Some(text) = chunk
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
            .and_then(|c| c.get("content"))
            .and_then(|c| c.get("parts"))
            .and_then(Value::as_array)
        {
            for part in text {
                if let Some(t) = part.get("text").and_then(Value::as_str) {
                    self.text.push_str(t);
                }
            }
        }
    }

    pub fn into_canonical(self) -> Vec<CanonicalMessage> {
        if self.text.is_empty() {
            Vec::new()
        } else {
            vec![CanonicalMessage::assistant_text(self.text)]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn openai_merger_coalesces_text_and_tool_call_deltas() {
        let mut m = OpenAiMerger::new();
        m.feed(&json!({"choices":[{"index":0,"delta":{"content":"Hel"}}]}));
        m.feed(&json!({"choices":[{"index":0,"delta":{"content":"lo"}}]}));
        m.feed(&json!({"choices":[{"index":0,"delta":{"tool_calls":[
            {"index":0,"id":"call_1","function":{"name":"get_weather","arguments":""}}
        ]}}]}));
        m.feed(&json!({"choices":[{"index":0,"delta":{"tool_calls":[
            {"index":0,"function":{"arguments":"{\"city\":"}}
        ]}}]}));
        m.feed(&json!({"choices":[{"index":0,"delta":{"tool_calls":[
            {"index":0,"function":{"arguments":"\"NY\"}"}}
        ]}}]}));
        let canon = m.into_canonical();
        assert_eq!(canon[0].content.as_ref().unwrap().as_text(), "Hello");
        let tc = &canon[1].tool_calls.as_ref().unwrap()[0];
        assert_eq!(tc.function.arguments, json!({"city": "NY"}));
    }

    #[test]
    fn openai_merger_handles_reordered_choice_indices() {
        let mut m = OpenAiMerger::new();
        m.feed(&json!({"choices":[{"index":1,"delta":{"content":"b"}}]}));
        m.feed(&json!({"choices":[{"index":0,"delta":{"content":"a"}}]}));
        let canon = m.into_canonical();
        assert_eq!(canon[0].content.as_ref().unwrap().as_text(), "a");
        assert_eq!(canon[1].content.as_ref().unwrap().as_text(), "b");
    }

    #[test]
    fn anthropic_merger_accumulates_text_and_tool_use_blocks() {
        let mut m = AnthropicMerger::new();
        m.feed(
            "content_block_start",
            &json!({"index":0,"content_block":{"type":"text"}}),
        );
        m.feed(
            "content_block_delta",
            &json!({"index":0,"delta":{"type":"text_delta","text":"Madrid"}}),
        );
        m.feed(
            "content_block_start",
            &json!({"index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"get_weather"}}),
        );
        m.feed(
            "content_block_delta",
            &json!({"index":1,"delta":{"type":"input_json_delta","partial_json":"{\"city\":\"Madrid\"}"}}),
        );
        let canon = m.into_canonical();
        assert_eq!(canon[0].content.as_ref().unwrap().as_text(), "Madrid");
        let tc = &canon[1].tool_calls.as_ref().unwrap()[0];
        assert_eq!(tc.function.arguments, json!({"city": "Madrid"}));
    }

    #[test]
    fn merger_is_associative_under_arbitrary_chunk_splits() {
        let whole = "Hello, world!";
        let mut merged = String::new();
        for ch in whole.chars() {
            let mut m = OpenAiMerger::new();
            m.feed(&json!({"choices":[{"index":0,"delta":{"content": ch.to_string()}}]}));
            merged.push_str(&m.into_canonical()[0].content.as_ref().unwrap().as_text());
        }
        assert_eq!(merged, whole);
    }
}
