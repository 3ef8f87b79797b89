use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Function tool declaration in the flat shape the Responses API expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub kind: String, // "function"
    pub name: String,
    pub description: String,
    pub parameters: Value, // JSON Schema object
}

impl ToolDef {
    pub fn function(name: &str, description: &str, parameters: Value) -> Self {
        Self {
            kind: "function".into(),
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Developer,
}

/// Client turns carry plain text; assistant output items carry content parts
/// (`output_text`, `refusal`, ...) that are replayed untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub call_id: String,
    pub name: String,
    /// Raw JSON string as produced by the model.
    #[serde(default)]
    pub arguments: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallOutput {
    pub call_id: String,
    pub output: String,
}

/// One entry of the Responses API `input` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptEntry {
    Message {
        role: Role,
        content: MessageContent,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    FunctionCall(FunctionCall),
    FunctionCallOutput(FunctionCallOutput),
    /// Provider item replayed exactly as received (`reasoning`, hosted tool
    /// calls, ...).
    #[serde(untagged)]
    Raw(Value),
}

impl TranscriptEntry {
    pub fn user(text: impl Into<String>) -> Self {
        TranscriptEntry::Message {
            role: Role::User,
            content: MessageContent::Text(text.into()),
            id: None,
            status: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        TranscriptEntry::Message {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
            id: None,
            status: None,
        }
    }
}

/// Items of a finished response's `output` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    Message {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default = "default_assistant_role")]
        role: Role,
        #[serde(default)]
        content: Vec<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    FunctionCall(FunctionCall),
    #[serde(untagged)]
    Other(Value),
}

fn default_assistant_role() -> Role {
    Role::Assistant
}

impl OutputItem {
    /// Transcript form of the item.
    pub fn to_entry(&self) -> TranscriptEntry {
        match self {
            OutputItem::Message {
                id,
                role,
                content,
                status,
            } => TranscriptEntry::Message {
                role: *role,
                content: MessageContent::Parts(content.clone()),
                id: id.clone(),
                status: status.clone(),
            },
            OutputItem::FunctionCall(call) => TranscriptEntry::FunctionCall(call.clone()),
            OutputItem::Other(raw) => TranscriptEntry::Raw(raw.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResponseUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

/// The completed response object delivered with `response.completed`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub output: Vec<OutputItem>,
    #[serde(default)]
    pub usage: Option<ResponseUsage>,
}

impl ModelResponse {
    pub fn function_calls(&self) -> Vec<&FunctionCall> {
        self.output
            .iter()
            .filter_map(|item| match item {
                OutputItem::FunctionCall(call) => Some(call),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponsesRequest<'a> {
    pub model: &'a str,
    pub instructions: &'a str,
    pub input: &'a [TranscriptEntry],
    #[serde(skip_serializing_if = "no_tools")]
    pub tools: &'a [ToolDef],
    pub stream: bool,
}

fn no_tools(tools: &&[ToolDef]) -> bool {
    tools.is_empty()
}

/// Token counts reported to the client in the terminal frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UsageSummary {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
}

impl UsageSummary {
    /// Counts of one finished response; both absent when it reported none.
    pub fn of(response: &ModelResponse) -> Self {
        match &response.usage {
            Some(u) => Self {
                prompt_tokens: Some(u.input_tokens),
                completion_tokens: Some(u.output_tokens),
            },
            None => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn user_entry_serializes_as_message_item() {
        let v = serde_json::to_value(TranscriptEntry::user("Hi")).unwrap();
        assert_eq!(v, json!({"type": "message", "role": "user", "content": "Hi"}));
    }

    #[test]
    fn function_call_output_entry_shape() {
        let entry = TranscriptEntry::FunctionCallOutput(FunctionCallOutput {
            call_id: "c1".into(),
            output: "{\"ok\":true}".into(),
        });
        let v = serde_json::to_value(entry).unwrap();
        assert_eq!(
            v,
            json!({"type": "function_call_output", "call_id": "c1", "output": "{\"ok\":true}"})
        );
    }

    #[test]
    fn parses_completed_response_output() {
        let resp: ModelResponse = serde_json::from_value(json!({
            "id": "resp_1",
            "output": [
                {"type": "reasoning", "id": "rs_1", "summary": []},
                {"type": "function_call", "id": "fc_1", "call_id": "c1", "name": "lookup", "arguments": "{}", "status": "completed"},
                {"type": "message", "id": "msg_1", "role": "assistant", "status": "completed",
                 "content": [{"type": "output_text", "text": "Found it", "annotations": []}]}
            ],
            "usage": {"input_tokens": 12, "output_tokens": 3, "total_tokens": 15}
        }))
        .unwrap();

        assert_eq!(
            resp.output[0].to_entry(),
            TranscriptEntry::Raw(json!({"type": "reasoning", "id": "rs_1", "summary": []}))
        );
        let calls = resp.function_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].call_id, "c1");
        assert_eq!(resp.usage.unwrap().input_tokens, 12);

        match resp.output[2].to_entry() {
            TranscriptEntry::Message { role, content, .. } => {
                assert_eq!(role, Role::Assistant);
                assert_eq!(
                    content,
                    MessageContent::Parts(vec![
                        json!({"type": "output_text", "text": "Found it", "annotations": []})
                    ])
                );
            }
            other => panic!("unexpected entry: {other:?}"),
        }
    }

    #[test]
    fn replayed_function_call_keeps_ids() {
        let item: OutputItem = serde_json::from_value(json!({
            "type": "function_call", "id": "fc_1", "call_id": "c1",
            "name": "lookup", "arguments": "{\"a\":1}", "status": "completed"
        }))
        .unwrap();
        let v = serde_json::to_value(item.to_entry()).unwrap();
        assert_eq!(v["type"], "function_call");
        assert_eq!(v["id"], "fc_1");
        assert_eq!(v["arguments"], "{\"a\":1}");
    }

    #[test]
    fn raw_items_serialize_without_extra_tag() {
        let item = json!({"type": "reasoning", "id": "rs_1", "summary": [], "encrypted_content": "x"});
        let entry = TranscriptEntry::Raw(item.clone());
        assert_eq!(serde_json::to_value(&entry).unwrap(), item);
    }

    #[test]
    fn usage_summary_reflects_one_response() {
        let mut resp = ModelResponse::default();
        assert_eq!(UsageSummary::of(&resp), UsageSummary::default());
        resp.usage = Some(ResponseUsage {
            input_tokens: 7,
            output_tokens: 2,
        });
        let u = UsageSummary::of(&resp);
        assert_eq!(u.prompt_tokens, Some(7));
        assert_eq!(u.completion_tokens, Some(2));
    }
}
