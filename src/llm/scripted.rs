//! In-memory provider that replays canned rounds, for loop tests.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::llm::session::{ModelProvider, ModelStream, StreamEvent};
use crate::llm::types::{
    FunctionCall, ModelResponse, OutputItem, ResponseUsage, Role, ToolDef, TranscriptEntry,
};

pub(crate) enum Round {
    Stream {
        events: Vec<StreamEvent>,
        response: Option<ModelResponse>,
    },
    OpenFails(String),
    /// Emits the deltas, then waits for cancellation.
    Hang(Vec<String>),
}

impl Round {
    /// Streams `deltas` and completes with a message holding their text.
    pub fn text(deltas: &[&str], usage: (u64, u64)) -> Self {
        let text: String = deltas.concat();
        let mut events: Vec<_> = deltas
            .iter()
            .map(|d| StreamEvent::TextDelta(d.to_string()))
            .collect();
        events.push(StreamEvent::StreamEnd);
        Round::Stream {
            events,
            response: Some(response(vec![message_item(&text)], usage)),
        }
    }

    /// Completes with the given function calls `(call_id, name, arguments)`.
    pub fn calls(deltas: &[&str], calls: &[(&str, &str, &str)], usage: (u64, u64)) -> Self {
        let mut events: Vec<_> = deltas
            .iter()
            .map(|d| StreamEvent::TextDelta(d.to_string()))
            .collect();
        events.push(StreamEvent::StreamEnd);
        let mut output = Vec::new();
        if !deltas.is_empty() {
            output.push(message_item(&deltas.concat()));
        }
        output.extend(calls.iter().map(|(call_id, name, arguments)| {
            OutputItem::FunctionCall(FunctionCall {
                call_id: call_id.to_string(),
                name: name.to_string(),
                arguments: arguments.to_string(),
                id: Some(format!("fc_{call_id}")),
                status: Some("completed".into()),
            })
        }));
        Round::Stream {
            events,
            response: Some(response(output, usage)),
        }
    }

    /// Puts `item` ahead of the completed response's other output items.
    pub fn leading_item(mut self, item: Value) -> Self {
        if let Round::Stream {
            response: Some(resp),
            ..
        } = &mut self
        {
            resp.output.insert(0, OutputItem::Other(item));
        }
        self
    }

    pub fn error(deltas: &[&str], message: &str) -> Self {
        let mut events: Vec<_> = deltas
            .iter()
            .map(|d| StreamEvent::TextDelta(d.to_string()))
            .collect();
        events.push(StreamEvent::Error(message.to_string()));
        Round::Stream {
            events,
            response: None,
        }
    }
}

fn message_item(text: &str) -> OutputItem {
    OutputItem::Message {
        id: Some("msg_1".into()),
        role: Role::Assistant,
        content: vec![json!({"type": "output_text", "text": text, "annotations": []})],
        status: Some("completed".into()),
    }
}

fn response(output: Vec<OutputItem>, (input_tokens, output_tokens): (u64, u64)) -> ModelResponse {
    ModelResponse {
        id: Some("resp_1".into()),
        output,
        usage: Some(ResponseUsage {
            input_tokens,
            output_tokens,
        }),
    }
}

/// What the provider was asked for on one `open_stream` call.
#[derive(Debug, Clone)]
pub(crate) struct SeenRequest {
    pub instructions: String,
    pub transcript: Vec<TranscriptEntry>,
    pub tool_names: Vec<String>,
}

impl SeenRequest {
    pub fn transcript_json(&self) -> Vec<Value> {
        self.transcript
            .iter()
            .filter_map(|e| serde_json::to_value(e).ok())
            .collect()
    }
}

#[derive(Default)]
pub(crate) struct ScriptedProvider {
    rounds: Mutex<VecDeque<Round>>,
    seen: Mutex<Vec<SeenRequest>>,
}

impl ScriptedProvider {
    pub fn new(rounds: Vec<Round>) -> Self {
        Self {
            rounds: Mutex::new(rounds.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn open_stream(
        &self,
        instructions: &str,
        transcript: &[TranscriptEntry],
        tools: &[ToolDef],
        cancel: CancellationToken,
    ) -> Result<Box<dyn ModelStream>> {
        self.seen.lock().unwrap().push(SeenRequest {
            instructions: instructions.to_string(),
            transcript: transcript.to_vec(),
            tool_names: tools.iter().map(|t| t.name.clone()).collect(),
        });
        let round = self
            .rounds
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow!("script exhausted"))?;
        match round {
            Round::Stream { events, response } => Ok(Box::new(ScriptedStream {
                events: events.into(),
                response,
                ended: false,
                hang: None,
            })),
            Round::OpenFails(message) => Err(anyhow!(message)),
            Round::Hang(deltas) => Ok(Box::new(ScriptedStream {
                events: deltas.into_iter().map(StreamEvent::TextDelta).collect(),
                response: None,
                ended: false,
                hang: Some(cancel),
            })),
        }
    }
}

struct ScriptedStream {
    events: VecDeque<StreamEvent>,
    response: Option<ModelResponse>,
    ended: bool,
    hang: Option<CancellationToken>,
}

#[async_trait]
impl ModelStream for ScriptedStream {
    async fn next_event(&mut self) -> Option<StreamEvent> {
        if self.ended {
            return None;
        }
        match self.events.pop_front() {
            Some(ev) => {
                if matches!(ev, StreamEvent::StreamEnd | StreamEvent::Error(_)) {
                    self.ended = true;
                }
                Some(ev)
            }
            None => {
                if let Some(cancel) = &self.hang {
                    cancel.cancelled().await;
                }
                self.ended = true;
                None
            }
        }
    }

    fn final_response(&mut self) -> Result<ModelResponse> {
        self.response
            .take()
            .ok_or_else(|| anyhow!("no final response"))
    }
}
