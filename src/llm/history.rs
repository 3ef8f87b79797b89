use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::llm::types::{FunctionCallOutput, TranscriptEntry};

/// Message as posted by the chat client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
}

/// Append-only conversation log owned by one loop execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new(entries: Vec<TranscriptEntry>) -> Self {
        Self { entries }
    }

    /// Keeps only user/assistant turns with trimmed text. System prompts are
    /// supplied as instructions and tool turns are rebuilt by the loop.
    pub fn from_client_messages(messages: &[ClientMessage]) -> Self {
        let entries = messages
            .iter()
            .filter_map(|m| {
                let text = m.content.as_deref().unwrap_or_default().trim().to_string();
                match m.role.as_str() {
                    "user" => Some(TranscriptEntry::user(text)),
                    "assistant" => Some(TranscriptEntry::assistant(text)),
                    _ => None,
                }
            })
            .collect();
        Self { entries }
    }

    pub fn push(&mut self, entry: TranscriptEntry) {
        self.entries.push(entry);
    }

    pub fn push_output(&mut self, call_id: impl Into<String>, output: impl Into<String>) {
        self.entries
            .push(TranscriptEntry::FunctionCallOutput(FunctionCallOutput {
                call_id: call_id.into(),
                output: output.into(),
            }));
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Call ids of `function_call` entries that have no later
    /// `function_call_output`. Empty whenever the log is safe to send.
    pub fn unanswered_call_ids(&self) -> Vec<String> {
        let mut pending: Vec<String> = Vec::new();
        let mut answered: HashSet<&str> = HashSet::new();
        for entry in self.entries.iter().rev() {
            match entry {
                TranscriptEntry::FunctionCallOutput(out) => {
                    answered.insert(out.call_id.as_str());
                }
                TranscriptEntry::FunctionCall(call) => {
                    if !answered.contains(call.call_id.as_str()) {
                        pending.push(call.call_id.clone());
                    }
                }
                TranscriptEntry::Message { .. } | TranscriptEntry::Raw(_) => {}
            }
        }
        pending.reverse();
        pending
    }
}
