//! Seam between the conversation loop and the model provider.
//!
//! A provider opens one [`ModelStream`] per round. The stream is single pass:
//! text deltas come out in arrival order, and the finished response becomes
//! available through [`ModelStream::final_response`] once
//! [`StreamEvent::StreamEnd`] has been observed.

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::llm::types::{ModelResponse, ToolDef, TranscriptEntry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    TextDelta(String),
    Error(String),
    StreamEnd,
}

#[async_trait]
pub trait ModelStream: Send {
    /// Next event, or `None` once `StreamEnd` or `Error` has been returned.
    async fn next_event(&mut self) -> Option<StreamEvent>;

    /// The completed response. Fails unless the stream ended cleanly; the
    /// response can be taken once.
    fn final_response(&mut self) -> Result<ModelResponse>;
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn open_stream(
        &self,
        instructions: &str,
        transcript: &[TranscriptEntry],
        tools: &[ToolDef],
        cancel: CancellationToken,
    ) -> Result<Box<dyn ModelStream>>;
}
