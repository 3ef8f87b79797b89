use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::llm::LlmErrorKind;
use crate::llm::client_core::OpenAIClient;
use crate::llm::session::{ModelProvider, ModelStream, StreamEvent};
use crate::llm::types::{ModelResponse, ResponsesRequest, ToolDef, TranscriptEntry};

const UNKNOWN_ERROR: &str = "unknown error";

#[derive(Debug, Clone, Default, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FailedResponse {
    #[serde(default)]
    error: Option<ApiError>,
}

// Responses API server-sent events; only the ones the loop reacts to are typed.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ProviderEvent {
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta { delta: String },
    #[serde(rename = "response.completed", alias = "response.incomplete")]
    Completed { response: ModelResponse },
    #[serde(rename = "response.failed")]
    Failed {
        #[serde(default)]
        response: FailedResponse,
    },
    #[serde(rename = "error", alias = "response.error")]
    Error {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        error: Option<ApiError>,
    },
    #[serde(other)]
    Other,
}

fn parse_event(payload: &str) -> Option<ProviderEvent> {
    match serde_json::from_str::<ProviderEvent>(payload) {
        Ok(ev) => Some(ev),
        Err(e) => {
            warn!(payload, error=%e, "failed to parse stream event");
            None
        }
    }
}

/// One round's streaming session over an established HTTP response.
pub struct ResponsesStream {
    payloads: Pin<Box<dyn Stream<Item = Result<String>> + Send>>,
    completed: Option<ModelResponse>,
    finished: bool,
    ended_cleanly: bool,
}

impl ResponsesStream {
    pub(crate) fn new(payloads: Pin<Box<dyn Stream<Item = Result<String>> + Send>>) -> Self {
        Self {
            payloads,
            completed: None,
            finished: false,
            ended_cleanly: false,
        }
    }

    fn fail(&mut self, message: String) -> Option<StreamEvent> {
        self.finished = true;
        Some(StreamEvent::Error(message))
    }
}

#[async_trait]
impl ModelStream for ResponsesStream {
    async fn next_event(&mut self) -> Option<StreamEvent> {
        while !self.finished {
            let payload = match self.payloads.next().await {
                Some(Ok(p)) => p,
                Some(Err(e)) => return self.fail(e.to_string()),
                None => {
                    if self.completed.is_some() {
                        self.finished = true;
                        self.ended_cleanly = true;
                        return Some(StreamEvent::StreamEnd);
                    }
                    return self.fail("stream ended before response completed".into());
                }
            };

            match parse_event(&payload) {
                Some(ProviderEvent::OutputTextDelta { delta }) => {
                    return Some(StreamEvent::TextDelta(delta));
                }
                Some(ProviderEvent::Completed { response }) => {
                    debug!(response_id=?response.id, items=response.output.len(), "response completed");
                    self.completed = Some(response);
                }
                Some(ProviderEvent::Failed { response }) => {
                    let msg = response
                        .error
                        .and_then(|e| e.message)
                        .unwrap_or_else(|| UNKNOWN_ERROR.to_string());
                    return self.fail(msg);
                }
                Some(ProviderEvent::Error { message, error }) => {
                    let msg = message
                        .or_else(|| error.and_then(|e| e.message))
                        .unwrap_or_else(|| UNKNOWN_ERROR.to_string());
                    return self.fail(msg);
                }
                Some(ProviderEvent::Other) | None => {}
            }
        }
        None
    }

    fn final_response(&mut self) -> Result<ModelResponse> {
        if !self.ended_cleanly {
            return Err(anyhow!("stream has not ended cleanly"));
        }
        self.completed
            .take()
            .ok_or_else(|| anyhow!("final response already taken"))
    }
}

/// Splits a byte stream into SSE `data:` payloads.
fn sse_payloads<S, B>(
    byte_stream: S,
    cancel: CancellationToken,
) -> Pin<Box<dyn Stream<Item = Result<String>> + Send>>
where
    S: Stream<Item = reqwest::Result<B>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let mut byte_stream = Box::pin(byte_stream);
    let mut buf = Vec::<u8>::new();

    let stream = async_stream::try_stream! {
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("responses stream cancelled during byte stream read");
                    Err(anyhow!(LlmErrorKind::Cancelled))
                }
                chunk = byte_stream.next() => match chunk {
                    Some(Ok(bytes)) => Ok(bytes),
                    Some(Err(e)) => Err(anyhow::Error::new(e).context("byte stream read error")),
                    None => break,
                }
            }?;

            buf.extend_from_slice(chunk.as_ref());
            let mut start = 0usize;
            let mut lines = Vec::new();
            for i in 0..buf.len() {
                if buf[i] == b'\n' {
                    lines.push(String::from_utf8_lossy(&buf[start..i]).into_owned());
                    start = i + 1;
                }
            }
            if start > 0 {
                buf.drain(0..start);
            }

            for line in lines {
                let s = line.trim();
                let Some(rest) = s.strip_prefix("data:") else {
                    continue;
                };
                let payload = rest.trim();
                if payload.is_empty() || payload == "[DONE]" {
                    continue;
                }
                debug!(response_chunk=%payload, "responses stream chunk");
                yield payload.to_string();
            }
        }

        // A final event without a trailing newline.
        let tail = String::from_utf8_lossy(&buf).into_owned();
        if let Some(rest) = tail.trim().strip_prefix("data:") {
            let payload = rest.trim();
            if !payload.is_empty() && payload != "[DONE]" {
                yield payload.to_string();
            }
        }
    };

    Box::pin(stream)
}

#[async_trait]
impl ModelProvider for OpenAIClient {
    async fn open_stream(
        &self,
        instructions: &str,
        transcript: &[TranscriptEntry],
        tools: &[ToolDef],
        cancel: CancellationToken,
    ) -> Result<Box<dyn ModelStream>> {
        let req = ResponsesRequest {
            model: &self.model,
            instructions,
            input: transcript,
            tools,
            stream: true,
        };
        let resp = self.establish_stream(&req, &cancel).await?;
        let payloads = sse_payloads(resp.bytes_stream(), cancel);
        Ok(Box::new(ResponsesStream::new(payloads)))
    }
}
