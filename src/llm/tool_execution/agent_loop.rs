use futures::Stream;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, warn};

use crate::frames::{Frame, StreamProtocol};
use crate::llm::LlmErrorKind;
use crate::llm::history::Transcript;
use crate::llm::session::{ModelProvider, StreamEvent};
use crate::llm::tool_runtime::ToolRuntime;
use crate::llm::types::{FunctionCall, ModelResponse, UsageSummary};

const LINE_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Streaming,
    Inspecting,
    Dispatching,
    Done,
    Errored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopFinish {
    /// The model answered without requesting tools.
    Stop,
    /// Tool rounds hit `max_rounds`; pending calls were not followed up.
    CeilingReached,
    Errored(String),
    /// Cancelled, or the client stopped listening.
    Cancelled,
}

#[derive(Debug)]
pub struct LoopReport {
    pub transcript: Transcript,
    /// Completed tool rounds.
    pub rounds: usize,
    pub usage: UsageSummary,
    pub finish: LoopFinish,
}

#[derive(Debug, Clone)]
pub struct RoundOutcome {
    pub had_tool_calls: bool,
    pub final_response: ModelResponse,
}

enum RoundResult {
    Completed(RoundOutcome),
    Failed(String),
    Cancelled,
}

async fn stream_round(
    provider: &dyn ModelProvider,
    runtime: &ToolRuntime,
    transcript: &Transcript,
    sink: &mpsc::Sender<Frame>,
    cancel: &CancellationToken,
) -> RoundResult {
    let opened = tokio::select! {
        biased;
        _ = cancel.cancelled() => return RoundResult::Cancelled,
        res = provider.open_stream(
            &runtime.instructions,
            transcript.entries(),
            &runtime.tools,
            cancel.clone(),
        ) => res,
    };
    let mut stream = match opened {
        Ok(s) => s,
        Err(e) => {
            if cancel.is_cancelled()
                || matches!(e.downcast_ref::<LlmErrorKind>(), Some(LlmErrorKind::Cancelled))
            {
                return RoundResult::Cancelled;
            }
            return RoundResult::Failed(e.to_string());
        }
    };

    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => return RoundResult::Cancelled,
            ev = stream.next_event() => ev,
        };
        match event {
            Some(StreamEvent::TextDelta(delta)) => {
                if sink.send(Frame::Text(delta)).await.is_err() {
                    debug!("client went away mid-round");
                    return RoundResult::Cancelled;
                }
            }
            Some(StreamEvent::Error(message)) => return RoundResult::Failed(message),
            Some(StreamEvent::StreamEnd) => break,
            None => return RoundResult::Failed("model stream closed unexpectedly".into()),
        }
    }

    match stream.final_response() {
        Ok(final_response) => RoundResult::Completed(RoundOutcome {
            had_tool_calls: !final_response.function_calls().is_empty(),
            final_response,
        }),
        Err(e) => RoundResult::Failed(e.to_string()),
    }
}

async fn run_tool(runtime: &ToolRuntime, call: &FunctionCall) -> String {
    let dispatcher = runtime.dispatcher.clone();
    let name = call.name.clone();
    let arguments = call.arguments.clone();
    match tokio::task::spawn_blocking(move || dispatcher.invoke(&name, &arguments)).await {
        Ok(output) => output,
        Err(e) => {
            error!(tool = %call.name, error = %e, "tool task failed");
            serde_json::json!({ "error": format!("tool execution failed: {e}"), "tool": call.name })
                .to_string()
        }
    }
}

/// Drives rounds until the model stops asking for tools, an error ends the
/// request, or the round ceiling is hit. Frames go to `sink` as they are
/// produced; the last frame is either an error or a finish frame, unless the
/// loop was cancelled.
pub async fn run_conversation_loop(
    provider: &dyn ModelProvider,
    runtime: &ToolRuntime,
    mut transcript: Transcript,
    sink: &mpsc::Sender<Frame>,
    cancel: CancellationToken,
) -> LoopReport {
    let mut state = LoopState::Streaming;
    let mut rounds = 0usize;
    let mut usage = UsageSummary::default();
    let mut finish = LoopFinish::Stop;
    let mut outcome: Option<RoundOutcome> = None;
    let mut pending: Vec<FunctionCall> = Vec::new();

    loop {
        debug!(?state, rounds, entries = transcript.len(), "conversation loop step");
        match state {
            LoopState::Streaming => {
                match stream_round(provider, runtime, &transcript, sink, &cancel).await {
                    RoundResult::Completed(o) => {
                        outcome = Some(o);
                        state = LoopState::Inspecting;
                    }
                    RoundResult::Failed(message) => {
                        error!(rounds, error = %message, "model round failed");
                        let _ = sink
                            .send(Frame::Error {
                                message: message.clone(),
                            })
                            .await;
                        finish = LoopFinish::Errored(message);
                        state = LoopState::Errored;
                    }
                    RoundResult::Cancelled => {
                        info!(rounds, "conversation cancelled");
                        finish = LoopFinish::Cancelled;
                        break;
                    }
                }
            }
            LoopState::Inspecting => {
                let Some(o) = outcome.take() else {
                    state = LoopState::Done;
                    continue;
                };
                usage = UsageSummary::of(&o.final_response);
                for item in &o.final_response.output {
                    transcript.push(item.to_entry());
                }
                if o.had_tool_calls {
                    pending = o
                        .final_response
                        .function_calls()
                        .into_iter()
                        .cloned()
                        .collect();
                    state = LoopState::Dispatching;
                } else {
                    finish = LoopFinish::Stop;
                    state = LoopState::Done;
                }
            }
            LoopState::Dispatching => {
                for call in pending.drain(..) {
                    info!(tool = %call.name, call_id = %call.call_id, "running tool");
                    let output = run_tool(runtime, &call).await;
                    transcript.push_output(call.call_id, output);
                }
                let unanswered = transcript.unanswered_call_ids();
                if !unanswered.is_empty() {
                    warn!(?unanswered, "function calls left without output");
                }
                rounds += 1;
                if cancel.is_cancelled() {
                    finish = LoopFinish::Cancelled;
                    break;
                }
                if rounds >= runtime.max_rounds {
                    warn!(rounds, "round ceiling reached, ending conversation");
                    finish = LoopFinish::CeilingReached;
                    state = LoopState::Done;
                } else {
                    state = LoopState::Streaming;
                }
            }
            LoopState::Done => {
                let _ = sink.send(Frame::Finish { usage }).await;
                break;
            }
            LoopState::Errored => break,
        }
    }

    info!(rounds, finish = ?finish, "conversation finished");
    LoopReport {
        transcript,
        rounds,
        usage,
        finish,
    }
}

/// Runs the loop on its own task and yields encoded lines as they are
/// produced. Dropping the returned stream cancels the loop.
pub fn stream_lines(
    provider: Arc<dyn ModelProvider>,
    runtime: Arc<ToolRuntime>,
    transcript: Transcript,
    protocol: StreamProtocol,
    cancel: CancellationToken,
) -> impl Stream<Item = String> + Send + 'static {
    let (tx, mut rx) = mpsc::channel::<Frame>(LINE_BUFFER);
    let loop_cancel = cancel.clone();
    tokio::spawn(
        async move {
            let report =
                run_conversation_loop(provider.as_ref(), &runtime, transcript, &tx, loop_cancel)
                    .await;
            debug!(
                rounds = report.rounds,
                entries = report.transcript.len(),
                prompt_tokens = ?report.usage.prompt_tokens,
                completion_tokens = ?report.usage.completion_tokens,
                finish = ?report.finish,
                "conversation report"
            );
        }
        .instrument(Span::current()),
    );

    async_stream::stream! {
        let _guard = cancel.drop_guard();
        while let Some(frame) = rx.recv().await {
            if let Some(line) = frame.encode(protocol) {
                yield line;
            }
        }
    }
}
