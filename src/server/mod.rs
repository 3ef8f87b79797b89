use anyhow::{Context, Result};
use axum::Router;
use axum::body::Body;
use axum::extract::{Json, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use futures::StreamExt;
use serde::Deserialize;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn};
use uuid::Uuid;

use crate::assistants::Toolset;
use crate::config::AppConfig;
use crate::frames::StreamProtocol;
use crate::llm::tool_execution::stream_lines;
use crate::llm::{ClientMessage, ModelProvider, ToolRuntime, Transcript};
use crate::tools::RecordStore;

pub const DATA_STREAM_HEADER: &str = "x-vercel-ai-data-stream";

#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<dyn ModelProvider>,
    pub scribe: Arc<ToolRuntime>,
    pub intake: Arc<ToolRuntime>,
}

impl AppState {
    pub fn new(provider: Arc<dyn ModelProvider>, cfg: &AppConfig, store: Arc<RecordStore>) -> Self {
        Self {
            provider,
            scribe: Arc::new(Toolset::Scribe.runtime(cfg, store.clone())),
            intake: Arc::new(Toolset::Intake.runtime(cfg, store)),
        }
    }

    fn runtime(&self, toolset: Toolset) -> Arc<ToolRuntime> {
        match toolset {
            Toolset::Scribe => self.scribe.clone(),
            Toolset::Intake => self.intake.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<ClientMessage>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    pub protocol: StreamProtocol,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(scribe_chat))
        .route("/api/patient-chat", post(patient_chat))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn scribe_chat(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
    Json(req): Json<ChatRequest>,
) -> Response {
    chat(state, Toolset::Scribe, query.protocol, req)
}

async fn patient_chat(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
    Json(req): Json<ChatRequest>,
) -> Response {
    chat(state, Toolset::Intake, query.protocol, req)
}

fn chat(state: AppState, toolset: Toolset, protocol: StreamProtocol, req: ChatRequest) -> Response {
    let request_id = Uuid::new_v4();
    let span = info_span!("chat", %request_id, toolset = ?toolset);
    let transcript = Transcript::from_client_messages(&req.messages);
    span.in_scope(|| {
        info!(
            messages = req.messages.len(),
            kept = transcript.len(),
            ?protocol,
            "chat request"
        );
        if transcript.is_empty() {
            warn!("request carries no user or assistant messages");
        }
    });

    let lines = span.in_scope(|| {
        stream_lines(
            state.provider.clone(),
            state.runtime(toolset),
            transcript,
            protocol,
            CancellationToken::new(),
        )
    });

    let mut response = Response::new(Body::from_stream(lines.map(Ok::<_, Infallible>)));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    if protocol == StreamProtocol::Data {
        headers.insert(DATA_STREAM_HEADER, HeaderValue::from_static("v1"));
    }
    response.into_response()
}

pub async fn serve_on<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("Serving chat API at http://{addr}");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("chat server failed")?;
    info!("chat server stopped");
    Ok(())
}

pub async fn serve<F>(bind: &str, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    serve_on(listener, state, shutdown).await
}
