mod client_core;
mod history;
mod session;
mod stream;
mod tool_runtime;
pub mod tool_execution;
pub mod types;

#[cfg(test)]
pub(crate) mod scripted;

use reqwest::StatusCode;
use thiserror::Error;

pub use client_core::*;
pub use history::*;
pub use session::*;
pub use tool_runtime::*;
pub use types::*;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LlmErrorKind {
    #[error("rate limited")]
    RateLimited,
    #[error("server error")]
    Server,
    #[error("network error")]
    Network,
    #[error("timed out")]
    Timeout,
    #[error("client error")]
    Client,
    #[error("could not decode provider payload")]
    Deserialize,
    #[error("cancelled")]
    Cancelled,
    #[error("unknown error")]
    Unknown,
}

pub fn classify_error(status: Option<StatusCode>, err: &anyhow::Error) -> LlmErrorKind {
    if let Some(st) = status {
        if st == StatusCode::TOO_MANY_REQUESTS {
            return LlmErrorKind::RateLimited;
        }
        if st == StatusCode::REQUEST_TIMEOUT {
            return LlmErrorKind::Timeout;
        }
        if st.is_server_error() {
            return LlmErrorKind::Server;
        }
        if st.is_client_error() {
            return LlmErrorKind::Client;
        }
    }
    if let Some(kind) = err.downcast_ref::<LlmErrorKind>() {
        return kind.clone();
    }
    if let Some(e) = err.downcast_ref::<reqwest::Error>() {
        if e.is_timeout() {
            return LlmErrorKind::Timeout;
        }
        if e.is_connect() || e.is_body() || e.is_request() {
            return LlmErrorKind::Network;
        }
        if e.is_decode() {
            return LlmErrorKind::Deserialize;
        }
    }
    LlmErrorKind::Unknown
}

pub(crate) fn should_retry(kind: &LlmErrorKind) -> bool {
    matches!(
        kind,
        LlmErrorKind::RateLimited
            | LlmErrorKind::Server
            | LlmErrorKind::Network
            | LlmErrorKind::Timeout
    )
}
