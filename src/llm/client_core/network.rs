use anyhow::Result;
use std::time::Duration;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, RETRY_AFTER};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::OpenAIClient;
use crate::llm::types::ResponsesRequest;
use crate::llm::{LlmErrorKind, classify_error, should_retry};

impl OpenAIClient {
    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            format!("Bearer {}", self.api_key).parse()?,
        );
        Ok(headers)
    }

    /// POSTs a streaming request and returns the response once the status is
    /// successful. Only establishment is retried; reads are never replayed.
    pub(crate) async fn establish_stream(
        &self,
        req: &ResponsesRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response> {
        let url = self.endpoint();
        let headers = self.headers()?;

        if let Ok(payload) = serde_json::to_string(req) {
            debug!(payload=%payload, endpoint=%url, "sending responses payload (stream)");
        }

        let max_attempts = self.llm_cfg.max_retries.saturating_add(1);
        let mut attempt = 1usize;
        loop {
            let fut = tokio::time::timeout(
                Duration::from_millis(self.llm_cfg.request_timeout_ms),
                self.inner
                    .post(url.clone())
                    .headers(headers.clone())
                    .json(req)
                    .send(),
            );

            let resp_res = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("responses stream cancelled before send");
                    return Err(anyhow::anyhow!(LlmErrorKind::Cancelled));
                }
                res = fut => res,
            };

            let (err, retry_after) = match resp_res {
                Ok(Ok(resp)) if resp.status().is_success() => return Ok(resp),
                Ok(Ok(resp)) => {
                    let status = resp.status();
                    let retry_after = resp
                        .headers()
                        .get(RETRY_AFTER)
                        .and_then(|h| h.to_str().ok())
                        .and_then(|s| s.parse::<u64>().ok());
                    let text = resp.text().await.unwrap_or_default();
                    error!(attempt, status=%status.as_u16(), body=%text, "responses stream non-success status");
                    let kind = classify_error(Some(status), &anyhow::anyhow!("{status}"));
                    let e = anyhow::Error::new(kind)
                        .context(format!("responses error: {} - {}", status, text));
                    (e, retry_after)
                }
                Err(_) => {
                    error!(attempt, "responses stream establish timed out");
                    (
                        anyhow::Error::new(LlmErrorKind::Timeout)
                            .context("responses stream establish timed out"),
                        None,
                    )
                }
                Ok(Err(e)) => {
                    error!(attempt, err=%e, "responses stream send error");
                    (anyhow::Error::new(e).context("send responses request (stream)"), None)
                }
            };

            let kind = err
                .downcast_ref::<LlmErrorKind>()
                .cloned()
                .unwrap_or_else(|| classify_error(None, &err));
            if attempt >= max_attempts || !should_retry(&kind) {
                return Err(err);
            }

            let wait = self.backoff_delay(attempt, retry_after);
            warn!(attempt, kind=?kind, wait_ms=%wait.as_millis(), "retrying stream establish");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("responses stream cancelled during retry sleep");
                    return Err(anyhow::anyhow!(LlmErrorKind::Cancelled));
                }
                _ = tokio::time::sleep(wait) => {}
            }
            attempt += 1;
        }
    }
}
