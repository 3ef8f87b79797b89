use anyhow::{Context, Result};
use std::time::Duration;

use crate::config::LlmConfig;

mod network;

#[derive(Debug, Clone)]
pub struct OpenAIClient {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub(crate) inner: reqwest::Client,
    pub llm_cfg: LlmConfig,
}

impl OpenAIClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let inner = reqwest::Client::builder().build()?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            inner,
            llm_cfg: LlmConfig::default(),
        })
    }

    pub fn with_llm_config(mut self, cfg: LlmConfig) -> Result<Self> {
        // Streams can run long; the read timeout bounds idle gaps, not the whole body.
        self.inner = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .read_timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .context("build HTTP client from llm config")?;
        self.llm_cfg = cfg;
        Ok(self)
    }

    pub(crate) fn endpoint(&self) -> String {
        let mut base = self.base_url.trim_end_matches('/').to_string();
        if let Some(pos) = base.rfind("/v1") {
            base.truncate(pos);
            base = base.trim_end_matches('/').to_string();
        }
        format!("{base}/v1/responses")
    }

    pub(crate) fn backoff_delay(&self, attempt: usize, retry_after_secs: Option<u64>) -> Duration {
        if self.llm_cfg.respect_retry_after
            && let Some(secs) = retry_after_secs
        {
            return Duration::from_secs(secs);
        }
        let base = self.llm_cfg.retry_base_ms;
        let shift = (attempt.max(1) - 1).min(16) as u32;
        let exp = base.saturating_mul(1u64 << shift);
        let jitter = self.llm_cfg.retry_jitter_ms as i64;
        let half = jitter / 2;
        let rnd = fastrand::i64(-half..=half).max(0) as u64;
        Duration::from_millis(exp.saturating_add(rnd))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_normalization() {
        let c = OpenAIClient::new("https://api.example.com/v1/", "x", "m").unwrap();
        assert_eq!(c.endpoint(), "https://api.example.com/v1/responses");
        let c2 = OpenAIClient::new("https://api.example.com/", "x", "m").unwrap();
        assert_eq!(c2.endpoint(), "https://api.example.com/v1/responses");
    }

    #[test]
    fn llm_config_is_applied() {
        let cfg = LlmConfig {
            connect_timeout_ms: 250,
            timeout_ms: 1_000,
            max_retries: 1,
            ..LlmConfig::default()
        };
        let c = OpenAIClient::new("https://api.example.com", "x", "m")
            .and_then(|c| c.with_llm_config(cfg.clone()))
            .unwrap();
        assert_eq!(c.llm_cfg.connect_timeout_ms, 250);
        assert_eq!(c.llm_cfg.max_retries, 1);
    }

    #[test]
    fn backoff_grows_and_respects_retry_after() {
        let c = OpenAIClient::new("https://api.example.com", "x", "m")
            .unwrap()
            .with_llm_config(LlmConfig {
                retry_base_ms: 100,
                retry_jitter_ms: 0,
                ..LlmConfig::default()
            })
            .unwrap();
        assert_eq!(c.backoff_delay(1, None), Duration::from_millis(100));
        assert_eq!(c.backoff_delay(3, None), Duration::from_millis(400));
        assert_eq!(c.backoff_delay(2, Some(7)), Duration::from_secs(7));
    }
}
