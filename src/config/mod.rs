use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8000";
pub const DEFAULT_RECORDS_PATH: &str = "patient_records.json";
pub use crate::llm::DEFAULT_MAX_ROUNDS;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub bind_address: String,
    pub records_path: PathBuf,
    // Round ceiling for one client request
    pub max_rounds: usize,
    pub scribe_instructions_file: Option<PathBuf>,
    pub intake_instructions_file: Option<PathBuf>,
    pub llm: LlmConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            records_path: PathBuf::from(DEFAULT_RECORDS_PATH),
            max_rounds: DEFAULT_MAX_ROUNDS,
            scribe_instructions_file: None,
            intake_instructions_file: None,
            llm: LlmConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub max_retries: usize,
    pub retry_base_ms: u64,
    pub retry_jitter_ms: u64,
    pub respect_retry_after: bool,
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            request_timeout_ms: 60_000,
            max_retries: 3,
            retry_base_ms: 500,
            retry_jitter_ms: 1_000,
            respect_retry_after: true,
            timeout_ms: 120_000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct FileConfig {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub bind_address: Option<String>,
    pub records_path: Option<PathBuf>,
    pub max_rounds: Option<usize>,
    pub scribe_instructions_file: Option<PathBuf>,
    pub intake_instructions_file: Option<PathBuf>,
    pub llm: Option<PartialLlmConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct PartialLlmConfig {
    pub connect_timeout_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub max_retries: Option<usize>,
    pub retry_base_ms: Option<u64>,
    pub retry_jitter_ms: Option<u64>,
    pub respect_retry_after: Option<bool>,
    pub timeout_ms: Option<u64>,
}

impl PartialLlmConfig {
    /// Field-wise merge, `self` wins.
    fn or(self, other: PartialLlmConfig) -> PartialLlmConfig {
        PartialLlmConfig {
            connect_timeout_ms: self.connect_timeout_ms.or(other.connect_timeout_ms),
            request_timeout_ms: self.request_timeout_ms.or(other.request_timeout_ms),
            max_retries: self.max_retries.or(other.max_retries),
            retry_base_ms: self.retry_base_ms.or(other.retry_base_ms),
            retry_jitter_ms: self.retry_jitter_ms.or(other.retry_jitter_ms),
            respect_retry_after: self.respect_retry_after.or(other.respect_retry_after),
            timeout_ms: self.timeout_ms.or(other.timeout_ms),
        }
    }

    fn resolve(self) -> LlmConfig {
        let d = LlmConfig::default();
        LlmConfig {
            connect_timeout_ms: self.connect_timeout_ms.unwrap_or(d.connect_timeout_ms),
            request_timeout_ms: self.request_timeout_ms.unwrap_or(d.request_timeout_ms),
            max_retries: self.max_retries.unwrap_or(d.max_retries),
            retry_base_ms: self.retry_base_ms.unwrap_or(d.retry_base_ms),
            retry_jitter_ms: self.retry_jitter_ms.unwrap_or(d.retry_jitter_ms),
            respect_retry_after: self.respect_retry_after.unwrap_or(d.respect_retry_after),
            timeout_ms: self.timeout_ms.unwrap_or(d.timeout_ms),
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl AppConfig {
    pub fn from_cli(cli: crate::Cli) -> Result<Self> {
        let project_root = std::env::current_dir().context("resolve current dir")?;
        let project_cfg = load_project_config(&project_root).unwrap_or_default();
        let file_cfg = load_file_config().unwrap_or_default();
        Ok(Self::merge(cli, project_cfg, file_cfg))
    }

    /// Precedence: CLI, environment, project config, global config, defaults.
    pub fn merge(cli: crate::Cli, project_cfg: FileConfig, file_cfg: FileConfig) -> Self {
        let api_key = cli
            .api_key
            .or_else(|| env_var("OPENAI_API_KEY"))
            .or(project_cfg.api_key)
            .or(file_cfg.api_key);
        let base_url = cli
            .base_url
            .or_else(|| env_var("OPENAI_BASE_URL"))
            .or(project_cfg.base_url)
            .or(file_cfg.base_url)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let model = cli
            .model
            .or_else(|| env_var("OPENAI_MODEL"))
            .or(project_cfg.model)
            .or(file_cfg.model)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let bind_address = cli
            .bind
            .or_else(|| env_var("SCRIBE_BIND"))
            .or(project_cfg.bind_address)
            .or(file_cfg.bind_address)
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());
        let records_path = cli
            .records
            .or_else(|| env_var("SCRIBE_RECORDS").map(PathBuf::from))
            .or(project_cfg.records_path)
            .or(file_cfg.records_path)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_RECORDS_PATH));
        let max_rounds = cli
            .max_rounds
            .or_else(|| env_var("SCRIBE_MAX_ROUNDS").and_then(|v| v.parse().ok()))
            .or(project_cfg.max_rounds)
            .or(file_cfg.max_rounds)
            .unwrap_or(DEFAULT_MAX_ROUNDS)
            .max(1);

        let llm = match (project_cfg.llm, file_cfg.llm) {
            (Some(p), Some(f)) => p.or(f).resolve(),
            (Some(p), None) => p.resolve(),
            (None, Some(f)) => f.resolve(),
            (None, None) => LlmConfig::default(),
        };

        Self {
            base_url,
            model,
            api_key,
            bind_address,
            records_path,
            max_rounds,
            scribe_instructions_file: project_cfg
                .scribe_instructions_file
                .or(file_cfg.scribe_instructions_file),
            intake_instructions_file: project_cfg
                .intake_instructions_file
                .or(file_cfg.intake_instructions_file),
            llm,
        }
    }
}

pub fn load_file_config() -> Result<FileConfig> {
    fn candidate_paths() -> Vec<PathBuf> {
        let mut v = Vec::new();
        if let Some(p) = env_var("SCRIBE_CONFIG") {
            v.push(PathBuf::from(p));
        }
        if let Some(dir) = dirs::config_dir() {
            v.push(dir.join("patient-scribe/config.toml"));
        }
        v
    }

    for p in candidate_paths() {
        if p.exists() {
            let s = fs::read_to_string(&p)
                .with_context(|| format!("read config file: {}", p.display()))?;
            match toml::from_str::<FileConfig>(&s) {
                Ok(cfg) => {
                    info!(path=%p.display(), "loaded config file");
                    return Ok(cfg);
                }
                Err(e) => {
                    warn!(path=%p.display(), error=%e.to_string(), "parse config failed");
                    continue;
                }
            }
        }
    }
    Ok(FileConfig::default())
}

/// Load project-specific configuration from .scribe/config.toml
pub fn load_project_config(project_root: &Path) -> Result<FileConfig> {
    let project_config_path = project_root.join(".scribe").join("config.toml");

    if project_config_path.exists() {
        let s = fs::read_to_string(&project_config_path).with_context(|| {
            format!(
                "read project config file: {}",
                project_config_path.display()
            )
        })?;
        match toml::from_str::<FileConfig>(&s) {
            Ok(cfg) => {
                info!(path=%project_config_path.display(), "loaded project config file");
                Ok(cfg)
            }
            Err(e) => {
                warn!(path=%project_config_path.display(), error=%e.to_string(), "parse project config failed");
                Ok(FileConfig::default())
            }
        }
    } else {
        Ok(FileConfig::default())
    }
}
