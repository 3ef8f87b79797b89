mod assets;
mod assistants;
mod config;
mod frames;
mod llm;
mod logging;
mod server;
mod tools;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use dotenvy::dotenv;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::llm::OpenAIClient;
use crate::server::AppState;
use crate::tools::RecordStore;

#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "scribe",
    version,
    about = "Streaming clinical scribe and patient intake chat API"
)]
struct Cli {
    /// OpenAI-compatible API base URL
    #[arg(long)]
    base_url: Option<String>,

    /// Model name
    #[arg(long)]
    model: Option<String>,

    /// API key (set via env OPENAI_API_KEY recommended)
    #[arg(long)]
    api_key: Option<String>,

    /// Address to listen on, e.g. 127.0.0.1:8000
    #[arg(long)]
    bind: Option<String>,

    /// Patient records JSON file
    #[arg(long)]
    records: Option<PathBuf>,

    /// Maximum tool rounds per request
    #[arg(long)]
    max_rounds: Option<usize>,

    /// Log level or filter directive (error,warn,info,debug,trace)
    #[arg(long)]
    log_level: Option<String>,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, action = ArgAction::SetTrue)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    let level = cli
        .log_level
        .clone()
        .or_else(|| std::env::var("SCRIBE_LOG").ok())
        .unwrap_or_else(|| "info".to_string());
    logging::init_logging(&level, cli.log_file.as_deref(), cli.log_json)?;

    let cfg = AppConfig::from_cli(cli)?;
    info!(
        model = %cfg.model,
        base_url = %cfg.base_url,
        bind = %cfg.bind_address,
        records = %cfg.records_path.display(),
        max_rounds = cfg.max_rounds,
        "app config"
    );

    let api_key = cfg
        .api_key
        .clone()
        .context("no API key configured: set OPENAI_API_KEY or pass --api-key")?;
    let client = OpenAIClient::new(cfg.base_url.clone(), api_key, cfg.model.clone())?
        .with_llm_config(cfg.llm.clone())?;
    let store = Arc::new(RecordStore::new(&cfg.records_path));
    let state = AppState::new(Arc::new(client), &cfg, store);

    server::serve(&cfg.bind_address, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
        }
        info!("shutdown requested");
    })
    .await
}

#[cfg(test)]
mod main_test;
