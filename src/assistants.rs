//! The two assistants this service hosts, each a fixed tool set plus
//! instructions.

use chrono::Local;
use std::path::Path;
use std::sync::Arc;
use tera::{Context, Tera};
use tracing::{error, info};

use crate::config::AppConfig;
use crate::llm::ToolRuntime;
use crate::tools::{RecordStore, ToolId, ToolRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toolset {
    /// Clinician-facing record lookup.
    Scribe,
    /// Patient-facing triage that files an intake.
    Intake,
}

impl Toolset {
    pub fn tool_ids(self) -> &'static [ToolId] {
        match self {
            Toolset::Scribe => &[
                ToolId::GetPatientNames,
                ToolId::GetPatientInfo,
                ToolId::SearchPatientRecords,
            ],
            Toolset::Intake => &[ToolId::WritePatientIntake],
        }
    }

    fn template_name(self) -> &'static str {
        match self {
            Toolset::Scribe => "scribe_instructions.md",
            Toolset::Intake => "intake_instructions.md",
        }
    }

    fn override_file(self, cfg: &AppConfig) -> Option<&Path> {
        match self {
            Toolset::Scribe => cfg.scribe_instructions_file.as_deref(),
            Toolset::Intake => cfg.intake_instructions_file.as_deref(),
        }
    }

    /// Instructions template from the configured file, falling back to the
    /// embedded one, rendered with today's date.
    pub fn instructions(self, cfg: &AppConfig) -> String {
        let template = self
            .override_file(cfg)
            .and_then(|path| match std::fs::read_to_string(path) {
                Ok(s) => {
                    info!(path = %path.display(), toolset = ?self, "using instructions override");
                    Some(s)
                }
                Err(e) => {
                    error!("Failed to read {}: {}", path.display(), e);
                    None
                }
            })
            .or_else(|| crate::assets::text(self.template_name()))
            .unwrap_or_default();

        let mut context = Context::new();
        context.insert("date", &Local::now().format("%Y-%m-%d %A").to_string());
        Tera::one_off(&template, &context, false).unwrap_or_else(|e| {
            error!("Failed to render instructions: {e}");
            template
        })
    }

    pub fn runtime(self, cfg: &AppConfig, store: Arc<RecordStore>) -> ToolRuntime {
        let registry = Arc::new(ToolRegistry::build(self.tool_ids(), store));
        ToolRuntime::new(self.instructions(cfg), registry).with_max_rounds(cfg.max_rounds)
    }
}
