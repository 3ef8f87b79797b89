use std::sync::Arc;

use crate::llm::tool_execution::Dispatcher;
use crate::llm::types::ToolDef;
use crate::tools::ToolRegistry;

pub const DEFAULT_MAX_ROUNDS: usize = 5;

/// Everything one conversation needs besides the model: the instructions,
/// the tools on offer, and the round ceiling.
#[derive(Debug, Clone)]
pub struct ToolRuntime {
    pub instructions: String,
    pub tools: Vec<ToolDef>,
    pub dispatcher: Dispatcher,
    pub max_rounds: usize,
}

impl ToolRuntime {
    pub fn new(instructions: impl Into<String>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            instructions: instructions.into(),
            tools: registry.declarations(),
            dispatcher: Dispatcher::new(registry),
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }
}
