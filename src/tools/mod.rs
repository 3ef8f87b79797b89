//! Server-side tools the model may call, and the registry that resolves them
//! by wire name.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::llm::types::ToolDef;

pub mod intake;
pub mod patient_info;
pub mod record_store;
pub mod search;

pub use record_store::{RecordStore, StoreError};

/// Closed set of tools this service knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolId {
    GetPatientNames,
    GetPatientInfo,
    SearchPatientRecords,
    WritePatientIntake,
}

impl ToolId {
    pub const ALL: [ToolId; 4] = [
        ToolId::GetPatientNames,
        ToolId::GetPatientInfo,
        ToolId::SearchPatientRecords,
        ToolId::WritePatientIntake,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ToolId::GetPatientNames => "get_patient_names",
            ToolId::GetPatientInfo => "get_patient_info",
            ToolId::SearchPatientRecords => "search_patient_records",
            ToolId::WritePatientIntake => "write_patient_intake",
        }
    }

    pub fn from_name(name: &str) -> Option<ToolId> {
        ToolId::ALL.into_iter().find(|id| id.name() == name)
    }
}

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Unknown function: {0}")]
    UnknownFunction(String),
    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: &'static str, reason: String },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0}")]
    Failed(String),
}

impl ToolError {
    pub fn invalid(tool: ToolId, reason: impl std::fmt::Display) -> Self {
        ToolError::InvalidArguments {
            tool: tool.name(),
            reason: reason.to_string(),
        }
    }
}

/// Deserializes a handler's argument object into its typed parameters.
pub(crate) fn parse_args<T: DeserializeOwned>(tool: ToolId, args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::invalid(tool, e))
}

pub trait ToolHandler: Send + Sync {
    fn id(&self) -> ToolId;

    fn definition(&self) -> ToolDef;

    /// Parameters holding a numeric range; the dispatcher normalizes them to
    /// an ordered `[low, high]` pair before `call`.
    fn range_params(&self) -> &'static [&'static str] {
        &[]
    }

    fn call(&self, args: Value) -> Result<Value, ToolError>;
}

/// Immutable name to handler table, built once per toolset.
#[derive(Clone)]
pub struct ToolRegistry {
    handlers: Vec<Arc<dyn ToolHandler>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.handlers.iter().map(|h| h.id().name()))
            .finish()
    }
}

impl ToolRegistry {
    pub fn build(ids: &[ToolId], store: Arc<RecordStore>) -> Self {
        let mut handlers: Vec<Arc<dyn ToolHandler>> = Vec::with_capacity(ids.len());
        for &id in ids {
            if handlers.iter().any(|h| h.id() == id) {
                continue;
            }
            let handler: Arc<dyn ToolHandler> = match id {
                ToolId::GetPatientNames => {
                    Arc::new(patient_info::PatientNamesTool::new(store.clone()))
                }
                ToolId::GetPatientInfo => Arc::new(patient_info::PatientInfoTool::new(store.clone())),
                ToolId::SearchPatientRecords => Arc::new(search::SearchRecordsTool::new(store.clone())),
                ToolId::WritePatientIntake => Arc::new(intake::IntakeWriterTool::new(store.clone())),
            };
            handlers.push(handler);
        }
        Self { handlers }
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn ToolHandler>, ToolError> {
        ToolId::from_name(name)
            .and_then(|id| self.handlers.iter().find(|h| h.id() == id))
            .cloned()
            .ok_or_else(|| ToolError::UnknownFunction(name.to_string()))
    }

    /// Tool declarations sent to the model, in registration order.
    pub fn declarations(&self) -> Vec<ToolDef> {
        self.handlers.iter().map(|h| h.definition()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store() -> (tempfile::TempDir, Arc<RecordStore>) {
        let dir = tempdir().unwrap();
        let store = Arc::new(RecordStore::new(dir.path().join("records.json")));
        (dir, store)
    }

    #[test]
    fn names_round_trip() {
        for id in ToolId::ALL {
            assert_eq!(ToolId::from_name(id.name()), Some(id));
        }
        assert_eq!(ToolId::from_name("get_weather"), None);
    }

    #[test]
    fn resolve_only_registered_tools() {
        let (_dir, store) = store();
        let registry = ToolRegistry::build(&[ToolId::WritePatientIntake], store);

        assert!(registry.resolve("write_patient_intake").is_ok());
        let err = registry.resolve("get_patient_info").err().unwrap();
        assert_eq!(err.to_string(), "Unknown function: get_patient_info");
        assert!(matches!(
            registry.resolve("nope"),
            Err(ToolError::UnknownFunction(n)) if n == "nope"
        ));
    }

    #[test]
    fn declarations_follow_registration_order_without_duplicates() {
        let (_dir, store) = store();
        let registry = ToolRegistry::build(
            &[
                ToolId::GetPatientInfo,
                ToolId::GetPatientNames,
                ToolId::GetPatientInfo,
            ],
            store,
        );
        let names: Vec<_> = registry.declarations().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["get_patient_info", "get_patient_names"]);
    }

    #[test]
    fn declarations_are_function_tools_with_object_schemas() {
        let (_dir, store) = store();
        let registry = ToolRegistry::build(&ToolId::ALL, store);
        for def in registry.declarations() {
            assert_eq!(def.kind, "function");
            assert_eq!(def.parameters["type"], "object");
        }
    }
}
