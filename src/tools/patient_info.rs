use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::debug;

use super::{RecordStore, ToolError, ToolHandler, ToolId, parse_args};
use crate::llm::types::ToolDef;

const MAX_AGE: f64 = 100.0;

pub struct PatientNamesTool {
    store: Arc<RecordStore>,
}

impl PatientNamesTool {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }
}

impl ToolHandler for PatientNamesTool {
    fn id(&self) -> ToolId {
        ToolId::GetPatientNames
    }

    fn definition(&self) -> ToolDef {
        ToolDef::function(
            ToolId::GetPatientNames.name(),
            "Retrieve all patient names and their patient IDs. Use this first to find the patient_id for a specific patient name before calling get_patient_info.",
            json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        )
    }

    fn call(&self, _args: Value) -> Result<Value, ToolError> {
        let names: Vec<Value> = self
            .store
            .patient_scribes()
            .into_iter()
            .filter_map(|(patient_id, record)| {
                let name = record
                    .get("patient")
                    .and_then(|p| p.get("name"))
                    .and_then(Value::as_str)
                    .filter(|n| !n.is_empty())?;
                Some(json!({ "patient_id": patient_id, "name": name }))
            })
            .collect();
        debug!(count = names.len(), "listed patient names");
        Ok(Value::Array(names))
    }
}

#[derive(Debug, Deserialize)]
struct PatientInfoArgs {
    patient_id: String,
    #[serde(default)]
    age: Option<[f64; 2]>,
    #[serde(default)]
    gender: Option<String>,
}

pub struct PatientInfoTool {
    store: Arc<RecordStore>,
}

impl PatientInfoTool {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }
}

fn normalize_gender(gender: &str) -> String {
    let upper = gender.trim().to_uppercase();
    match upper.as_str() {
        "MALE" | "M" => "M".to_string(),
        "FEMALE" | "F" => "F".to_string(),
        _ => upper,
    }
}

impl ToolHandler for PatientInfoTool {
    fn id(&self) -> ToolId {
        ToolId::GetPatientInfo
    }

    fn definition(&self) -> ToolDef {
        ToolDef::function(
            ToolId::GetPatientInfo.name(),
            "Retrieve a specific patient record by patient_id. Use get_patient_names first to find the patient_id from a patient name.",
            json!({
                "type": "object",
                "properties": {
                    "patient_id": {
                        "type": "string",
                        "description": "Required patient ID (e.g., 'jordan_carter', 'emily_chen'). Get this from get_patient_names function first."
                    },
                    "age": {
                        "type": "array",
                        "items": { "type": "integer" },
                        "minItems": 2,
                        "maxItems": 2,
                        "description": "Optional [start_age, end_age] range to filter by (upper limit capped at 100)"
                    },
                    "gender": {
                        "type": "string",
                        "description": "Optional gender to filter by (M, F, or variations like Male, Female)"
                    }
                },
                "required": ["patient_id"]
            }),
        )
    }

    fn range_params(&self) -> &'static [&'static str] {
        &["age"]
    }

    fn call(&self, args: Value) -> Result<Value, ToolError> {
        let args: PatientInfoArgs = parse_args(self.id(), args)?;
        let mut records = self.store.patient_scribes();
        let Some(record) = records.remove(&args.patient_id) else {
            return Ok(json!({ "error": format!("Patient ID '{}' not found", args.patient_id) }));
        };
        let patient = record.get("patient").cloned().unwrap_or(Value::Null);

        if let Some([start, end]) = args.age {
            let end = end.min(MAX_AGE);
            let matches = patient
                .get("age")
                .and_then(Value::as_f64)
                .is_some_and(|age| start <= age && age <= end);
            if !matches {
                return Ok(json!({
                    "error": format!("Patient does not match age range {start}-{end}")
                }));
            }
        }

        if let Some(gender) = args.gender.as_deref() {
            let wanted = normalize_gender(gender);
            let sex = patient
                .get("sex")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_uppercase();
            if sex != wanted {
                return Ok(json!({
                    "error": format!("Patient does not match gender filter '{gender}'")
                }));
            }
        }

        Ok(record)
    }
}
