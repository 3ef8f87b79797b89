use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

use super::{RecordStore, ToolError, ToolHandler, ToolId, parse_args};
use crate::llm::types::ToolDef;

#[derive(Debug, Deserialize)]
struct IntakeArgs {
    name: String,
    age: u32,
    sex: String,
    chief_complaint: String,
    symptoms: Vec<String>,
    #[serde(default)]
    medications: Option<Vec<String>>,
    #[serde(default)]
    conditions: Option<Vec<String>>,
    #[serde(default)]
    family_history: Option<String>,
    #[serde(default)]
    conversation_summary: String,
    #[serde(default)]
    ai_assessment: String,
    #[serde(default)]
    reason_for_visit: String,
    #[serde(default)]
    allergies: Option<Vec<String>>,
}

/// `"Dr. Jane Doe"` -> `"dr_jane_doe"`
pub fn patient_id_for(name: &str) -> String {
    name.to_lowercase().replace(' ', "_").replace('.', "")
}

pub struct IntakeWriterTool {
    store: Arc<RecordStore>,
}

impl IntakeWriterTool {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }
}

impl ToolHandler for IntakeWriterTool {
    fn id(&self) -> ToolId {
        ToolId::WritePatientIntake
    }

    fn definition(&self) -> ToolDef {
        ToolDef::function(
            ToolId::WritePatientIntake.name(),
            "Write a completed patient intake record after gathering sufficient information. Call this once you know the patient's name, age, sex, main complaint and symptoms, and have formed an assessment.",
            json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "Patient's full name"},
                    "age": {"type": "integer", "description": "Patient's age in years"},
                    "sex": {"type": "string", "description": "Patient's sex (M or F)"},
                    "chief_complaint": {"type": "string", "description": "Main reason for visit or primary complaint"},
                    "symptoms": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "List of symptoms the patient is experiencing"
                    },
                    "medications": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "List of current medications (optional)"
                    },
                    "conditions": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "List of existing medical conditions (optional)"
                    },
                    "family_history": {
                        "type": "string",
                        "description": "Relevant family medical history (optional, only if relevant to current symptoms)"
                    },
                    "conversation_summary": {
                        "type": "string",
                        "description": "Brief summary of the conversation and information gathered"
                    },
                    "ai_assessment": {
                        "type": "string",
                        "description": "Your assessment and recommendations, e.g. 'Non-urgent symptoms, follow up if worsening'"
                    },
                    "reason_for_visit": {
                        "type": "string",
                        "description": "Type of interaction: 'scheduling_appointment', 'symptom_inquiry', 'medication_question', 'general_inquiry', etc."
                    },
                    "allergies": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "List of known allergies (optional)"
                    }
                },
                "required": ["name", "age", "sex", "chief_complaint", "symptoms", "conversation_summary", "ai_assessment", "reason_for_visit"]
            }),
        )
    }

    fn call(&self, args: Value) -> Result<Value, ToolError> {
        let args: IntakeArgs = parse_args(self.id(), args)?;
        if args.name.trim().is_empty() {
            return Err(ToolError::invalid(self.id(), "name must not be empty"));
        }
        let patient_id = patient_id_for(&args.name);
        let timestamp = chrono::Local::now()
            .format("%Y-%m-%dT%H:%M:%S%.6f")
            .to_string();

        let record = json!({
            "timestamp": timestamp,
            "patient_info": {
                "name": args.name,
                "age": args.age,
                "sex": args.sex,
            },
            "chief_complaint": args.chief_complaint,
            "reason_for_visit": args.reason_for_visit,
            "symptoms": args.symptoms,
            "current_medications": args.medications.unwrap_or_default(),
            "existing_conditions": args.conditions.unwrap_or_default(),
            "allergies": args.allergies.unwrap_or_default(),
            "family_history": args
                .family_history
                .filter(|h| !h.is_empty())
                .unwrap_or_else(|| "Not provided".to_string()),
            "conversation_summary": args.conversation_summary,
            "ai_assessment": args.ai_assessment,
            "status": "pending_review",
        });

        self.store.upsert_intake(&patient_id, record)?;
        info!(patient_id = %patient_id, "patient intake recorded");

        Ok(json!({
            "status": "success",
            "message": format!("Patient intake record created successfully for {}", args.name),
            "patient_id": patient_id,
            "timestamp": timestamp,
        }))
    }
}
