use serde::Deserialize;
use serde_json::{Value, json};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

use super::{RecordStore, ToolError, ToolHandler, ToolId, parse_args};
use crate::llm::types::ToolDef;

const DEFAULT_LIMIT: usize = 5;
const MAX_LIMIT: usize = 20;

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
}

/// Keyword search across clinical records.
pub struct SearchRecordsTool {
    store: Arc<RecordStore>,
}

impl SearchRecordsTool {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }
}

#[derive(Debug)]
struct Hit {
    patient_id: String,
    name: String,
    chief_complaint: String,
    score: usize,
}

fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect();
    terms.sort();
    terms.dedup();
    terms
}

fn collect_text(value: &Value, out: &mut String) {
    match value {
        Value::String(s) => {
            out.push_str(&s.to_lowercase());
            out.push('\n');
        }
        Value::Array(items) => items.iter().for_each(|v| collect_text(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_text(v, out)),
        _ => {}
    }
}

fn score(record: &Value, terms: &[String]) -> usize {
    let mut text = String::new();
    collect_text(record, &mut text);
    terms.iter().map(|t| text.matches(t.as_str()).count()).sum()
}

fn text_at<'a>(record: &'a Value, path: &[&str]) -> &'a str {
    path.iter()
        .try_fold(record, |v, key| v.get(key))
        .and_then(Value::as_str)
        .unwrap_or_default()
}

impl ToolHandler for SearchRecordsTool {
    fn id(&self) -> ToolId {
        ToolId::SearchPatientRecords
    }

    fn definition(&self) -> ToolDef {
        ToolDef::function(
            ToolId::SearchPatientRecords.name(),
            "Search all patient records for a keyword query (symptoms, diagnoses, medications, history). Returns matching patients ranked by relevance; use get_patient_info on a returned patient_id for the full record.",
            json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Keywords to look for, e.g. 'anxiety insomnia' or 'metformin'"
                    },
                    "limit": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": MAX_LIMIT,
                        "description": "Maximum number of matches to return (default 5)"
                    }
                },
                "required": ["query"]
            }),
        )
    }

    fn call(&self, args: Value) -> Result<Value, ToolError> {
        let args: SearchArgs = parse_args(self.id(), args)?;
        let terms = query_terms(&args.query);
        if terms.is_empty() {
            return Err(ToolError::invalid(self.id(), "query must not be empty"));
        }
        let limit = args.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

        let mut hits: Vec<Hit> = self
            .store
            .patient_scribes()
            .into_iter()
            .filter_map(|(patient_id, record)| {
                let score = score(&record, &terms);
                (score > 0).then(|| Hit {
                    name: text_at(&record, &["patient", "name"]).to_string(),
                    chief_complaint: text_at(&record, &["chief_complaint"]).to_string(),
                    patient_id,
                    score,
                })
            })
            .collect();
        hits.sort_by(|a, b| match b.score.cmp(&a.score) {
            Ordering::Equal => a.patient_id.cmp(&b.patient_id),
            other => other,
        });
        hits.truncate(limit);
        debug!(query = %args.query, matches = hits.len(), "searched patient records");

        Ok(Value::Array(
            hits.into_iter()
                .map(|h| {
                    json!({
                        "patient_id": h.patient_id,
                        "name": h.name,
                        "score": h.score,
                        "chief_complaint": h.chief_complaint,
                    })
                })
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, SearchRecordsTool) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");
        fs::write(
            &path,
            json!({
                "patient_scribes": {
                    "b_patient": {
                        "patient": {"name": "B Patient"},
                        "chief_complaint": "Anxiety",
                        "history": {"hpi": "worsening anxiety and insomnia"}
                    },
                    "a_patient": {
                        "patient": {"name": "A Patient"},
                        "chief_complaint": "Knee pain",
                        "history": {"pmh": ["Anxiety disorder"]}
                    },
                    "c_patient": {
                        "patient": {"name": "C Patient"},
                        "chief_complaint": "Rash"
                    }
                }
            })
            .to_string(),
        )
        .unwrap();
        (dir, SearchRecordsTool::new(Arc::new(RecordStore::new(path))))
    }

    #[test]
    fn ranks_by_score_then_id() {
        let (_dir, tool) = fixture();
        let out = tool.call(json!({"query": "Anxiety"})).unwrap();
        let ids: Vec<_> = out
            .as_array()
            .unwrap()
            .iter()
            .map(|h| h["patient_id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["b_patient", "a_patient"]);
        assert_eq!(out[0]["score"], 2);
        assert_eq!(out[0]["chief_complaint"], "Anxiety");
    }

    #[test]
    fn limit_truncates() {
        let (_dir, tool) = fixture();
        let out = tool.call(json!({"query": "patient", "limit": 1})).unwrap();
        assert_eq!(out.as_array().unwrap().len(), 1);
        assert_eq!(out[0]["patient_id"], "a_patient");
    }

    #[test]
    fn no_match_is_empty_list() {
        let (_dir, tool) = fixture();
        assert_eq!(tool.call(json!({"query": "fracture"})).unwrap(), json!([]));
    }

    #[test]
    fn blank_query_is_invalid() {
        let (_dir, tool) = fixture();
        let err = tool.call(json!({"query": "  ?? "})).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid arguments for search_patient_records: query must not be empty"
        );
    }
}
