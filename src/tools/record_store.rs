use serde_json::{Map, Value};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, error, warn};

pub const PATIENT_SCRIBES_KEY: &str = "patient_scribes";
pub const AI_SCRIBES_KEY: &str = "AI_scribes";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to read patient records: {0}")]
    ReadError(std::io::Error),
    #[error("Failed to parse patient records: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Patient records file is not a JSON object")]
    NotAnObject,
    #[error("Failed to write patient records: {0}")]
    WriteError(std::io::Error),
    #[error("Failed to replace patient records: {0}")]
    PersistError(#[from] tempfile::PersistError),
    #[error("Patient record store lock poisoned")]
    Poisoned,
}

/// JSON file holding clinical records (`patient_scribes`) and AI intakes
/// (`AI_scribes`). Reads are lock-free; mutations are serialized and replace
/// the file atomically.
#[derive(Debug)]
pub struct RecordStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn read_document(&self) -> Result<Map<String, Value>, StoreError> {
        let s = match fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(StoreError::ReadError(e)),
        };
        match serde_json::from_str::<Value>(&s)? {
            Value::Object(map) => Ok(map),
            _ => Err(StoreError::NotAnObject),
        }
    }

    /// Clinical records keyed by patient id, in file order. A missing or
    /// unreadable file yields no records.
    pub fn patient_scribes(&self) -> Map<String, Value> {
        match self.read_document() {
            Ok(mut doc) => match doc.remove(PATIENT_SCRIBES_KEY) {
                Some(Value::Object(records)) => records,
                _ => Map::new(),
            },
            Err(e) => {
                warn!(path=%self.path.display(), error=%e, "patient records unavailable");
                Map::new()
            }
        }
    }

    /// Inserts or replaces `AI_scribes[patient_id]`.
    pub fn upsert_intake(&self, patient_id: &str, record: Value) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;

        let mut doc = self.read_document()?;
        let section = doc
            .entry(AI_SCRIBES_KEY.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !section.is_object() {
            *section = Value::Object(Map::new());
        }
        if let Some(map) = section.as_object_mut() {
            map.insert(patient_id.to_string(), record);
        }

        self.replace_document(&Value::Object(doc))?;
        debug!(patient_id, path=%self.path.display(), "stored intake record");
        Ok(())
    }

    fn replace_document(&self, doc: &Value) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(StoreError::WriteError)?;

        let json = serde_json::to_string_pretty(doc)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(StoreError::WriteError)?;
        tmp.write_all(json.as_bytes()).map_err(StoreError::WriteError)?;
        tmp.as_file().sync_all().map_err(StoreError::WriteError)?;
        tmp.persist(&self.path).map_err(|e| {
            error!(error=%e, path=%self.path.display(), "failed to replace patient records");
            StoreError::PersistError(e)
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempdir().unwrap();
        let store = RecordStore::new(dir.path().join("none.json"));
        assert!(store.patient_scribes().is_empty());
    }

    #[test]
    fn invalid_json_reads_as_empty_but_is_never_overwritten() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.json");
        fs::write(&path, "{not json").unwrap();
        let store = RecordStore::new(&path);

        assert!(store.patient_scribes().is_empty());
        let err = store.upsert_intake("x", json!({})).unwrap_err();
        assert!(matches!(err, StoreError::ParseError(_)));
        assert_eq!(fs::read_to_string(&path).unwrap(), "{not json");
    }

    #[test]
    fn upsert_preserves_other_sections() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.json");
        fs::write(
            &path,
            json!({"patient_scribes": {"a": {"patient": {"name": "A"}}}}).to_string(),
        )
        .unwrap();
        let store = RecordStore::new(&path);

        store.upsert_intake("jane_doe", json!({"status": "pending_review"})).unwrap();
        store.upsert_intake("jane_doe", json!({"status": "updated"})).unwrap();

        let doc: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["patient_scribes"]["a"]["patient"]["name"], "A");
        assert_eq!(doc["AI_scribes"]["jane_doe"]["status"], "updated");
        assert_eq!(store.patient_scribes().len(), 1);
    }

    #[test]
    fn upsert_creates_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/records.json");
        let store = RecordStore::new(&path);
        store.upsert_intake("p", json!({"ok": true})).unwrap();
        let doc: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["AI_scribes"]["p"]["ok"], true);
    }

    #[test]
    fn concurrent_writers_do_not_lose_updates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.json");
        let store = Arc::new(RecordStore::new(&path));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store
                        .upsert_intake(&format!("patient_{i}"), json!({"n": i}))
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let doc: Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["AI_scribes"].as_object().unwrap().len(), 8);
    }
}
