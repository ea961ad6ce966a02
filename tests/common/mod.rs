//! Shared fixtures: an in-memory remote CRM and a recording log sink.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::{json, Map, Value};

use crmsync::config::Settings;
use crmsync::directory::{LocalDirectory, Subject};
use crmsync::log::{Level, LogSink};
use crmsync::remote::{RemoteTransport, TransportError, TransportRequest, TransportResponse};
use crmsync::storage::SqliteStorage;
use crmsync::Engine;

/// One request as the fake CRM understood it.
#[derive(Debug, Clone)]
pub struct Call {
    pub entity: String,
    pub action: String,
    pub params: Value,
}

#[derive(Default)]
struct CrmState {
    tables: HashMap<String, Vec<Value>>,
    checksums: HashMap<i64, String>,
    calls: Vec<Call>,
    failures: Vec<(String, String)>,
    next_id: i64,
}

/// Remote CRM backed by in-memory tables.
///
/// Understands `where` conditions (`=`, `IN`, `CONTAINS`, `OR` groups),
/// `limit`, `values`, and the checksum actions.
#[derive(Default)]
pub struct FakeCrm {
    state: Mutex<CrmState>,
}

impl FakeCrm {
    pub fn new() -> Arc<Self> {
        let crm = Self::default();
        crm.state.lock().unwrap().next_id = 1000;
        Arc::new(crm)
    }

    pub fn insert(&self, entity: &str, row: Value) {
        self.state
            .lock()
            .unwrap()
            .tables
            .entry(entity.to_string())
            .or_default()
            .push(row);
    }

    pub fn rows(&self, entity: &str) -> Vec<Value> {
        self.state.lock().unwrap().tables.get(entity).cloned().unwrap_or_default()
    }

    pub fn set_checksum(&self, contact_id: i64, checksum: &str) {
        self.state.lock().unwrap().checksums.insert(contact_id, checksum.to_string());
    }

    /// Answer `entity.action` with an error message.
    pub fn fail_on(&self, entity: &str, action: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .push((entity.to_string(), action.to_string()));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn writes(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.action == "create" || c.action == "update")
            .collect()
    }
}

impl RemoteTransport for FakeCrm {
    fn send(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError> {
        let mut segments = request.url.rsplit('/');
        let action = segments.next().unwrap_or_default().to_string();
        let entity = segments.next().unwrap_or_default().to_string();
        let params: Value = url::form_urlencoded::parse(request.body.as_bytes())
            .find(|(k, _)| k == "params")
            .and_then(|(_, v)| serde_json::from_str(&v).ok())
            .unwrap_or(Value::Null);

        let mut state = self.state.lock().unwrap();
        state.calls.push(Call {
            entity: entity.clone(),
            action: action.clone(),
            params: params.clone(),
        });
        if state.failures.contains(&(entity.clone(), action.clone())) {
            return Ok(TransportResponse::ok(json!({"error_message": "permission denied"})));
        }

        let conditions = params.get("where").and_then(Value::as_array).cloned().unwrap_or_default();
        let values = params.get("values").and_then(Value::as_object).cloned().unwrap_or_default();
        let body = match action.as_str() {
            "get" => {
                let limit = params.get("limit").and_then(Value::as_u64).map_or(usize::MAX, |l| l as usize);
                let rows: Vec<Value> = state
                    .tables
                    .get(&entity)
                    .map(|rows| {
                        rows.iter()
                            .filter(|row| conditions.iter().all(|c| matches(row, c)))
                            .take(limit)
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                json!({ "values": rows })
            }
            "update" => {
                if let Some(rows) = state.tables.get_mut(&entity) {
                    for row in rows.iter_mut().filter(|row| conditions.iter().all(|c| matches(row, c))) {
                        if let Some(obj) = row.as_object_mut() {
                            obj.extend(values.clone());
                        }
                    }
                }
                json!({ "values": [] })
            }
            "create" => {
                state.next_id += 1;
                let mut row: Map<String, Value> = values;
                row.insert("id".to_string(), json!(state.next_id));
                state.tables.entry(entity).or_default().push(Value::Object(row.clone()));
                json!({ "values": [row] })
            }
            "getChecksum" => {
                let contact_id = params["contactId"].as_i64().unwrap_or_default();
                let checksum = format!("cs-{contact_id}-fresh");
                state.checksums.insert(contact_id, checksum.clone());
                json!({ "values": [{"checksum": checksum}] })
            }
            "validateChecksum" => {
                let contact_id = params["contactId"].as_i64().unwrap_or_default();
                let valid = state.checksums.get(&contact_id).map(String::as_str) == params["checksum"].as_str();
                json!({ "values": [{"valid": valid}] })
            }
            other => json!({ "error_message": format!("unsupported action {other}") }),
        };
        Ok(TransportResponse::ok(body))
    }
}

fn key(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null | Value::Bool(false)) => String::new(),
        Some(Value::Bool(true)) => "1".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn matches(row: &Value, condition: &Value) -> bool {
    let Some(parts) = condition.as_array() else {
        return false;
    };
    if parts.first().and_then(Value::as_str) == Some("OR") {
        return parts
            .get(1)
            .and_then(Value::as_array)
            .is_some_and(|group| group.iter().any(|c| matches(row, c)));
    }
    let (Some(field), Some(op)) = (parts[0].as_str(), parts[1].as_str()) else {
        return false;
    };
    let actual = row.get(field);
    match op {
        "=" => key(actual) == key(parts.get(2)),
        "IN" => parts[2]
            .as_array()
            .is_some_and(|wanted| wanted.iter().any(|w| key(Some(w)) == key(actual))),
        "CONTAINS" => match actual {
            Some(Value::Array(items)) => items.iter().any(|i| key(Some(i)) == key(parts.get(2))),
            other => key(other) == key(parts.get(2)),
        },
        _ => false,
    }
}

/// One emitted sync event.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub level: Level,
    pub message: String,
    pub payload: Map<String, Value>,
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Recorded>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<String> {
        self.events.lock().unwrap().iter().map(|e| e.message.clone()).collect()
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().unwrap().clone()
    }
}

impl LogSink for RecordingSink {
    fn emit(&self, level: Level, _category: &str, message: &str, payload: &Map<String, Value>) {
        self.events.lock().unwrap().push(Recorded {
            level,
            message: message.to_string(),
            payload: payload.clone(),
        });
    }
}

/// Settings with a configured remote and no optional features.
pub fn settings(mapping: Value) -> Settings {
    Settings {
        url: "https://crm.example.org".into(),
        secret: "s3cret".into(),
        site_key: "site".into(),
        field_mapping: mapping,
        ..Settings::default()
    }
}

/// Engine wired to a fake CRM and an in-memory SQLite directory.
pub struct Harness {
    pub engine: Engine,
    pub crm: Arc<FakeCrm>,
    pub storage: Arc<SqliteStorage>,
    pub sink: Arc<RecordingSink>,
}

impl Harness {
    pub fn new(settings: Settings) -> Self {
        Self::with_crm(settings, FakeCrm::new())
    }

    pub fn with_crm(settings: Settings, crm: Arc<FakeCrm>) -> Self {
        let storage = Arc::new(SqliteStorage::open_memory().unwrap());
        let sink = Arc::new(RecordingSink::default());
        let engine = Engine::new(
            settings,
            crm.clone(),
            storage.clone(),
            storage.clone(),
            sink.clone(),
        )
        .unwrap();
        Self {
            engine,
            crm,
            storage,
            sink,
        }
    }

    pub fn add_subject(&self, subject: &Subject) {
        self.storage.upsert_subject(subject).unwrap();
    }

    pub fn stored(&self, id: i64) -> Subject {
        self.storage.find_subject(id).unwrap().unwrap()
    }
}

/// Subject linked to `contact_id` with an e-mail address.
pub fn linked_subject(id: i64, contact_id: i64) -> Subject {
    Subject::new(id)
        .with_attribute("user.email", format!("subject{id}@example.org"))
        .with_attribute("profile.crm_contact_id", contact_id)
}
