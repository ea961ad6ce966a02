//! Remote gateway.
//!
//! Every remote call goes through [`RemoteGateway::call`], which:
//! - rejects entities that are not on the allow-list
//! - hides soft-deleted records and selects custom fields on reads
//! - serves repeated reads from a per-run cache
//! - suppresses writes in dry-run mode
//! - turns remote error messages and failed responses into errors

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use super::entity::{Action, Entity};
use super::params::ApiParams;
use super::transport::{RemoteTransport, TransportRequest};
use crate::config::{RemoteEndpoint, Settings};
use crate::error::{Error, Result};
use crate::log::{fields, EventLog};
use crate::mapping::Params;

/// Rows returned by a remote call.
pub type Records = Vec<Value>;

/// Path of the API below the configured base url.
const API_PATH: &str = "/civicrm/ajax/api4";

/// Length of the response excerpt logged for failed calls.
const RESPONSE_PREVIEW_LEN: usize = 200;

/// Gateway to the remote CRM API.
pub struct RemoteGateway {
    transport: Arc<dyn RemoteTransport>,
    endpoint: RemoteEndpoint,
    dry_run: bool,
    contact_custom_groups: Vec<String>,
    activity_custom_groups: Vec<String>,
    cache: HashMap<String, Records>,
}

impl RemoteGateway {
    #[must_use]
    pub fn new(transport: Arc<dyn RemoteTransport>, endpoint: RemoteEndpoint) -> Self {
        Self {
            transport,
            endpoint,
            dry_run: false,
            contact_custom_groups: Vec::new(),
            activity_custom_groups: Vec::new(),
            cache: HashMap::new(),
        }
    }

    /// Build a gateway from settings.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if url, secret or site key are missing.
    pub fn from_settings(settings: &Settings, transport: Arc<dyn RemoteTransport>) -> Result<Self> {
        let endpoint = settings.validate_remote()?;
        Ok(Self::new(transport, endpoint)
            .with_dry_run(settings.dry_run)
            .with_custom_field_groups(Entity::Contact, settings.contact_custom_field_groups.clone())
            .with_custom_field_groups(Entity::Activity, settings.activity_custom_field_groups.clone()))
    }

    #[must_use]
    pub const fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Custom field groups selected by default when reading `entity`.
    #[must_use]
    pub fn with_custom_field_groups(mut self, entity: Entity, groups: Vec<String>) -> Self {
        match entity {
            Entity::Contact => self.contact_custom_groups = groups,
            Entity::Activity => self.activity_custom_groups = groups,
            _ => {}
        }
        self
    }

    #[must_use]
    pub const fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Discard all cached reads.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Issue one remote call.
    ///
    /// Writes return no rows. In dry-run mode they are logged and not sent.
    ///
    /// # Errors
    ///
    /// Returns `Error::RemoteRejected` for entities outside the allow-list and
    /// for remote error messages, `Error::TransportFailure` for failed responses.
    pub fn call(
        &mut self,
        log: &dyn EventLog,
        entity: &str,
        action: Action,
        mut params: ApiParams,
    ) -> Result<Records> {
        let Some(entity) = Entity::parse(entity) else {
            log.error(
                "Invalid remote entity",
                fields([("requested_entity", json!(entity)), ("action", json!(action.as_str()))]),
            );
            return Err(Error::RemoteRejected {
                entity: entity.to_string(),
                action: action.to_string(),
                message: "entity is not on the allow-list".to_string(),
            });
        };

        if action == Action::Get {
            if entity.is_soft_deletable() && !params.filters_on("is_deleted") {
                params = params.filter("is_deleted", "=", false);
            }
            if params.select.is_empty() {
                params.select = self.default_select(entity);
            }
        }

        let is_write = action.is_write();
        let params_json = serde_json::to_string(&params)?;
        let key = cache_key(entity, action, &params_json);
        if !is_write {
            if let Some(cached) = self.cache.get(&key) {
                log.debug(
                    "Using cached API response",
                    fields([
                        ("entity", json!(entity.as_str())),
                        ("action", json!(action.as_str())),
                        ("cached", json!(true)),
                    ]),
                );
                return Ok(cached.clone());
            }
        }

        let param_count = params.key_count();
        log.debug(
            "Calling remote API",
            fields([
                ("entity", json!(entity.as_str())),
                ("action", json!(action.as_str())),
                ("param_count", json!(param_count)),
                ("is_write", json!(is_write)),
            ]),
        );

        if self.dry_run && is_write {
            log.warning(
                "Dry run - skipping write operation",
                fields([("entity", json!(entity.as_str())), ("action", json!(action.as_str()))]),
            );
            return Ok(Vec::new());
        }

        let request = self.build_request(entity, action, &params_json);
        let response = self.transport.send(&request).map_err(|e| {
            log.error(
                "Remote API call failed",
                fields([
                    ("entity", json!(entity.as_str())),
                    ("action", json!(action.as_str())),
                    ("error", json!(e.to_string())),
                ]),
            );
            Error::TransportFailure {
                entity: entity.to_string(),
                action: action.to_string(),
                status: None,
                message: e.to_string(),
            }
        })?;

        if !response.ok {
            let preview: String = body_text(&response.body).chars().take(RESPONSE_PREVIEW_LEN).collect();
            log.error(
                "Remote API call failed",
                fields([
                    ("entity", json!(entity.as_str())),
                    ("action", json!(action.as_str())),
                    ("status_code", json!(response.status)),
                    ("response_preview", json!(preview)),
                ]),
            );
            return Err(Error::TransportFailure {
                entity: entity.to_string(),
                action: action.to_string(),
                status: Some(response.status),
                message: preview,
            });
        }

        if let Some(message) = error_message(&response.body) {
            log.error(
                "Remote API returned error",
                fields([
                    ("entity", json!(entity.as_str())),
                    ("action", json!(action.as_str())),
                    ("status_code", json!(response.status)),
                    ("error_message", json!(message)),
                ]),
            );
            return Err(Error::RemoteRejected {
                entity: entity.to_string(),
                action: action.to_string(),
                message,
            });
        }

        if is_write {
            log.log_api_call(entity.as_str(), action.as_str(), param_count, None);
            return Ok(Vec::new());
        }

        let records = extract_records(response.body);
        log.log_api_call(entity.as_str(), action.as_str(), param_count, Some(records.len()));
        self.cache.insert(key, records.clone());
        Ok(records)
    }

    /// Read `entity` rows.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub fn get(&mut self, log: &dyn EventLog, entity: Entity, params: ApiParams) -> Result<Records> {
        self.call(log, entity.as_str(), Action::Get, params)
    }

    /// Read one row by id.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub fn single(&mut self, log: &dyn EventLog, entity: Entity, id: i64) -> Result<Option<Value>> {
        let rows = self.get(log, entity, ApiParams::new().filter("id", "=", id).limit(1))?;
        Ok(rows.into_iter().next())
    }

    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub fn create(&mut self, log: &dyn EventLog, entity: Entity, values: Map<String, Value>) -> Result<()> {
        self.call(log, entity.as_str(), Action::Create, ApiParams::new().values(values))?;
        Ok(())
    }

    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub fn update(
        &mut self,
        log: &dyn EventLog,
        entity: Entity,
        id: i64,
        values: Map<String, Value>,
    ) -> Result<()> {
        let params = ApiParams::new().values(values).filter("id", "=", id);
        self.call(log, entity.as_str(), Action::Update, params)?;
        Ok(())
    }

    /// Sub-records of `contact_id`, narrowed by `params`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` for a zero contact id, otherwise see [`call`](Self::call).
    pub fn sub_entities(
        &mut self,
        log: &dyn EventLog,
        entity: Entity,
        contact_id: i64,
        params: &Params,
    ) -> Result<Records> {
        if contact_id == 0 {
            return Err(Error::InvalidArgument(format!(
                "a contact id is required to read {entity} records"
            )));
        }
        let query = params.iter().fold(
            ApiParams::new().filter("contact_id", "=", contact_id),
            |q, (field, value)| q.filter(field, "=", value.clone()),
        );
        self.get(log, entity, query)
    }

    /// First sub-record of `contact_id` matching `params`.
    ///
    /// # Errors
    ///
    /// See [`sub_entities`](Self::sub_entities).
    pub fn sub_entity(
        &mut self,
        log: &dyn EventLog,
        entity: Entity,
        contact_id: i64,
        params: &Params,
    ) -> Result<Option<Value>> {
        let rows = self.sub_entities(log, entity, contact_id, params)?;
        if rows.len() > 1 {
            log.warning(
                "Multiple sub-entities found, using the first",
                fields([
                    ("entity", json!(entity.as_str())),
                    ("contact_id", json!(contact_id)),
                    ("params", json!(params)),
                ]),
            );
        }
        Ok(rows.into_iter().next())
    }

    /// Request a fresh checksum for `contact_id`.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub fn get_checksum(&mut self, log: &dyn EventLog, contact_id: i64) -> Result<Option<String>> {
        let params = ApiParams::new()
            .with("contactId", contact_id)
            .with("checkPermissions", true);
        let rows = self.call(log, Entity::Contact.as_str(), Action::GetChecksum, params)?;
        Ok(rows
            .first()
            .and_then(|r| r.get("checksum"))
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    /// Ask the remote whether `checksum` is still valid for `contact_id`.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub fn validate_checksum(&mut self, log: &dyn EventLog, contact_id: i64, checksum: &str) -> Result<bool> {
        let params = ApiParams::new()
            .with("contactId", contact_id)
            .with("checksum", checksum)
            .with("checkPermissions", true);
        let rows = self.call(log, Entity::Contact.as_str(), Action::ValidateChecksum, params)?;
        Ok(rows.first().and_then(|r| r.get("valid")).is_some_and(truthy))
    }

    fn default_select(&self, entity: Entity) -> Vec<String> {
        let groups = match entity {
            Entity::Contact => self.contact_custom_groups.as_slice(),
            Entity::Activity => self.activity_custom_groups.as_slice(),
            _ => &[][..],
        };
        let mut select = vec!["*".to_string()];
        if groups.is_empty() {
            select.push("custom.*".to_string());
        } else {
            select.extend(groups.iter().map(|g| format!("{g}.*")));
        }
        select
    }

    fn build_request(&self, entity: Entity, action: Action, params_json: &str) -> TransportRequest {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("params", params_json)
            .finish();
        TransportRequest {
            method: "POST".to_string(),
            url: format!(
                "{}{API_PATH}/{}/{}",
                self.endpoint.url.trim_end_matches('/'),
                entity.as_str(),
                action.as_str()
            ),
            headers: vec![
                (
                    "Content-Type".to_string(),
                    "application/x-www-form-urlencoded".to_string(),
                ),
                ("X-Civi-Auth".to_string(), format!("Bearer {}", self.endpoint.secret)),
                ("X-Civi-Key".to_string(), self.endpoint.site_key.clone()),
            ],
            body,
        }
    }
}

/// SHA256 of `Entity.action:<params json>`.
fn cache_key(entity: Entity, action: Action, params_json: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{entity}.{action}:{params_json}").as_bytes());
    format!("{:x}", hasher.finalize())
}

fn error_message(body: &Value) -> Option<String> {
    match body.get("error_message")? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn extract_records(body: Value) -> Records {
    let rows = match body {
        Value::Object(mut obj) if obj.contains_key("values") => obj.remove("values").unwrap_or(Value::Null),
        other => other,
    };
    match rows {
        Value::Array(rows) => rows,
        Value::Null => Vec::new(),
        Value::Object(obj) if obj.is_empty() => Vec::new(),
        other => vec![other],
    }
}

fn body_text(body: &Value) -> String {
    match body {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty() && s != "0" && s != "false",
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Null => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::testing::MemorySink;
    use crate::log::SyncLog;
    use crate::remote::transport::{TransportError, TransportResponse};
    use std::sync::Mutex;

    /// Answers every request with the same response and records it.
    struct StubTransport {
        response: std::result::Result<TransportResponse, TransportError>,
        sent: Mutex<Vec<TransportRequest>>,
    }

    impl StubTransport {
        fn new(response: std::result::Result<TransportResponse, TransportError>) -> Arc<Self> {
            Arc::new(Self {
                response,
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<TransportRequest> {
            self.sent.lock().unwrap().clone()
        }

        fn sent_params(&self, i: usize) -> Value {
            let sent = self.sent();
            let (_, params) = url::form_urlencoded::parse(sent[i].body.as_bytes())
                .find(|(k, _)| k == "params")
                .unwrap();
            serde_json::from_str(&params).unwrap()
        }
    }

    impl RemoteTransport for StubTransport {
        fn send(&self, request: &TransportRequest) -> std::result::Result<TransportResponse, TransportError> {
            self.sent.lock().unwrap().push(request.clone());
            self.response.clone()
        }
    }

    fn endpoint() -> RemoteEndpoint {
        RemoteEndpoint {
            url: "https://crm.example.org/".into(),
            secret: "s3cret".into(),
            site_key: "site".into(),
        }
    }

    fn gateway(transport: &Arc<StubTransport>) -> RemoteGateway {
        RemoteGateway::new(transport.clone(), endpoint())
    }

    fn log() -> SyncLog {
        SyncLog::new(Arc::new(MemorySink::default()))
    }

    #[test]
    fn test_request_wire_format() {
        let transport = StubTransport::new(Ok(TransportResponse::ok(json!({"values": [{"id": 5}]}))));
        let mut gw = gateway(&transport);

        let row = gw.single(&log(), Entity::Contact, 5).unwrap();
        assert_eq!(row, Some(json!({"id": 5})));

        let req = &transport.sent()[0];
        assert_eq!(req.method, "POST");
        assert_eq!(req.url, "https://crm.example.org/civicrm/ajax/api4/Contact/get");
        assert_eq!(req.header("X-Civi-Auth"), Some("Bearer s3cret"));
        assert_eq!(req.header("X-Civi-Key"), Some("site"));
        assert_eq!(req.header("Content-Type"), Some("application/x-www-form-urlencoded"));
        assert!(req.body.starts_with("params="));
    }

    #[test]
    fn test_get_injects_soft_delete_and_default_select() {
        let transport = StubTransport::new(Ok(TransportResponse::ok(json!({"values": []}))));
        let mut gw = gateway(&transport).with_custom_field_groups(Entity::Contact, vec!["crm_profile".into()]);

        gw.single(&log(), Entity::Contact, 5).unwrap();
        let params = transport.sent_params(0);
        assert_eq!(params["where"], json!([["id", "=", 5], ["is_deleted", "=", false]]));
        assert_eq!(params["select"], json!(["*", "crm_profile.*"]));
        assert_eq!(params["limit"], 1);

        gw.get(&log(), Entity::Phone, ApiParams::new().filter("contact_id", "=", 5)).unwrap();
        let params = transport.sent_params(1);
        assert_eq!(params["where"], json!([["contact_id", "=", 5]]));
        assert_eq!(params["select"], json!(["*", "custom.*"]));
    }

    #[test]
    fn test_explicit_is_deleted_filter_is_kept() {
        let transport = StubTransport::new(Ok(TransportResponse::ok(json!({"values": []}))));
        let mut gw = gateway(&transport);
        let params = ApiParams::new().filter("is_deleted", "=", true);
        gw.get(&log(), Entity::Contact, params).unwrap();
        assert_eq!(transport.sent_params(0)["where"], json!([["is_deleted", "=", true]]));
    }

    #[test]
    fn test_reads_are_cached_until_cleared() {
        let transport = StubTransport::new(Ok(TransportResponse::ok(json!({"values": [{"id": 1}]}))));
        let mut gw = gateway(&transport);

        gw.single(&log(), Entity::Contact, 1).unwrap();
        gw.single(&log(), Entity::Contact, 1).unwrap();
        assert_eq!(transport.sent().len(), 1);

        gw.single(&log(), Entity::Contact, 2).unwrap();
        assert_eq!(transport.sent().len(), 2);

        gw.clear_cache();
        gw.single(&log(), Entity::Contact, 1).unwrap();
        assert_eq!(transport.sent().len(), 3);
    }

    #[test]
    fn test_writes_bypass_cache() {
        let transport = StubTransport::new(Ok(TransportResponse::ok(json!({"values": []}))));
        let mut gw = gateway(&transport);
        let values: Map<String, Value> = fields([("first_name", json!("Ada"))]);

        gw.update(&log(), Entity::Contact, 1, values.clone()).unwrap();
        gw.update(&log(), Entity::Contact, 1, values).unwrap();
        assert_eq!(transport.sent().len(), 2);
        assert_eq!(transport.sent()[0].url, "https://crm.example.org/civicrm/ajax/api4/Contact/update");
        let params = transport.sent_params(0);
        assert_eq!(params["values"]["first_name"], "Ada");
        assert!(params.get("select").is_none());
    }

    #[test]
    fn test_dry_run_writes_never_reach_transport() {
        let transport = StubTransport::new(Ok(TransportResponse::ok(json!({"values": []}))));
        let mut gw = gateway(&transport).with_dry_run(true);

        gw.create(&log(), Entity::Phone, fields([("phone", json!("123"))])).unwrap();
        assert!(transport.sent().is_empty());

        gw.single(&log(), Entity::Contact, 1).unwrap();
        assert_eq!(transport.sent().len(), 1);
    }

    #[test]
    fn test_unknown_entity_is_rejected() {
        let transport = StubTransport::new(Ok(TransportResponse::ok(json!({}))));
        let mut gw = gateway(&transport);
        let err = gw.call(&log(), "Membership", Action::Get, ApiParams::new()).unwrap_err();
        assert!(matches!(err, Error::RemoteRejected { .. }));
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_error_message_is_rejection() {
        let transport = StubTransport::new(Ok(TransportResponse::ok(json!({"error_message": "Access denied"}))));
        let err = gateway(&transport).single(&log(), Entity::Contact, 1).unwrap_err();
        match err {
            Error::RemoteRejected { message, .. } => assert_eq!(message, "Access denied"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_http_failure_is_transport_failure() {
        let transport = StubTransport::new(Ok(TransportResponse::status(503, json!("unavailable"))));
        let err = gateway(&transport).single(&log(), Entity::Contact, 1).unwrap_err();
        assert!(matches!(err, Error::TransportFailure { status: Some(503), .. }));

        let transport = StubTransport::new(Err(TransportError("connection refused".into())));
        let err = gateway(&transport).single(&log(), Entity::Contact, 1).unwrap_err();
        assert!(matches!(err, Error::TransportFailure { status: None, .. }));
    }

    #[test]
    fn test_checksum_wrappers() {
        let transport = StubTransport::new(Ok(TransportResponse::ok(
            json!({"values": [{"checksum": "abc", "valid": true}]}),
        )));
        let mut gw = gateway(&transport);
        assert_eq!(gw.get_checksum(&log(), 3).unwrap().as_deref(), Some("abc"));
        assert!(gw.validate_checksum(&log(), 3, "none").unwrap());

        assert!(transport.sent()[0].url.ends_with("/Contact/getChecksum"));
        let params = transport.sent_params(1);
        assert_eq!(params, json!({"contactId": 3, "checksum": "none", "checkPermissions": true}));
    }

    #[test]
    fn test_sub_entities_filter_by_params() {
        let transport = StubTransport::new(Ok(TransportResponse::ok(json!({"values": []}))));
        let mut gw = gateway(&transport);
        let params: Params = [("location_type_id".to_string(), json!(1))].into_iter().collect();
        gw.sub_entity(&log(), Entity::Address, 7, &params).unwrap();
        assert_eq!(
            transport.sent_params(0)["where"],
            json!([["contact_id", "=", 7], ["location_type_id", "=", 1]])
        );

        let err = gw.sub_entities(&log(), Entity::Address, 0, &params).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_extract_records_shapes() {
        assert_eq!(extract_records(json!({"values": [1, 2]})), vec![json!(1), json!(2)]);
        assert!(extract_records(json!({"values": null})).is_empty());
        assert_eq!(extract_records(json!([{"id": 1}])), vec![json!({"id": 1})]);
        assert!(extract_records(Value::Null).is_empty());
    }
}
