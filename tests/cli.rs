//! CLI smoke tests.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use serde_json::{json, Value};
use tempfile::TempDir;

const ENV_VARS: [&str; 6] = [
    "CRMSYNC_CONFIG",
    "CRMSYNC_DB",
    "CRMSYNC_URL",
    "CRMSYNC_SECRET",
    "CRMSYNC_SITE_KEY",
    "CRMSYNC_DRY_RUN",
];

fn crmsync(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("crmsync").unwrap();
    for var in ENV_VARS {
        cmd.env_remove(var);
    }
    cmd.arg("--config")
        .arg(dir.path().join("config.json"))
        .arg("--db")
        .arg(dir.path().join("directory.db"))
        .arg("--json");
    cmd
}

fn write_config(dir: &Path, config: &Value) {
    fs::write(dir.join("config.json"), config.to_string()).unwrap();
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_version() {
    let dir = TempDir::new().unwrap();
    let output = crmsync(&dir).arg("version").output().unwrap();
    assert!(output.status.success());
    assert_eq!(stdout_json(&output)["name"], json!("crmsync"));
}

#[test]
fn test_mapping_check_and_siblings() {
    let dir = TempDir::new().unwrap();
    write_config(
        dir.path(),
        &json!({
            "fieldMapping": {
                "user.email": "email.email",
                "profile.street": {"entity": "address", "field": "street_address", "params": {"location_type_id": 1}},
                "profile.city": {"entity": "address", "field": "city", "params": {"location_type_id": 1}}
            }
        }),
    );

    let output = crmsync(&dir).args(["mapping", "check"]).output().unwrap();
    assert!(output.status.success());
    let rows = stdout_json(&output);
    assert_eq!(rows.as_array().unwrap().len(), 3);
    assert_eq!(rows[0]["local_path"], json!("user.email"));
    assert_eq!(rows[0]["read_only"], json!(true));

    let output = crmsync(&dir).args(["mapping", "siblings", "profile.street"]).output().unwrap();
    assert!(output.status.success());
    let rows = stdout_json(&output);
    assert_eq!(rows.as_array().unwrap().len(), 1);
    assert_eq!(rows[0]["local_path"], json!("profile.city"));

    let output = crmsync(&dir).args(["mapping", "siblings", "profile.nope"]).output().unwrap();
    assert_eq!(output.status.code(), Some(6));
}

#[test]
fn test_invalid_mapping_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    write_config(dir.path(), &json!({"fieldMapping": {"firstname": "contact.first_name"}}));

    let output = crmsync(&dir).args(["mapping", "check"]).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_config_path_and_show() {
    let dir = TempDir::new().unwrap();
    let output = crmsync(&dir).args(["config", "path"]).output().unwrap();
    assert!(output.status.success());
    let paths = stdout_json(&output);
    assert_eq!(paths["config_exists"], json!(false));
    assert_eq!(
        paths["db"],
        json!(dir.path().join("directory.db").display().to_string())
    );

    write_config(dir.path(), &json!({"url": "https://crm.example.org", "secret": "s3cret"}));
    let output = crmsync(&dir).args(["config", "show"]).output().unwrap();
    assert!(output.status.success());
    let shown = stdout_json(&output);
    assert_eq!(shown["url"], json!("https://crm.example.org"));
    assert_eq!(shown["secret"], json!("***"));
    assert_eq!(shown["contactIdField"], json!("crm_contact_id"));
}

#[test]
fn test_subject_import_and_show() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("subjects.jsonl");
    fs::write(
        &file,
        concat!(
            r#"{"type":"subject","id":7,"groups":[3],"attributes":{"user.email":"a@example.org","profile.crm_contact_id":70}}"#,
            "\n",
            r#"{"type":"field_kind","path":"profile.interests","kind":"list"}"#,
            "\n"
        ),
    )
    .unwrap();

    let output = crmsync(&dir).args(["subject", "import"]).arg(&file).output().unwrap();
    assert!(output.status.success());
    assert_eq!(stdout_json(&output), json!({"subjects": 1, "field_kinds": 1}));

    let output = crmsync(&dir).args(["subject", "show", "7"]).output().unwrap();
    assert!(output.status.success());
    let subject = stdout_json(&output);
    assert_eq!(subject["attributes"]["user.email"], json!("a@example.org"));
    assert_eq!(subject["groups"], json!([3]));

    let output = crmsync(&dir).args(["subject", "show", "8"]).output().unwrap();
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn test_sync_without_remote_settings_fails_before_any_call() {
    let dir = TempDir::new().unwrap();
    let output = crmsync(&dir).arg("base").output().unwrap();
    assert_eq!(output.status.code(), Some(2));

    let stderr = String::from_utf8(output.stderr).unwrap();
    let error: Value = serde_json::from_str(stderr.lines().last().unwrap()).unwrap();
    assert_eq!(error["error"]["code"], json!("CONFIG_ERROR"));
}
