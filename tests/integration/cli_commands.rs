#![allow(missing_docs)]

use std::fs;
use std::path::PathBuf;

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::TempDir;

const SCHEMA: &str = r#"
[enums]
Color = ["Red", "Green", "Blue"]

[[types]]
name = "Critter"
kind = "resource"

[[types.properties]]
name = "Id"
type = "int32"
id = true

[[types.properties]]
name = "Name"
type = "string"

[[types.properties]]
name = "Color"
type = "Color"

[[types.properties]]
name = "Legs"
type = "int32"
"#;

const DATA: &str = r#"{
  "Critter": [
    {"id": 1, "name": "Ada", "color": "Red", "legs": 2},
    {"id": 2, "name": "Bob", "color": "Green", "legs": 4},
    {"id": 3, "name": "Cy", "color": "Red", "legs": 6}
  ]
}"#;

fn setup() -> (TempDir, PathBuf, PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let schema = dir.path().join("schema.toml");
    let data = dir.path().join("data.json");
    fs::write(&schema, SCHEMA).expect("write schema");
    fs::write(&data, DATA).expect("write data");
    (dir, schema, data)
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("json output")
}

#[test]
fn plan_prints_the_server_steps() {
    let output = cargo_bin_cmd!("cli")
        .args(["plan", "$filter=Id eq 5&$orderby=Name desc&$top=2"])
        .assert()
        .success()
        .get_output()
        .clone();
    let text = String::from_utf8(output.stdout).unwrap();
    assert!(text.contains("filter"), "{text}");
    assert!(text.contains("Id eq 5"), "{text}");
    assert!(text.contains("Name desc"), "{text}");
    assert!(text.contains("top"), "{text}");
}

#[test]
fn query_runs_against_json_data() {
    let (_dir, schema, data) = setup();
    let output = cargo_bin_cmd!("cli")
        .arg("query")
        .arg("--schema")
        .arg(&schema)
        .arg("--data")
        .arg(&data)
        .args(["critters", "$filter=Legs gt 2&$orderby=Id desc&$totalcount=true"])
        .assert()
        .success()
        .get_output()
        .clone();
    let json = stdout_json(&output);
    assert_eq!(json["_type"], "__result__");
    let ids: Vec<_> = json["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, [3, 2]);
    assert_eq!(json["totalCount"], 2);
}

#[test]
fn query_addresses_members_by_id() {
    let (_dir, schema, data) = setup();
    let output = cargo_bin_cmd!("cli")
        .arg("query")
        .arg("--schema")
        .arg(&schema)
        .arg("--data")
        .arg(&data)
        .arg("critters/2")
        .assert()
        .success()
        .get_output()
        .clone();
    let json = stdout_json(&output);
    assert_eq!(json["name"], "Bob");
    assert_eq!(json["_uri"], "/critters/2");
}

#[test]
fn query_reports_typed_errors() {
    let (_dir, schema, data) = setup();
    let output = cargo_bin_cmd!("cli")
        .arg("query")
        .arg("--schema")
        .arg(&schema)
        .arg("--data")
        .arg(&data)
        .args(["critters", "$filter=Wings eq 2"])
        .assert()
        .failure()
        .get_output()
        .clone();
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("[FilterCompilation]"), "{stderr}");
}

#[test]
fn uri_templates_as_json() {
    let (_dir, schema, _data) = setup();
    let output = cargo_bin_cmd!("cli")
        .args(["--format", "json", "uri-template", "--schema"])
        .arg(&schema)
        .assert()
        .success()
        .get_output()
        .clone();
    let json = stdout_json(&output);
    assert_eq!(json["Critter"], "critters/{Id}");
}

#[test]
fn config_file_limits_query_length() {
    let dir = TempDir::new().expect("tempdir");
    let config = dir.path().join("restmap.toml");
    fs::write(&config, "max_query_length = 8\n").unwrap();
    cargo_bin_cmd!("cli")
        .arg("--config")
        .arg(&config)
        .args(["plan", "$filter=Id eq 5"])
        .assert()
        .failure();
}
