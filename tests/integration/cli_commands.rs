#![allow(missing_docs)]

use std::fs;
use std::path::PathBuf;

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::{json, Value};
use tempfile::TempDir;

fn plan_document() -> Value {
    json!({
        "nodes": [
            { "id": 1, "type": "SingletonNode", "dependencies": [] },
            { "id": 2, "type": "EnumerateCollectionNode", "dependencies": [1],
              "collection": "users", "outVariable": { "id": 0, "name": "u" } },
            { "id": 3, "type": "LimitNode", "dependencies": [2], "offset": 7, "limit": 10 },
            { "id": 4, "type": "ReturnNode", "dependencies": [3],
              "inVariable": { "id": 0, "name": "u" } }
        ],
        "rules": ["move-filters-up"],
        "collections": [ { "name": "users", "type": "read" } ]
    })
}

/// Writes the sample plan and returns the directory, the plan path, and a
/// config path that does not exist yet (so the user's own config never leaks in).
fn setup(name: &str) -> (TempDir, PathBuf, PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let plan = dir.path().join(format!("{name}.json"));
    fs::write(
        &plan,
        serde_json::to_vec_pretty(&plan_document()).expect("encode"),
    )
    .expect("write plan");
    let config = dir.path().join("cli.toml");
    (dir, plan, config)
}

#[test]
fn show_prints_types_sources_first() {
    let (_dir, plan, config) = setup("show");
    cargo_bin_cmd!("qplan")
        .arg("--config")
        .arg(&config)
        .arg("show")
        .arg(&plan)
        .assert()
        .success()
        .stdout("SingletonNode\nEnumerateCollectionNode\nLimitNode\nReturnNode\n");
}

#[test]
fn explain_redacts_literals() {
    let (_dir, plan, config) = setup("explain");
    let output = cargo_bin_cmd!("qplan")
        .arg("--config")
        .arg(&config)
        .args(["explain", "--redact"])
        .arg(&plan)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8");
    assert!(text.starts_with("ReturnNode #4 (in=u)"));
    assert!(text.contains("LimitNode #3 (offset=?, limit=?)"));
    assert!(text.contains("plan_hash: "));
}

#[test]
fn explain_emits_json() {
    let (_dir, plan, config) = setup("explain-json");
    let output = cargo_bin_cmd!("qplan")
        .args(["--format", "json", "--config"])
        .arg(&config)
        .arg("explain")
        .arg(&plan)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["root"]["op"], "ReturnNode");
    assert_eq!(json["root"]["inputs"][0]["op"], "LimitNode");
    assert!(json["plan_hash"].is_u64());
}

#[test]
fn check_reports_clean_linkage() {
    let (_dir, plan, config) = setup("check");
    let output = cargo_bin_cmd!("qplan")
        .args(["--format", "json", "--config"])
        .arg(&config)
        .arg("check")
        .arg(&plan)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["nodes"], 4);
    assert_eq!(json["root"], 4);
    assert_eq!(json["rules"], json!(["move-filters-up"]));
    assert_eq!(json["violations"], json!([]));
    assert_eq!(json["var_usage_computed"], true);
}

#[test]
fn check_fails_on_malformed_document() {
    let dir = TempDir::new().expect("tempdir");
    let plan = dir.path().join("broken.json");
    fs::write(&plan, r#"{ "nodes": [ { "id": 1 } ] }"#).expect("write");
    let output = cargo_bin_cmd!("qplan")
        .arg("--config")
        .arg(dir.path().join("cli.toml"))
        .arg("check")
        .arg(&plan)
        .assert()
        .failure()
        .code(1)
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8(output).expect("utf8");
    assert!(stderr.contains("[Malformed]"), "{stderr}");
}

#[test]
fn roundtrip_uses_config_for_verbose_export() {
    let (_dir, plan, config) = setup("roundtrip");
    let terse = cargo_bin_cmd!("qplan")
        .arg("--config")
        .arg(&config)
        .arg("roundtrip")
        .arg(&plan)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let terse: Value = serde_json::from_slice(&terse).expect("valid json");
    assert_eq!(terse["nodes"].as_array().map(Vec::len), Some(4));
    assert!(terse["nodes"][3].get("varsValid").is_none());

    fs::write(&config, "[export]\nverbose = true\n").expect("write config");
    let verbose = cargo_bin_cmd!("qplan")
        .env("QPLAN_CONFIG", &config)
        .arg("roundtrip")
        .arg(&plan)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let verbose: Value = serde_json::from_slice(&verbose).expect("valid json");
    assert_eq!(verbose["nodes"][3]["varsValid"][0]["name"], "u");
}

#[test]
fn config_prints_effective_settings() {
    let (_dir, _plan, config) = setup("config");
    fs::write(&config, "[export]\nverbose = true\n").expect("write config");
    let output = cargo_bin_cmd!("qplan")
        .arg("--config")
        .arg(&config)
        .arg("config")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8");
    assert!(text.starts_with(&format!("# {}", config.display())));
    assert!(text.contains("[export]"));
    assert!(text.contains("verbose = true"));
    assert!(!text.contains("verify_linkage"));
}

#[test]
fn invalid_config_is_reported() {
    let (_dir, plan, config) = setup("bad-config");
    fs::write(&config, "[planner\n").expect("write config");
    cargo_bin_cmd!("qplan")
        .arg("--config")
        .arg(&config)
        .arg("show")
        .arg(&plan)
        .assert()
        .failure()
        .code(1);
}
