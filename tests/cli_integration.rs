//! CLI Integration Tests
//!
//! These tests verify that the CLI commands work correctly end-to-end.
//! They test the actual binary behavior, not just the library.
//!
//! Run with:
//! ```bash
//! cargo test --test cli_integration
//! ```

use serde_json::Value;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

/// Run lineage command and return (stdout, stderr, success)
fn run_lineage(args: &[&str], db_path: &Path) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_lineage"))
        .arg("-d")
        .arg(db_path)
        .args(["-f", "json", "-a", "tester"])
        .args(args)
        .env("LINEAGE_LOG", "error")
        .output()
        .expect("Failed to execute lineage");

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

/// Run a command that must succeed and parse its JSON output
fn run_json(args: &[&str], db_path: &Path) -> Value {
    let (stdout, stderr, success) = run_lineage(args, db_path);
    assert!(success, "{:?} failed: {}", args, stderr);
    serde_json::from_str(stdout.trim()).expect("output should be JSON")
}

fn init_db(dir: &Path) -> std::path::PathBuf {
    let db_path = dir.join(".lineage");
    run_json(&["init"], &db_path);
    db_path
}

// ============================================================================
// Database Initialization Tests
// ============================================================================

#[test]
fn test_cli_init_creates_database() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join(".lineage");

    let result = run_json(&["init"], &db_path);

    assert_eq!(result["status"], "ok");
    assert_eq!(result["genesis"].as_str().unwrap().len(), 64);
    assert!(db_path.exists(), ".lineage file should be created");
}

#[test]
fn test_cli_init_keeps_existing_database() {
    let dir = tempdir().unwrap();
    let db_path = init_db(dir.path());

    run_json(
        &[
            "commit",
            r#"[{"entity_type":"character","entity_id":"aria","field_name":"hp","new_value":12}]"#,
            "-m",
            "Aria joins",
        ],
        &db_path,
    );

    let (_stdout, stderr, success) = run_lineage(&["init"], &db_path);
    assert!(!success, "init over an existing database should fail");
    assert!(stderr.contains("already exists"), "got: {}", stderr);

    let log = run_json(&["log"], &db_path);
    assert_eq!(log["count"], 2);
    assert_eq!(log["commits"][0]["message"], "Aria joins");
}

#[test]
fn test_cli_requires_init() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("missing.lineage");

    let (_stdout, stderr, success) = run_lineage(&["branches"], &db_path);

    assert!(!success, "commands on a missing database should fail");
    assert!(stderr.contains("lineage init"), "got: {}", stderr);
}

// ============================================================================
// Commit and History Tests
// ============================================================================

#[test]
fn test_cli_commit_and_log() {
    let dir = tempdir().unwrap();
    let db_path = init_db(dir.path());

    let commit = run_json(
        &[
            "commit",
            r#"[{"entity_type":"character","entity_id":"aria","field_name":"hp","new_value":12}]"#,
            "-m",
            "Aria joins",
        ],
        &db_path,
    );
    assert_eq!(commit["author"], "tester");
    assert_eq!(commit["message"], "Aria joins");

    let log = run_json(&["log"], &db_path);
    assert_eq!(log["branch"], "main");
    assert_eq!(log["count"], 2);
    assert_eq!(log["commits"][0]["id"], commit["id"]);
    assert_eq!(log["commits"][0]["changes"], 1);

    let limited = run_json(&["log", "--limit", "1"], &db_path);
    assert_eq!(limited["count"], 1);
}

#[test]
fn test_cli_rejects_stale_parent() {
    let dir = tempdir().unwrap();
    let db_path = init_db(dir.path());
    let change = r#"[{"entity_type":"character","entity_id":"aria","field_name":"hp","new_value":12}]"#;

    run_json(&["commit", change, "-m", "first"], &db_path);

    let other = r#"[{"entity_type":"character","entity_id":"aria","field_name":"hp","new_value":9}]"#;
    let (_stdout, stderr, success) =
        run_lineage(&["commit", other, "-m", "stale", "--parent", "main~1"], &db_path);

    assert!(!success, "commit on a stale parent should fail");
    assert!(stderr.contains("Conflict"), "got: {}", stderr);
}

#[test]
fn test_cli_show_and_diff() {
    let dir = tempdir().unwrap();
    let db_path = init_db(dir.path());

    run_json(
        &[
            "commit",
            r#"[{"entity_type":"character","entity_id":"aria","field_name":"hp","new_value":12}]"#,
            "-m",
            "hp",
        ],
        &db_path,
    );
    run_json(
        &[
            "commit",
            r#"[{"entity_type":"character","entity_id":"aria","field_name":"hp","old_value":12,"new_value":8}]"#,
            "-m",
            "ouch",
        ],
        &db_path,
    );

    let show = run_json(&["show", "main"], &db_path);
    assert_eq!(show["message"], "ouch");

    let diff = run_json(&["diff", "main~2", "main"], &db_path);
    assert_eq!(diff["count"], 1);
    assert_eq!(diff["changes"][0]["field_name"], "hp");
    assert_eq!(diff["changes"][0]["old_value"], Value::Null);
    assert_eq!(diff["changes"][0]["new_value"], 8);
}

#[test]
fn test_cli_invalid_reference() {
    let dir = tempdir().unwrap();
    let db_path = init_db(dir.path());

    let (_stdout, stderr, success) = run_lineage(&["show", "nowhere"], &db_path);

    assert!(!success);
    assert!(stderr.contains("Invalid reference"), "got: {}", stderr);
}

// ============================================================================
// Branch and Merge Tests
// ============================================================================

#[test]
fn test_cli_branch_and_list() {
    let dir = tempdir().unwrap();
    let db_path = init_db(dir.path());

    let branch = run_json(&["branch", "what-if", "--kind", "what-if"], &db_path);
    assert_eq!(branch["name"], "what-if");
    assert_eq!(branch["kind"], "WhatIf");

    let list = run_json(&["branches"], &db_path);
    assert_eq!(list["count"], 2);

    let (_stdout, stderr, success) = run_lineage(&["branch", "what-if"], &db_path);
    assert!(!success, "duplicate branch names should be rejected");
    assert!(stderr.contains("already exists"), "got: {}", stderr);
}

#[test]
fn test_cli_merge_with_conflict_and_resolution() {
    let dir = tempdir().unwrap();
    let db_path = init_db(dir.path());

    run_json(&["branch", "alt"], &db_path);
    run_json(
        &[
            "commit",
            r#"[{"entity_type":"character","entity_id":"aria","field_name":"alignment","new_value":"good"}]"#,
            "-m",
            "main side",
        ],
        &db_path,
    );
    run_json(
        &[
            "commit",
            r#"[{"entity_type":"character","entity_id":"aria","field_name":"alignment","new_value":"evil"}]"#,
            "-m",
            "alt side",
            "--branch",
            "alt",
        ],
        &db_path,
    );

    let (stdout, _stderr, success) = run_lineage(&["merge", "alt"], &db_path);
    assert!(!success, "conflicting merge should fail without resolutions");
    let report: Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(report["status"], "conflict");
    assert_eq!(report["conflicts"].as_array().unwrap().len(), 1);

    let merged = run_json(
        &[
            "merge",
            "alt",
            "--resolutions",
            r#"[{"entity_type":"Character","entity_id":"aria","field_name":"alignment","value":"neutral"}]"#,
        ],
        &db_path,
    );
    assert_eq!(merged["status"], "merged");
    assert_eq!(merged["commit"]["parents"].as_array().unwrap().len(), 2);

    let branches = run_json(&["branches"], &db_path);
    let alt = branches["branches"]
        .as_array()
        .unwrap()
        .iter()
        .find(|b| b["name"] == "alt")
        .unwrap();
    assert_eq!(alt["state"], "Merged");
}

#[test]
fn test_cli_fast_forward_and_archive() {
    let dir = tempdir().unwrap();
    let db_path = init_db(dir.path());

    run_json(&["branch", "alt"], &db_path);
    run_json(
        &[
            "commit",
            r#"[{"entity_type":"campaign","entity_id":"c1","field_name":"name","new_value":"Saltmarsh"}]"#,
            "-m",
            "name",
        ],
        &db_path,
    );

    let moved = run_json(&["fast-forward", "alt", "main"], &db_path);
    let main = run_json(&["show", "main"], &db_path);
    assert_eq!(moved["head_commit_id"], main["id"]);

    let archived = run_json(&["archive", "alt"], &db_path);
    assert_eq!(archived["state"], "Archived");

    let (_stdout, stderr, success) = run_lineage(&["archive", "main"], &db_path);
    assert!(!success, "main cannot be archived");
    assert!(stderr.contains("Invalid state"), "got: {}", stderr);
}

// ============================================================================
// Version Graph and Theme Tests
// ============================================================================

fn node_id(value: &Value) -> String {
    value["id"].as_str().unwrap().to_string()
}

#[test]
fn test_cli_nodes_edges_and_state() {
    let dir = tempdir().unwrap();
    let db_path = init_db(dir.path());

    let aria = run_json(&["node", "character", "aria", "fantasy"], &db_path);
    let sword = run_json(
        &[
            "node",
            "equipment",
            "sword",
            "fantasy",
            "--metadata",
            r#"{"name":"Longsword (fantasy)","damage":"1d8"}"#,
        ],
        &db_path,
    );
    assert_eq!(sword["metadata"]["damage"], "1d8");

    let (aria, sword) = (node_id(&aria), node_id(&sword));
    run_json(&["edge", &aria, &sword, "owns"], &db_path);
    run_json(&["edge", &aria, &sword, "equipped"], &db_path);

    let state = run_json(&["state", &aria], &db_path);
    assert_eq!(state["owned"].as_array().unwrap().len(), 1);
    assert_eq!(state["equipped"][0]["node"]["entity_id"], "sword");

    run_json(&["edge", &aria, &sword, "equipped", "--retract"], &db_path);
    let state = run_json(&["state", &aria], &db_path);
    assert_eq!(state["owned"].as_array().unwrap().len(), 1);
    assert!(state["equipped"].as_array().unwrap().is_empty());

    let (_stdout, stderr, success) = run_lineage(&["edge", &sword, &aria, "knows"], &db_path);
    assert!(!success, "equipment cannot know anything");
    assert!(stderr.contains("Validation"), "got: {}", stderr);
}

#[test]
fn test_cli_theme_transition() {
    let dir = tempdir().unwrap();
    let db_path = init_db(dir.path());

    let aria = node_id(&run_json(&["node", "character", "aria", "fantasy"], &db_path));
    let sword = node_id(&run_json(
        &[
            "node",
            "equipment",
            "sword",
            "fantasy",
            "--metadata",
            r#"{"name":"Longsword (fantasy)","damage":"1d8"}"#,
        ],
        &db_path,
    ));
    let cloak = node_id(&run_json(&["node", "equipment", "cloak", "fantasy"], &db_path));
    run_json(&["edge", &aria, &sword, "owns"], &db_path);
    run_json(&["edge", &aria, &sword, "equipped"], &db_path);
    run_json(&["edge", &aria, &cloak, "owns"], &db_path);

    let items = format!(
        r#"[{{"node":"{}","strategy":"theme_reset"}},{{"node":"{}","strategy":"keep_current"}}]"#,
        sword, cloak
    );

    let plan = run_json(
        &["transition", &aria, "cyberpunk", "-c", "ch-2", "-i", &items, "--dry-run"],
        &db_path,
    );
    assert_eq!(plan["status"], "valid");
    assert_eq!(plan["items"].as_array().unwrap().len(), 2);
    assert_eq!(run_json(&["log"], &db_path)["count"], 1, "dry run writes nothing");

    let report = run_json(
        &["transition", &aria, "cyberpunk", "-c", "ch-2", "-i", &items],
        &db_path,
    );
    assert_eq!(report["state"], "Committed");
    assert_eq!(report["commit"]["metadata"]["chapter_id"], "ch-2");

    let new_aria = report["character_node"].as_str().unwrap().to_string();
    let state = run_json(&["state", &new_aria], &db_path);
    assert_eq!(state["node"]["theme"], "cyberpunk");
    assert_eq!(state["owned"].as_array().unwrap().len(), 2);

    let lineage = run_json(&["lineage", &new_aria], &db_path);
    assert_eq!(lineage["count"], 2);
    assert_eq!(lineage["nodes"][1]["id"], aria.as_str());
}

#[test]
fn test_cli_transition_rejects_same_theme() {
    let dir = tempdir().unwrap();
    let db_path = init_db(dir.path());

    let aria = node_id(&run_json(&["node", "character", "aria", "fantasy"], &db_path));
    let (_stdout, stderr, success) =
        run_lineage(&["transition", &aria, "fantasy", "-c", "ch-1"], &db_path);

    assert!(!success);
    assert!(stderr.contains("Validation"), "got: {}", stderr);
}
