//! Integration tests for the lineage CLI
//!
//! Tests end-to-end command behavior using the CLI binary.
//! Uses tempfile for isolated workspaces fed by CSV extracts.

use serde_json::Value;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

// ============================================================================
// Test Utilities
// ============================================================================

/// Get the path to the lineage binary (built by cargo)
fn lineage_binary() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_lineage"));
    cmd.env_remove("RUST_LOG").env_remove("LINEAGE_CONFIG");
    cmd
}

/// Run lineage with the given args in the specified directory
fn run_lineage(dir: &Path, args: &[&str]) -> Output {
    lineage_binary()
        .current_dir(dir)
        .args(args)
        .output()
        .expect("Failed to execute lineage command")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn json(output: &Output) -> Value {
    serde_json::from_str(&stdout(output))
        .unwrap_or_else(|e| panic!("stdout is not JSON ({}): {}", e, stdout(output)))
}

const EXTRACTS: &[(&str, &str)] = &[
    (
        "lot_history",
        "source_type,source_reference_value,target_value,storage_location_idx,created_at
SFC,\"W1,SFC-0001\",\"W1,SFC-0002\",,2024-01-01 08:00:00
INV,\"W1,SFC-0002\",\"W1,INV-0009\",L-01,2024-01-02 08:00:00
",
    ),
    (
        "inventory",
        "inventory_id,receiving_batch_number,created_at
INV-0001,RB-0001,2023-12-30 08:00:00
INV-0009,RB-0009,2023-12-30 09:00:00
",
    ),
    (
        "item_assembly",
        "inventory_id,related_project,related_project_type
INV-0001,PK-A,SFC
",
    ),
    (
        "sfc",
        "primary_key,sfc_code,created_at
PK-A,SFC-0001,2023-12-31 08:00:00
",
    ),
    (
        "sales_order_detail",
        "primary_key,receiving_batch_no,created_at
\"P1,SO-1,CM-1\",RB-0001,2023-12-01 08:00:00
",
    ),
    (
        "production_log",
        "sfc_no,processing_status,process_step,process_step_desc,resource_code,resource_desc,weight,created_at,default_unit
SFC-0001,COMPLETE,P10,Mixing,R1,Mixer,1.5,2024-01-01 10:00:00,kg
SFC-0001,COMPLETE,P20,Drying,R2,Dryer,1.4,2024-01-01 10:00:05,kg
SFC-0002,COMPLETE,P10,Mixing,R1,Mixer,-3.2,2024-01-01 11:00:00,kg
SFC-0002,COMPLETE,P10,Mixing,R1,Mixer,2.0,2024-01-01 11:00:00,kg
",
    ),
];

/// Write the CSV extracts and a config pointing at them.
fn setup_workspace() -> TempDir {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let mut config = String::from("[source.files]\n");
    for (name, body) in EXTRACTS {
        fs::write(dir.path().join(format!("{name}.csv")), body).expect("Failed to write extract");
        config.push_str(&format!("{name} = \"{name}.csv\"\n"));
    }
    config.push_str("\n[store]\npath = \"graph.duckdb\"\n\n[loader]\nbatch_size = 2\npause_ms = 0\n");
    fs::write(dir.path().join(".lineagerc.toml"), config).expect("Failed to write config");
    dir
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_help_lists_commands() {
    let dir = TempDir::new().unwrap();
    let output = run_lineage(dir.path(), &["--help"]);
    assert!(output.status.success());
    let text = stdout(&output);
    for command in ["clean", "derive", "rebuild", "verify", "status"] {
        assert!(text.contains(command), "help is missing {command}: {text}");
    }
}

#[test]
fn test_status_before_rebuild() {
    let dir = setup_workspace();
    let output = run_lineage(dir.path(), &["status", "--format", "json"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let status = json(&output);
    assert_eq!(status["config_exists"], true);
    assert_eq!(status["store_exists"], false);
    assert_eq!(status["next_action"], "lineage rebuild");
    let tables = status["tables"].as_array().unwrap();
    let present: Vec<&str> = tables
        .iter()
        .filter(|t| t["present"] == true)
        .map(|t| t["logical"].as_str().unwrap())
        .collect();
    assert_eq!(present.len(), 6);
    assert!(!present.contains(&"reference"));
    assert!(!dir.path().join("graph.duckdb").exists());
}

#[test]
fn test_clean_reports_negative_drop() {
    let dir = setup_workspace();
    let output = run_lineage(dir.path(), &["clean", "production_log", "--format", "json"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let summary = json(&output);
    let report = &summary["report"];
    assert_eq!(report["input_rows"], 4);
    assert_eq!(report["output_rows"], 3);
    assert_eq!(report["negative_drops"]["weight"], 1);
}

#[test]
fn test_clean_unknown_table_fails() {
    let dir = setup_workspace();
    let output = run_lineage(dir.path(), &["clean", "bogus"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("bogus"));
}

#[test]
fn test_derive_writes_reference_csv() {
    let dir = setup_workspace();
    let output = run_lineage(dir.path(), &["derive", "--format", "json"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(json(&output)["edges"], 5);

    let csv = fs::read_to_string(dir.path().join("output").join("reference.csv")).unwrap();
    let mut lines = csv.lines();
    assert_eq!(
        lines.next(),
        Some("handle,from_node_type,from_node,from_node_time,to_node_type,to_node,to_node_time,description")
    );
    assert_eq!(lines.count(), 5);
}

#[test]
fn test_rebuild_then_verify() {
    let dir = setup_workspace();
    let output = run_lineage(dir.path(), &["rebuild", "--format", "json"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let summary = json(&output);
    assert_eq!(summary["rebuild"]["stages"].as_array().unwrap().len(), 6);

    let output = run_lineage(dir.path(), &["verify", "--format", "json"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let verify = json(&output);
    assert_eq!(verify["nodes"]["ProcessStep"], 3);
    assert_eq!(verify["relationships"]["ORDERS"], 1);
    assert_eq!(verify["relationships"]["SPLITS_TO"], 1);
    assert_eq!(verify["relationships"]["HAS_FIRST_STEP"], 2);
    assert_eq!(verify["relationships"]["NEXT_STEP"], 1);

    let output = run_lineage(dir.path(), &["status", "--format", "json"]);
    let status = json(&output);
    assert_eq!(status["store_exists"], true);
    assert!(status["last_rebuild"].is_string());
    assert!(status.get("next_action").is_none());
}

#[test]
fn test_rebuild_twice_is_idempotent() {
    let dir = setup_workspace();
    let first = run_lineage(dir.path(), &["8", "--format", "json"]);
    assert!(first.status.success(), "stderr: {}", stderr(&first));
    let first = json(&first)["rebuild"]["verify"].clone();

    let second = run_lineage(dir.path(), &["run", "--format", "json"]);
    assert!(second.status.success(), "stderr: {}", stderr(&second));
    let second = json(&second);
    assert_eq!(second["rebuild"]["verify"], first);
    let created: u64 = second["rebuild"]["loads"]
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l["created"].as_u64().unwrap())
        .sum();
    assert_eq!(created, 0);
    assert!(dir.path().join("output").join("reference.csv").exists());
}

#[test]
fn test_stats_from_source() {
    let dir = setup_workspace();
    let output = run_lineage(dir.path(), &["stats", "--source", "--format", "json"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let stats = json(&output);
    assert_eq!(stats["sfc_count"], 2);
    assert_eq!(stats["step_count"], 3);
    let samples = stats["samples"].as_array().unwrap();
    assert_eq!(samples.len(), 2);
    assert_eq!(samples[0]["sfc"], "SFC-0001");
    assert_eq!(samples[0]["steps"][1][1], "Drying");
    assert_eq!(samples[0]["next_sfc"], "SFC-0002");
    assert!(samples[1]["next_sfc"].is_null());
}

#[test]
fn test_strict_rejects_broken_config() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join(".lineagerc.toml"), "[store\npath = ").unwrap();

    let output = run_lineage(dir.path(), &["--strict", "status"]);
    assert!(!output.status.success());

    // Lenient mode falls back to defaults
    let output = run_lineage(dir.path(), &["status", "--format", "json"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
}
