//! Integration test that generates run-report.schema.json
//!
//! Run with: cargo test -p specprobe-core --test generate_schema

use specprobe_core::report::generate_schema_string;

#[test]
fn write_schema_file() {
    let schema = generate_schema_string();

    let dir = tempfile::tempdir().unwrap();
    let schema_path = dir.path().join("run-report.schema.json");
    std::fs::write(&schema_path, &schema).expect("failed to write schema file");

    let content = std::fs::read_to_string(&schema_path).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
    assert_eq!(
        parsed.get("title").and_then(|v| v.as_str()),
        Some("RunReport")
    );
}
