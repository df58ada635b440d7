//! CLI test cases. Anything that needs a real LLM endpoint is ignored by
//! default; the schema and payload-validation paths run everywhere.

use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;

/// Create a new `Command` with our binary.
fn cmd() -> Command {
    Command::cargo_bin("finsight-worker").unwrap()
}

#[test]
fn test_help() {
    cmd().arg("--help").assert().success();
}

#[test]
fn test_version() {
    cmd().arg("--version").assert().success();
}

#[test]
fn test_schema_subcommand_prints_json_schema() {
    cmd()
        .arg("schema")
        .arg("transcription")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"transcription\""))
        .stdout(predicate::str::contains("additionalProperties"));
}

#[test]
fn test_financial_metrics_schema_includes_steps() {
    cmd()
        .arg("schema")
        .arg("financial-metrics")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"business_summaries\""))
        .stdout(predicate::str::contains("\"steps\""));
}

#[test]
fn test_bad_payload_fails_with_invalid_payload() {
    cmd()
        .env("API_BASE_URL", "http://localhost:8080")
        .arg("page")
        .arg("--payload")
        .arg("tests/fixtures/bad_page_payload.json")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid task payload"));
}
