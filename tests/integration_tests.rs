//! Integration tests for the fcip CLI.
//!
//! Every command runs in a fresh temporary directory so that no stray
//! fcip.toml or .env is picked up.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use tempfile::TempDir;

const CASE: &str = "PE23C50095";

/// Helper to create an fcip Command isolated from the caller's environment
fn fcip(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("fcip");
    cmd.current_dir(dir.path());
    for var in [
        "FCIP_CONFIG",
        "FCIP_STORAGE",
        "FCIP_DB_PATH",
        "FCIP_SEED_FIXTURES",
        "FCIP_TIMEOUT_SECS",
        "FCIP_MAX_CONCURRENT",
        "FCIP_LOG_FORMAT",
        "FCIP_LOG",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_fcip_help() {
        let dir = TempDir::new().unwrap();
        fcip(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("exec"));
    }

    #[test]
    fn test_fcip_version() {
        let dir = TempDir::new().unwrap();
        fcip(&dir).arg("--version").assert().success();
    }

    #[test]
    fn test_engines_lists_every_builtin() {
        let dir = TempDir::new().unwrap();
        fcip(&dir)
            .arg("engines")
            .assert()
            .success()
            .stdout(predicate::str::contains("coordination"))
            .stdout(predicate::str::contains("omission"))
            .stdout(predicate::str::contains("9 engine(s) registered"));
    }

    #[test]
    fn test_invalid_storage_flag_is_rejected() {
        let dir = TempDir::new().unwrap();
        fcip(&dir)
            .args(["--storage", "postgres", "engines"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid storage backend 'postgres'"));
    }
}

// =============================================================================
// Engine execution
// =============================================================================

mod exec {
    use super::*;

    #[test]
    fn test_coordination_reports_summary_lists() {
        let dir = TempDir::new().unwrap();
        let output = fcip(&dir)
            .args(["exec", "coordination", "--case", CASE])
            .args(["--doc", "mock-police", "--doc", "mock-sw"])
            .assert()
            .success()
            .get_output()
            .clone();
        let response = stdout_json(&output);
        assert_eq!(response["success"], true);
        assert_eq!(response["engine_id"], "coordination");
        assert!(response["sharedLanguage"].is_array());
        assert!(response["independenceViolations"].is_array());
    }

    #[test]
    fn test_omission_with_one_document_fails() {
        let dir = TempDir::new().unwrap();
        fcip(&dir)
            .args(["exec", "omission", "--case", CASE, "--doc", "mock-police"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("at least 2 documents"));
    }

    #[test]
    fn test_unknown_engine_is_named() {
        let dir = TempDir::new().unwrap();
        fcip(&dir)
            .args(["exec", "astrology", "--case", CASE, "--doc", "mock-police"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("Unknown engine: astrology"));
    }

    #[test]
    fn test_missing_document_is_named() {
        let dir = TempDir::new().unwrap();
        fcip(&dir)
            .args(["exec", "bias", "--case", CASE, "--doc", "ghost"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("ghost"));
    }

    #[test]
    fn test_options_must_be_a_json_object() {
        let dir = TempDir::new().unwrap();
        fcip(&dir)
            .args(["exec", "bias", "--case", CASE, "--doc", "mock-police"])
            .args(["--options", "[1, 2]"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--options must be a JSON object"));
    }
}

// =============================================================================
// Line protocol
// =============================================================================

mod serve {
    use super::*;

    #[test]
    fn test_one_response_per_request_line() {
        let dir = TempDir::new().unwrap();
        let input = concat!(
            r#"{"engine_id":"coordination","case_id":"PE23C50095","document_ids":["mock-police","mock-sw"]}"#,
            "\n",
            "this is not json\n",
            "\n",
            r#"{"engine_id":"omission","case_id":"PE23C50095","document_ids":["mock-police"]}"#,
            "\n",
        );
        let output = fcip(&dir)
            .arg("serve")
            .write_stdin(input)
            .assert()
            .success()
            .get_output()
            .clone();

        let stdout = String::from_utf8(output.stdout).unwrap();
        let lines: Vec<Value> = stdout
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["success"], true);
        assert_eq!(lines[0]["engine_id"], "coordination");
        assert_eq!(lines[1]["success"], false);
        assert_eq!(lines[1]["engine_id"], "unknown");
        assert_eq!(lines[2]["success"], false);
        assert!(
            lines[2]["error"]
                .as_str()
                .unwrap()
                .contains("at least 2 documents")
        );
    }
}

// =============================================================================
// Analysis runs
// =============================================================================

mod run {
    use super::*;

    #[test]
    fn test_fixture_case_completes() {
        let dir = TempDir::new().unwrap();
        let output = fcip(&dir)
            .args(["run", "--case", CASE, "--json"])
            .assert()
            .success()
            .get_output()
            .clone();
        let out = stdout_json(&output);
        assert_eq!(out["progress"]["status"], "completed");
        assert!(out["progress"]["arriveCompletedAt"].is_string());
        assert!(!out["results"]["falsePremises"].as_array().unwrap().is_empty());
        assert!(!out["findings"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_stop_after_skips_later_phases() {
        let dir = TempDir::new().unwrap();
        let output = fcip(&dir)
            .args(["run", "--case", CASE, "--stop-after", "inherit", "--json"])
            .assert()
            .success()
            .get_output()
            .clone();
        let out = stdout_json(&output);
        assert_eq!(out["progress"]["status"], "completed");
        assert!(out["progress"]["inheritCompletedAt"].is_string());
        assert!(out["progress"]["compoundStartedAt"].is_null());
    }

    #[test]
    fn test_missing_document_fails_at_anchor() {
        let dir = TempDir::new().unwrap();
        fcip(&dir)
            .args(["run", "--case", CASE, "--doc", "mock-police", "--doc", "ghost"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("error at anchor"))
            .stderr(predicate::str::contains("failed at anchor"));
    }

    #[test]
    fn test_unknown_case_has_no_documents() {
        let dir = TempDir::new().unwrap();
        fcip(&dir)
            .args(["run", "--case", "NOPE"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("No documents found for case NOPE"));
    }

    #[test]
    fn test_invalid_stop_after_phase() {
        let dir = TempDir::new().unwrap();
        fcip(&dir)
            .args(["run", "--case", CASE, "--stop-after", "verify"])
            .assert()
            .failure();
    }

    #[test]
    fn test_sqlite_runs_can_be_inspected_later() {
        let dir = TempDir::new().unwrap();
        let sqlite = ["--storage", "sqlite", "--db-path", "data/fcip.db"];

        let output = fcip(&dir)
            .args(sqlite)
            .args(["run", "--case", CASE, "--json"])
            .assert()
            .success()
            .get_output()
            .clone();
        let out = stdout_json(&output);
        let run_id = out["progress"]["runId"].as_str().unwrap().to_string();
        let finding_id = out["findings"][0]["id"].as_str().unwrap().to_string();
        assert!(dir.path().join("data/fcip.db").exists());

        fcip(&dir)
            .args(sqlite)
            .args(["runs", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains(run_id.as_str()));

        fcip(&dir)
            .args(sqlite)
            .args(["runs", "results", &run_id])
            .assert()
            .success()
            .stdout(predicate::str::contains("falsePremises"));

        fcip(&dir)
            .args(sqlite)
            .args(["runs", "findings", &run_id])
            .assert()
            .success()
            .stdout(predicate::str::contains(finding_id.as_str()));

        fcip(&dir)
            .args(sqlite)
            .args(["runs", "audit", &run_id, &finding_id])
            .assert()
            .success()
            .stdout(predicate::str::contains("Audit trail for finding"));

        fcip(&dir)
            .args(sqlite)
            .args(["runs", "resume", &run_id])
            .assert()
            .failure()
            .stderr(predicate::str::contains("cannot be resumed"));
    }
}

// =============================================================================
// Configuration
// =============================================================================

mod config {
    use super::*;

    #[test]
    fn test_config_init_creates_file_once() {
        let dir = TempDir::new().unwrap();
        fcip(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created fcip.toml"));
        assert!(dir.path().join("fcip.toml").exists());

        fcip(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));

        fcip(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid."));
    }

    #[test]
    fn test_config_show_reports_source_and_overrides() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("fcip.toml"),
            "[dispatcher]\ntimeout_secs = 45\n",
        )
        .unwrap();
        fcip(&dir)
            .args(["--storage", "sqlite", "config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Config file: fcip.toml"))
            .stdout(predicate::str::contains("timeout_secs = 45"))
            .stdout(predicate::str::contains("backend = \"sqlite\""));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("fcip.toml"),
            "[engines.astrology]\ntimeout_secs = 5\n\n[engines.temporal]\nenabled = false\n",
        )
        .unwrap();
        fcip(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Unknown engine 'astrology'"))
            .stdout(predicate::str::contains(
                "Engine 'temporal' is scheduled in phase 'arrive' but disabled",
            ));
    }

    #[test]
    fn test_disabled_engine_is_not_registered() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("fcip.toml"),
            "[engines.temporal]\nenabled = false\n",
        )
        .unwrap();
        fcip(&dir)
            .arg("engines")
            .assert()
            .success()
            .stdout(predicate::str::contains("8 engine(s) registered"));
    }

    #[test]
    fn test_environment_overrides_file() {
        let dir = TempDir::new().unwrap();
        fcip(&dir)
            .env("FCIP_TIMEOUT_SECS", "12")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("timeout_secs = 12"));
    }

    #[test]
    fn test_malformed_config_file_fails() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("fcip.toml"), "[storage\nbackend = ").unwrap();
        fcip(&dir)
            .arg("engines")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to parse fcip.toml"));
    }
}
