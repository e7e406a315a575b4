use std::env;
use std::sync::{Mutex, OnceLock};

use caseflow_cli::commands::{config, doctor, inspect, runs};
use serde_json::Value;
use tempfile::TempDir;

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn with_env(vars: &[(&str, &str)], body: impl FnOnce()) {
    let lock = ENV_LOCK.get_or_init(|| Mutex::new(()));
    let _guard = match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };

    for (key, value) in vars {
        env::set_var(key, value);
    }
    body();
    for (key, _) in vars {
        env::remove_var(key);
    }
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).unwrap_or_else(|error| {
        panic!("command output should be JSON, got error {error}: {output}")
    })
}

#[test]
fn config_output_is_redacted_json() {
    with_env(&[("CASEFLOW_TICKETING_API_KEY", "very-secret-token")], || {
        let output = config::run();
        assert!(!output.contains("very-secret-token"), "secret must be redacted: {output}");

        let payload = parse_payload(&output);
        assert_eq!(payload["ticketing"]["api_key"], "<set>");
        assert_eq!(payload["engine"]["max_hops"], 2);
        assert_eq!(payload["engine"]["max_validation_retries"], 1);
    });
}

#[test]
fn doctor_passes_with_default_config() {
    let dir = TempDir::new().expect("temp dir");
    let snapshot_dir = dir.path().join("runs");
    with_env(
        &[("CASEFLOW_SNAPSHOT_DIR", snapshot_dir.to_str().expect("utf8 path"))],
        || {
            let output = doctor::run(true);
            let payload = parse_payload(&output);
            assert_eq!(payload["overall_status"], "pass", "doctor output: {output}");

            let checks = payload["checks"].as_array().expect("checks array");
            let names: Vec<&str> =
                checks.iter().filter_map(|check| check["name"].as_str()).collect();
            assert!(names.contains(&"config_validation"));
            assert!(names.contains(&"template_contracts"));
            assert!(names.contains(&"snapshot_dir"));
        },
    );
}

#[test]
fn doctor_reports_config_failure_and_skips_downstream_checks() {
    with_env(&[("CASEFLOW_ENGINE_MODE", "smoke-signals")], || {
        let output = doctor::run(true);
        let payload = parse_payload(&output);
        assert_eq!(payload["overall_status"], "fail");

        let checks = payload["checks"].as_array().expect("checks array");
        assert_eq!(checks[0]["name"], "config_validation");
        assert_eq!(checks[0]["status"], "fail");
        assert_eq!(checks[1]["status"], "skipped");
    });
}

#[test]
fn runs_lists_empty_snapshot_directory() {
    let dir = TempDir::new().expect("temp dir");
    let snapshot_dir = dir.path().join("runs");
    with_env(
        &[("CASEFLOW_SNAPSHOT_DIR", snapshot_dir.to_str().expect("utf8 path"))],
        || {
            let result = runs::run();
            assert_eq!(result.exit_code, 0);

            let payload = parse_payload(&result.output);
            assert_eq!(payload["command"], "runs");
            assert_eq!(payload["count"], 0);
        },
    );
}

#[test]
fn inspect_unknown_run_is_a_not_found_error() {
    let dir = TempDir::new().expect("temp dir");
    let snapshot_dir = dir.path().join("runs");
    with_env(
        &[("CASEFLOW_SNAPSHOT_DIR", snapshot_dir.to_str().expect("utf8 path"))],
        || {
            let result = inspect::run("run-does-not-exist");
            assert_eq!(result.exit_code, 1);

            let payload = parse_payload(&result.output);
            assert_eq!(payload["status"], "error");
            assert_eq!(payload["error_class"], "not_found");
        },
    );
}
