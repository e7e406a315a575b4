use caseflow_core::config::{AppConfig, LoadOptions};
use caseflow_core::templates::{names, ResponseMode, TemplateStore};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_template_contracts());
            checks.push(check_snapshot_dir(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.push(DoctorCheck {
                name: "template_contracts",
                status: CheckStatus::Skipped,
                details: "skipped because configuration did not load".to_string(),
            });
            checks.push(DoctorCheck {
                name: "snapshot_dir",
                status: CheckStatus::Skipped,
                details: "skipped because configuration did not load".to_string(),
            });
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

/// The same contracts the engine validates at construction; a template
/// override that lost a placeholder fails here before any run is attempted.
fn check_template_contracts() -> DoctorCheck {
    let store = TemplateStore::builtin();
    let contracts: Vec<(&str, Vec<&str>)> = vec![
        (
            names::PLAN,
            vec!["conversation_history", "user_details", "procedure", "available_tools", "available_data"],
        ),
        (names::COVERAGE, vec!["conversation_history", "user_details", "procedure", "available_data"]),
        (
            ResponseMode::Ticket.template_name(),
            vec!["conversation_history", "user_details", "procedure", "data_summary"],
        ),
        (
            ResponseMode::Slack.template_name(),
            vec!["conversation_history", "user_details", "procedure", "data_summary"],
        ),
        (names::PROCEDURE_QUERY, vec!["conversation_history"]),
        (names::PROCEDURE_MATCH, vec!["conversation_history", "candidates"]),
    ];

    for (name, placeholders) in contracts {
        if let Err(error) = store.validate_contract(name, &placeholders) {
            return DoctorCheck {
                name: "template_contracts",
                status: CheckStatus::Fail,
                details: error.to_string(),
            };
        }
    }

    DoctorCheck {
        name: "template_contracts",
        status: CheckStatus::Pass,
        details: "all stage templates declare their required placeholders".to_string(),
    }
}

fn check_snapshot_dir(config: &AppConfig) -> DoctorCheck {
    match std::fs::create_dir_all(&config.snapshots.dir) {
        Ok(()) => DoctorCheck {
            name: "snapshot_dir",
            status: CheckStatus::Pass,
            details: format!("snapshot directory `{}` is writable", config.snapshots.dir.display()),
        },
        Err(error) => DoctorCheck {
            name: "snapshot_dir",
            status: CheckStatus::Fail,
            details: format!(
                "snapshot directory `{}` is not writable: {error}",
                config.snapshots.dir.display()
            ),
        },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
