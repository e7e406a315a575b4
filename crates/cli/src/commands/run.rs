use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use caseflow_agent::{
    HttpLlmClient, HttpResponseValidator, RunReport, TracingAuditSink, WorkflowEngine,
};
use caseflow_core::config::{AppConfig, ConfigOverrides, LoadOptions, LogFormat};
use caseflow_core::snapshot::SnapshotStore;
use caseflow_core::state::{ConversationId, RunOutcome};
use caseflow_core::templates::{ResponseMode, TemplateStore};
use caseflow_mcp::HttpToolCatalogue;
use caseflow_ticketing::HttpTicketingClient;
use serde_json::json;

use super::CommandResult;

pub fn run(conversation_id: &str, dry_run: bool, mode: Option<&str>) -> CommandResult {
    let mode = match mode.map(str::parse::<ResponseMode>).transpose() {
        Ok(mode) => mode,
        Err(message) => return CommandResult::failure("run", "invalid_argument", message, 2),
    };

    let config = match AppConfig::load(LoadOptions {
        overrides: ConfigOverrides {
            mode,
            dry_run: dry_run.then_some(true),
            ..ConfigOverrides::default()
        },
        ..LoadOptions::default()
    }) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure("run", "config_validation", error.to_string(), 2)
        }
    };
    init_tracing(&config);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => return CommandResult::failure("run", "runtime_init", error.to_string(), 1),
    };

    let report = runtime.block_on(execute(&config, conversation_id));
    match report {
        Ok(report) => render_report(&report),
        Err(error) => CommandResult::failure("run", "run_failed", format!("{error:#}"), 1),
    }
}

async fn execute(config: &AppConfig, conversation_id: &str) -> anyhow::Result<RunReport> {
    let catalogue = HttpToolCatalogue::new(
        config.tools.base_url.clone(),
        config.tools.auth_token.clone(),
        Duration::from_secs(config.tools.timeout_secs),
    )
    .map_err(|error| anyhow!("tool catalogue client: {error}"))?;

    let llm = HttpLlmClient::new(
        config.llm.base_url.clone(),
        config.llm.api_key.clone(),
        config.llm.model.clone(),
        Duration::from_secs(config.llm.timeout_secs),
    )
    .map_err(|error| anyhow!("generation client: {error}"))?;

    let validator = HttpResponseValidator::new(
        config.validation.endpoint.clone(),
        config.validation.auth_token.clone(),
        Duration::from_secs(config.validation.timeout_secs),
    )
    .map_err(|error| anyhow!("validation client: {error}"))?;

    let api_key = config
        .ticketing
        .api_key
        .clone()
        .context("ticketing.api_key is required to run a conversation turn")?;
    let ticketing = HttpTicketingClient::new(
        config.ticketing.base_url.clone(),
        api_key,
        config.ticketing.admin_id.clone(),
        Duration::from_secs(config.ticketing.timeout_secs),
        config.ticketing.dry_run,
    )
    .map_err(|error| anyhow!("ticketing client: {error}"))?;

    let engine = WorkflowEngine::new(
        Arc::new(catalogue),
        Arc::new(llm),
        Arc::new(validator),
        Arc::new(ticketing),
        Arc::new(TemplateStore::builtin()),
        Arc::new(TracingAuditSink),
        &config.engine,
    )
    .context("engine construction failed (template contract violation)")?
    .with_snapshots(SnapshotStore::new(config.snapshots.dir.clone()));

    engine
        .run(ConversationId(conversation_id.to_string()))
        .await
        .context("conversation run failed")
}

fn render_report(report: &RunReport) -> CommandResult {
    // An escalated run hands the conversation to a human: the generated
    // text is never shown, only the reason and the attempt history size.
    let payload = match &report.outcome {
        RunOutcome::Delivered { response } => json!({
            "command": "run",
            "status": "ok",
            "run_id": report.run_id,
            "outcome": "delivered",
            "response": response,
            "hops": report.state.hops().len(),
            "validation_attempts": report.state.validation_attempts().len(),
            "snapshot_path": report.snapshot_path.as_ref().map(|path| path.display().to_string()),
        }),
        RunOutcome::Escalated { reason } => json!({
            "command": "run",
            "status": "ok",
            "run_id": report.run_id,
            "outcome": "escalated",
            "escalation_reason": reason,
            "hops": report.state.hops().len(),
            "validation_attempts": report.state.validation_attempts().len(),
            "snapshot_path": report.snapshot_path.as_ref().map(|path| path.display().to_string()),
        }),
    };

    CommandResult { exit_code: 0, output: payload.to_string() }
}

fn init_tracing(config: &AppConfig) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);

    // A second init in the same process is fine; keep the first subscriber.
    let _ = match config.logging.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
    };
}
