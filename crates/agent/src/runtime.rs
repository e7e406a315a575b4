//! Workflow engine: drives the stages through the state machine.
//!
//! One call to [`WorkflowEngine::run`] handles one conversation turn:
//! INIT (fetch + context + one-time procedure selection), the
//! Plan/Gather/Coverage hop loop, the Draft/Validate retry loop, and
//! terminal handling (snapshot + audit). Records are appended to state
//! before the corresponding transition is applied, so an interrupted run
//! always shows the last completed stage unambiguously.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use caseflow_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use caseflow_core::config::EngineConfig;
use caseflow_core::engine::{
    EngineContext, EngineError, EngineEvent, EngineState, InquiryWorkflow, StateMachine,
};
use caseflow_core::snapshot::{RunSnapshot, SnapshotError, SnapshotStore};
use caseflow_core::state::{
    ConversationId, ConversationState, CoverageAction, HopRecord, Message, MessageRole,
    RunLimits, RunOutcome, StateError, ValidationAction,
};
use caseflow_core::templates::{names, ResponseMode, TemplateError, TemplateStore};
use caseflow_mcp::{ToolCatalogue, ToolDescriptor};
use caseflow_ticketing::context::{build_context, ContextError};
use caseflow_ticketing::{TicketingClient, TicketingError};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::coverage::CoverageStage;
use crate::draft::{DraftError, DraftStage};
use crate::gather::GatherStage;
use crate::llm::{LlmClient, RetryPolicy};
use crate::plan::PlanStage;
use crate::procedure::ProcedureSelector;
use crate::validate::{ResponseValidator, ValidateStage};

/// Sink forwarding audit events to the tracing subscriber. The default
/// sink for operator runs, where no separate audit pipeline exists.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        info!(
            event_type = %event.event_type,
            correlation_id = %event.correlation_id,
            outcome = ?event.outcome,
            metadata = ?event.metadata,
            "audit"
        );
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("conversation could not be fetched: {0}")]
    Ticketing(#[from] TicketingError),
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

#[derive(Clone, Debug)]
pub struct RunReport {
    pub run_id: String,
    pub outcome: RunOutcome,
    pub state: ConversationState,
    pub snapshot_path: Option<PathBuf>,
}

pub struct WorkflowEngine {
    catalogue: Arc<dyn ToolCatalogue>,
    ticketing: Arc<dyn TicketingClient>,
    audit: Arc<dyn AuditSink>,
    machine: StateMachine<InquiryWorkflow>,
    procedure: ProcedureSelector,
    plan: PlanStage,
    gather: GatherStage,
    coverage: CoverageStage,
    draft: DraftStage,
    validate: ValidateStage,
    limits: RunLimits,
    snapshots: Option<SnapshotStore>,
}

impl WorkflowEngine {
    /// Build the engine and validate every stage's template contract up
    /// front: a placeholder mismatch is a deployment problem and must fail
    /// here, not on first use mid-run.
    pub fn new(
        catalogue: Arc<dyn ToolCatalogue>,
        llm: Arc<dyn LlmClient>,
        validator: Arc<dyn ResponseValidator>,
        ticketing: Arc<dyn TicketingClient>,
        templates: Arc<TemplateStore>,
        audit: Arc<dyn AuditSink>,
        config: &EngineConfig,
    ) -> Result<Self, TemplateError> {
        validate_template_contracts(&templates)?;

        let retry = RetryPolicy::default();
        Ok(Self {
            catalogue: Arc::clone(&catalogue),
            ticketing: Arc::clone(&ticketing),
            audit,
            machine: StateMachine::default(),
            procedure: ProcedureSelector::new(
                Arc::clone(&llm),
                Arc::clone(&catalogue),
                Arc::clone(&templates),
                config.procedure_tool.clone(),
                config.procedure_top_k,
            ),
            plan: PlanStage::new(Arc::clone(&llm), Arc::clone(&templates)),
            gather: GatherStage::new(
                Arc::clone(&catalogue),
                Duration::from_secs(config.gather_timeout_secs),
                config.docs_tool.clone(),
            ),
            coverage: CoverageStage::new(Arc::clone(&llm), Arc::clone(&templates)),
            draft: DraftStage::new(llm, templates, config.mode, retry),
            validate: ValidateStage::new(validator, Arc::clone(&ticketing)),
            limits: RunLimits {
                max_hops: config.max_hops,
                max_validation_retries: config.max_validation_retries,
            },
            snapshots: None,
        })
    }

    pub fn with_snapshots(mut self, store: SnapshotStore) -> Self {
        self.snapshots = Some(store);
        self
    }

    pub async fn run(&self, conversation_id: ConversationId) -> Result<RunReport, RunError> {
        let run_id = Uuid::new_v4().to_string();
        let audit_ctx =
            AuditContext::new(Some(conversation_id.clone()), run_id.clone(), "workflow-engine");
        info!(run_id = %run_id, conversation_id = %conversation_id, "starting conversation run");

        let conversation = self.ticketing.get_conversation(&conversation_id.0, true).await?;
        let context = build_context(&conversation)?;
        let messages = conversation
            .messages
            .iter()
            .map(|message| Message {
                role: if message.role == "assistant" {
                    MessageRole::Assistant
                } else {
                    MessageRole::User
                },
                content: message.content.clone(),
            })
            .collect();

        let mut state = ConversationState::new(
            conversation_id.clone(),
            context.conversation_history,
            context.user_details,
            messages,
            self.limits,
        );
        self.emit(&audit_ctx, "ingress.conversation_fetched", AuditCategory::Ingress, AuditOutcome::Success, &[]);

        let mut engine_state = self.machine.initial_state();
        engine_state = self.apply(engine_state, EngineEvent::Initialized, &state, &audit_ctx)?;

        // One-time procedure selection; first write wins for the whole run.
        if let Some(procedure) = self.procedure.select(&state.conversation_history).await {
            let title = procedure.title.clone();
            let reasoning = procedure.reasoning.clone();
            state.set_procedure(procedure);
            self.emit(
                &audit_ctx,
                "procedure.selected",
                AuditCategory::Procedure,
                AuditOutcome::Success,
                &[("title", &title)],
            );
            let note = format!("Procedure selected: {title}\n\n{reasoning}");
            if let Err(error) = self.ticketing.add_note(&conversation_id.0, &note).await {
                warn!(error = %error, "failed to post procedure note; continuing");
            }
        } else {
            self.emit(
                &audit_ctx,
                "procedure.none_selected",
                AuditCategory::Procedure,
                AuditOutcome::Success,
                &[],
            );
        }

        engine_state = self.run_hops(engine_state, &mut state, &audit_ctx).await?;
        debug_assert_eq!(engine_state, EngineState::Draft);

        let outcome = self.run_draft_validate(engine_state, &mut state, &audit_ctx).await?;

        let snapshot_path = match &self.snapshots {
            Some(store) => {
                Some(store.write(&RunSnapshot::new(run_id.clone(), state.clone()))?)
            }
            None => None,
        };

        let (event_type, audit_outcome) = match &outcome {
            RunOutcome::Delivered { .. } => ("delivery.response_delivered", AuditOutcome::Success),
            RunOutcome::Escalated { .. } => ("delivery.escalated", AuditOutcome::Failed),
        };
        self.emit(
            &audit_ctx,
            event_type,
            AuditCategory::Delivery,
            audit_outcome,
            &[
                ("hops", &state.hops().len().to_string()),
                ("validation_attempts", &state.validation_attempts().len().to_string()),
            ],
        );
        info!(run_id = %run_id, outcome = ?outcome, "conversation run finished");

        Ok(RunReport { run_id, outcome, state, snapshot_path })
    }

    async fn run_hops(
        &self,
        mut engine_state: EngineState,
        state: &mut ConversationState,
        audit_ctx: &AuditContext,
    ) -> Result<EngineState, RunError> {
        loop {
            let tools = self.list_tools().await;
            let plan = self.plan.plan(state, &tools).await?;
            engine_state = self.apply(engine_state, EngineEvent::Planned, state, audit_ctx)?;

            let hop_number = state.current_hop_number();
            let gather = self.gather.gather(&plan, hop_number, &mut state.evidence).await;
            engine_state = self.apply(engine_state, EngineEvent::Gathered, state, audit_ctx)?;

            let coverage = self.coverage.assess(state, &plan.reasoning).await?;
            let next_action = coverage.next_action;
            self.emit(
                audit_ctx,
                "coverage.assessed",
                AuditCategory::Coverage,
                AuditOutcome::Success,
                &[
                    ("hop", &hop_number.to_string()),
                    ("successful_tools", &gather.successful_tools.to_string()),
                    ("failed_tools", &gather.failed_tools.to_string()),
                    ("next_action", if next_action == CoverageAction::Continue { "continue" } else { "proceed" }),
                ],
            );

            // Append the finalized hop before taking the transition it decides.
            state.record_hop(HopRecord { hop_number, plan, gather, coverage })?;

            match next_action {
                CoverageAction::Continue => {
                    engine_state =
                        self.apply(engine_state, EngineEvent::CoverageContinue, state, audit_ctx)?;
                }
                CoverageAction::Proceed => {
                    engine_state =
                        self.apply(engine_state, EngineEvent::CoverageProceed, state, audit_ctx)?;
                    return Ok(engine_state);
                }
            }
        }
    }

    async fn run_draft_validate(
        &self,
        mut engine_state: EngineState,
        state: &mut ConversationState,
        audit_ctx: &AuditContext,
    ) -> Result<RunOutcome, RunError> {
        loop {
            let drafted = match self.draft.draft(state).await {
                Ok(outcome) => outcome,
                Err(DraftError::Template(error)) => return Err(error.into()),
                Err(DraftError::Generation(error)) => {
                    warn!(error = %error, "draft generation failed after retries; escalating");
                    self.apply(engine_state, EngineEvent::DraftFailed, state, audit_ctx)?;
                    let outcome = RunOutcome::Escalated {
                        reason: format!("Draft generation failed: {error}"),
                    };
                    state.complete(outcome.clone())?;
                    return Ok(outcome);
                }
            };
            self.emit(
                audit_ctx,
                "draft.candidate_generated",
                AuditCategory::Draft,
                AuditOutcome::Success,
                &[
                    ("prompt_chars", &drafted.debug.prompt_chars.to_string()),
                    ("has_feedback", &drafted.debug.has_feedback.to_string()),
                    ("has_procedure", &drafted.debug.has_procedure.to_string()),
                ],
            );
            engine_state = self.apply(engine_state, EngineEvent::Drafted, state, audit_ctx)?;

            let attempt = self
                .validate
                .validate(
                    &state.conversation_id,
                    &drafted.response,
                    state.current_retry_count(),
                    state.limits().max_validation_retries,
                )
                .await;
            let action = attempt.next_action;
            let escalation_reason = attempt.escalation_reason.clone();

            // Append the attempt before taking the transition it decides.
            state.record_validation(attempt)?;

            match action {
                ValidationAction::Respond => {
                    self.apply(engine_state, EngineEvent::ValidationPassed, state, audit_ctx)?;
                    let outcome = RunOutcome::Delivered { response: drafted.response };
                    state.complete(outcome.clone())?;
                    return Ok(outcome);
                }
                ValidationAction::Draft => {
                    engine_state =
                        self.apply(engine_state, EngineEvent::ValidationRetry, state, audit_ctx)?;
                }
                ValidationAction::Escalate => {
                    self.apply(engine_state, EngineEvent::ValidationEscalate, state, audit_ctx)?;
                    let outcome = RunOutcome::Escalated {
                        reason: escalation_reason
                            .unwrap_or_else(|| "Validation failed".to_string()),
                    };
                    state.complete(outcome.clone())?;
                    return Ok(outcome);
                }
            }
        }
    }

    async fn list_tools(&self) -> Vec<ToolDescriptor> {
        match self.catalogue.list_tools().await {
            Ok(tools) => tools,
            Err(error) => {
                warn!(error = %error, "tool listing failed; planning against an empty catalogue");
                Vec::new()
            }
        }
    }

    fn apply(
        &self,
        current: EngineState,
        event: EngineEvent,
        state: &ConversationState,
        audit_ctx: &AuditContext,
    ) -> Result<EngineState, EngineError> {
        let context = EngineContext {
            hops_recorded: state.hops().len() as u32,
            max_hops: state.limits().max_hops,
            validation_attempts: state.validation_attempts().len() as u32,
            max_validation_retries: state.limits().max_validation_retries,
        };
        let outcome = self.machine.apply_with_audit(
            current,
            event,
            &context,
            self.audit.as_ref(),
            audit_ctx,
        )?;
        Ok(outcome.to)
    }

    fn emit(
        &self,
        audit_ctx: &AuditContext,
        event_type: &str,
        category: AuditCategory,
        outcome: AuditOutcome,
        metadata: &[(&str, &str)],
    ) {
        let mut event = AuditEvent::new(
            audit_ctx.conversation_id.clone(),
            audit_ctx.correlation_id.clone(),
            event_type,
            category,
            audit_ctx.actor.clone(),
            outcome,
        );
        for (key, value) in metadata {
            event = event.with_metadata(*key, *value);
        }
        self.audit.emit(event);
    }
}

fn validate_template_contracts(templates: &TemplateStore) -> Result<(), TemplateError> {
    templates.validate_contract(
        names::PLAN,
        &["conversation_history", "user_details", "procedure", "available_tools", "available_data"],
    )?;
    templates.validate_contract(
        names::COVERAGE,
        &["conversation_history", "user_details", "procedure", "available_data"],
    )?;
    for mode in [ResponseMode::Ticket, ResponseMode::Slack] {
        templates.validate_contract(
            mode.template_name(),
            &["conversation_history", "user_details", "procedure", "data_summary"],
        )?;
    }
    templates.validate_contract(names::PROCEDURE_QUERY, &["conversation_history"])?;
    templates.validate_contract(names::PROCEDURE_MATCH, &["conversation_history", "candidates"])?;
    Ok(())
}
