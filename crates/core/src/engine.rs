use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Init,
    Plan,
    Gather,
    Coverage,
    Draft,
    Validate,
    Delivered,
    Escalated,
}

impl EngineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Escalated)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineEvent {
    Initialized,
    Planned,
    Gathered,
    CoverageContinue,
    CoverageProceed,
    Drafted,
    DraftFailed,
    ValidationPassed,
    ValidationRetry,
    ValidationEscalate,
}

/// Budget counters the transition guards are checked against. Counters
/// reflect records already appended: the hop (or validation attempt) that
/// produced an event is committed before the event is applied.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineContext {
    pub hops_recorded: u32,
    pub max_hops: u32,
    pub validation_attempts: u32,
    pub max_validation_retries: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub from: EngineState,
    pub to: EngineState,
    pub event: EngineEvent,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: EngineState, event: EngineEvent },
    #[error("hop budget exhausted ({max_hops} hops); coverage must proceed")]
    HopBudgetExhausted { max_hops: u32 },
    #[error("validation retry budget exhausted ({max_attempts} attempts); validate must escalate")]
    ValidationBudgetExhausted { max_attempts: u32 },
}

/// A workflow shape: its initial state plus the legal transitions. The
/// driver applies events through this; it never moves state on its own.
pub trait WorkflowDefinition {
    fn initial_state(&self) -> EngineState;
    fn transition(
        &self,
        current: EngineState,
        event: EngineEvent,
        context: &EngineContext,
    ) -> Result<TransitionOutcome, EngineError>;
}

/// The inquiry workflow: Plan → Gather → Coverage looping until proceed or
/// hop limit, then Draft → Validate looping until pass or retry limit,
/// terminating in Delivered or Escalated.
#[derive(Clone, Debug, Default)]
pub struct InquiryWorkflow;

impl WorkflowDefinition for InquiryWorkflow {
    fn initial_state(&self) -> EngineState {
        EngineState::Init
    }

    fn transition(
        &self,
        current: EngineState,
        event: EngineEvent,
        context: &EngineContext,
    ) -> Result<TransitionOutcome, EngineError> {
        transition_inquiry(current, event, context)
    }
}

pub struct StateMachine<W> {
    workflow: W,
}

impl<W> StateMachine<W>
where
    W: WorkflowDefinition,
{
    pub fn new(workflow: W) -> Self {
        Self { workflow }
    }

    pub fn initial_state(&self) -> EngineState {
        self.workflow.initial_state()
    }

    pub fn apply(
        &self,
        current: EngineState,
        event: EngineEvent,
        context: &EngineContext,
    ) -> Result<TransitionOutcome, EngineError> {
        self.workflow.transition(current, event, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: EngineState,
        event: EngineEvent,
        context: &EngineContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, EngineError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::new(
                        audit.conversation_id.clone(),
                        audit.correlation_id.clone(),
                        "engine.transition_applied",
                        AuditCategory::Engine,
                        audit.actor.clone(),
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", format!("{:?}", outcome.from))
                    .with_metadata("to", format!("{:?}", outcome.to))
                    .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit.conversation_id.clone(),
                        audit.correlation_id.clone(),
                        "engine.transition_rejected",
                        AuditCategory::Engine,
                        audit.actor.clone(),
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for StateMachine<InquiryWorkflow> {
    fn default() -> Self {
        Self::new(InquiryWorkflow)
    }
}

fn transition_inquiry(
    current: EngineState,
    event: EngineEvent,
    context: &EngineContext,
) -> Result<TransitionOutcome, EngineError> {
    use EngineEvent::{
        CoverageContinue, CoverageProceed, DraftFailed, Drafted, Gathered, Initialized, Planned,
        ValidationEscalate, ValidationPassed, ValidationRetry,
    };
    use EngineState::{Coverage, Delivered, Draft, Escalated, Gather, Init, Plan, Validate};

    let to = match (current, event) {
        (Init, Initialized) => Plan,
        (Plan, Planned) => Gather,
        (Gather, Gathered) => Coverage,
        (Coverage, CoverageContinue) => {
            if context.hops_recorded >= context.max_hops {
                return Err(EngineError::HopBudgetExhausted { max_hops: context.max_hops });
            }
            Plan
        }
        (Coverage, CoverageProceed) => Draft,
        (Draft, Drafted) => Validate,
        (Draft, DraftFailed) => Escalated,
        (Validate, ValidationPassed) => Delivered,
        (Validate, ValidationRetry) => {
            if context.validation_attempts > context.max_validation_retries {
                return Err(EngineError::ValidationBudgetExhausted {
                    max_attempts: context.max_validation_retries + 1,
                });
            }
            Draft
        }
        (Validate, ValidationEscalate) => Escalated,
        _ => return Err(EngineError::InvalidTransition { state: current, event }),
    };

    Ok(TransitionOutcome { from: current, to, event })
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::engine::{
        EngineContext, EngineError, EngineEvent, EngineState, InquiryWorkflow, StateMachine,
    };
    use crate::state::ConversationId;

    fn context(hops: u32, attempts: u32) -> EngineContext {
        EngineContext {
            hops_recorded: hops,
            max_hops: 2,
            validation_attempts: attempts,
            max_validation_retries: 1,
        }
    }

    #[test]
    fn single_hop_delivery_path() {
        let machine = StateMachine::default();
        let mut state = machine.initial_state();
        let events = [
            EngineEvent::Initialized,
            EngineEvent::Planned,
            EngineEvent::Gathered,
            EngineEvent::CoverageProceed,
            EngineEvent::Drafted,
            EngineEvent::ValidationPassed,
        ];

        for (step, event) in events.iter().enumerate() {
            let hops = u32::from(step >= 3);
            let attempts = u32::from(step >= 5);
            state = machine
                .apply(state, *event, &context(hops, attempts))
                .expect("happy path transition")
                .to;
        }
        assert_eq!(state, EngineState::Delivered);
    }

    #[test]
    fn coverage_continue_is_rejected_at_hop_budget() {
        let machine = StateMachine::new(InquiryWorkflow);

        let allowed = machine.apply(EngineState::Coverage, EngineEvent::CoverageContinue, &context(1, 0));
        assert!(allowed.is_ok(), "one recorded hop of two leaves budget for another");

        let rejected = machine.apply(EngineState::Coverage, EngineEvent::CoverageContinue, &context(2, 0));
        assert_eq!(rejected, Err(EngineError::HopBudgetExhausted { max_hops: 2 }));

        let forced = machine
            .apply(EngineState::Coverage, EngineEvent::CoverageProceed, &context(2, 0))
            .expect("proceed is always legal from coverage");
        assert_eq!(forced.to, EngineState::Draft);
    }

    #[test]
    fn validation_retry_is_rejected_once_budget_is_spent() {
        let machine = StateMachine::default();

        let allowed = machine.apply(EngineState::Validate, EngineEvent::ValidationRetry, &context(2, 1));
        assert!(allowed.is_ok(), "first failing attempt leaves one retry");

        let rejected = machine.apply(EngineState::Validate, EngineEvent::ValidationRetry, &context(2, 2));
        assert_eq!(rejected, Err(EngineError::ValidationBudgetExhausted { max_attempts: 2 }));

        let escalated = machine
            .apply(EngineState::Validate, EngineEvent::ValidationEscalate, &context(2, 2))
            .expect("escalate is always legal from validate");
        assert_eq!(escalated.to, EngineState::Escalated);
    }

    #[test]
    fn terminal_states_reject_every_event() {
        let machine = StateMachine::default();
        for terminal in [EngineState::Delivered, EngineState::Escalated] {
            let result = machine.apply(terminal, EngineEvent::Drafted, &context(2, 1));
            assert!(matches!(result, Err(EngineError::InvalidTransition { .. })));
        }
    }

    #[test]
    fn out_of_order_event_is_rejected() {
        let machine = StateMachine::default();
        let result = machine.apply(EngineState::Plan, EngineEvent::Gathered, &context(0, 0));
        assert_eq!(
            result,
            Err(EngineError::InvalidTransition {
                state: EngineState::Plan,
                event: EngineEvent::Gathered
            })
        );
    }

    #[test]
    fn replay_is_deterministic_for_same_event_sequence() {
        let machine = StateMachine::default();
        let events = [
            (EngineEvent::Initialized, 0, 0),
            (EngineEvent::Planned, 0, 0),
            (EngineEvent::Gathered, 0, 0),
            (EngineEvent::CoverageContinue, 1, 0),
            (EngineEvent::Planned, 1, 0),
            (EngineEvent::Gathered, 1, 0),
            (EngineEvent::CoverageProceed, 2, 0),
            (EngineEvent::Drafted, 2, 0),
            (EngineEvent::ValidationRetry, 2, 1),
            (EngineEvent::Drafted, 2, 1),
            (EngineEvent::ValidationEscalate, 2, 2),
        ];

        let run = || {
            let mut state = machine.initial_state();
            let mut trace = Vec::new();
            for (event, hops, attempts) in &events {
                let outcome = machine
                    .apply(state, *event, &context(*hops, *attempts))
                    .expect("deterministic replay");
                state = outcome.to;
                trace.push(outcome);
            }
            (state, trace)
        };

        let first = run();
        let second = run();
        assert_eq!(first, second);
        assert_eq!(first.0, EngineState::Escalated);
    }

    #[test]
    fn transitions_emit_audit_events() {
        let machine = StateMachine::default();
        let sink = InMemoryAuditSink::default();
        let audit = AuditContext::new(
            Some(ConversationId("conv-9".to_string())),
            "run-42",
            "workflow-engine",
        );

        machine
            .apply_with_audit(EngineState::Init, EngineEvent::Initialized, &context(0, 0), &sink, &audit)
            .expect("transition should succeed");

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "engine.transition_applied");
        assert_eq!(events[0].correlation_id, "run-42");
    }
}
