//! Per-run conversation state.
//!
//! A `ConversationState` is created once per inbound conversation turn,
//! mutated only by appends (`record_hop`, `record_validation`) or one-time
//! sets (procedure, terminal outcome), and discarded after the terminal
//! outcome is persisted. It is never shared across concurrent runs.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

/// Policy/guidance document selected at most once per run and injected
/// into every prompt-constructing stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Procedure {
    pub title: String,
    pub reasoning: String,
    pub content: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLimits {
    pub max_hops: u32,
    pub max_validation_retries: u32,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self { max_hops: 2, max_validation_retries: 1 }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedCall {
    pub tool_name: String,
    pub arguments: Value,
    pub reasoning: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanRecord {
    pub reasoning: String,
    pub tool_calls: Vec<PlannedCall>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatherRecord {
    pub successful_tools: u32,
    pub failed_tools: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageAction {
    /// Loop back to Plan for another hop.
    Continue,
    /// Evidence suffices (or the hop budget is spent); move to Draft.
    Proceed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageRecord {
    pub analysis: String,
    pub next_action: CoverageAction,
}

/// One completed Plan → Gather → Coverage cycle. Immutable once appended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopRecord {
    pub hop_number: u32,
    pub plan: PlanRecord,
    pub gather: GatherRecord,
    pub coverage: CoverageRecord,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationAction {
    Respond,
    Draft,
    Escalate,
}

/// One Draft → Validate cycle's recorded outcome. Immutable once appended;
/// `retry_count` equals the 0-based index of the attempt in the log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationAttempt {
    pub validation_response: Value,
    pub overall_passed: bool,
    pub validation_note_added: bool,
    pub escalation_reason: Option<String>,
    pub next_action: ValidationAction,
    pub retry_count: u32,
    pub timestamp: DateTime<Utc>,
}

/// Evidence accumulated across hops, keyed by tool name (`tool_data`) or
/// docs-search key (`docs_data`). Later hops overwrite a key with fresher
/// data: last write wins per key.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceStore {
    pub tool_data: BTreeMap<String, Value>,
    pub docs_data: BTreeMap<String, Value>,
}

impl EvidenceStore {
    pub fn merge_tool(&mut self, tool_name: impl Into<String>, data: Value) {
        self.tool_data.insert(tool_name.into(), data);
    }

    pub fn merge_docs(&mut self, key: impl Into<String>, data: Value) {
        self.docs_data.insert(key.into(), data);
    }

    pub fn tool_count(&self) -> usize {
        self.tool_data.len()
    }

    pub fn docs_count(&self) -> usize {
        self.docs_data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tool_data.is_empty() && self.docs_data.is_empty()
    }
}

/// Terminal result of a run. Exactly one variant is set at termination.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Delivered { response: String },
    Escalated { reason: String },
}

impl RunOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }

    pub fn is_escalated(&self) -> bool {
        matches!(self, Self::Escalated { .. })
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("hop budget exhausted: {max_hops} hops already recorded")]
    HopBudgetExhausted { max_hops: u32 },
    #[error("hop number {got} out of sequence (expected {expected})")]
    NonSequentialHop { expected: u32, got: u32 },
    #[error("validation retry budget exhausted: {max_attempts} attempts already recorded")]
    ValidationBudgetExhausted { max_attempts: u32 },
    #[error("validation attempt retry_count {got} does not match log position {expected}")]
    RetryCountMismatch { expected: u32, got: u32 },
    #[error("run already reached a terminal outcome")]
    AlreadyCompleted,
}

/// The single mutable record threaded through a whole run.
///
/// Hop and validation logs are private so the only way to grow them is the
/// checked append operations below; the procedure slot is private so the
/// first selection wins for the remainder of the run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub conversation_id: ConversationId,
    pub conversation_history: String,
    pub user_details: String,
    pub messages: Vec<Message>,
    selected_procedure: Option<Procedure>,
    hops: Vec<HopRecord>,
    validate: Vec<ValidationAttempt>,
    pub evidence: EvidenceStore,
    limits: RunLimits,
    outcome: Option<RunOutcome>,
    pub started_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(
        conversation_id: ConversationId,
        conversation_history: String,
        user_details: String,
        messages: Vec<Message>,
        limits: RunLimits,
    ) -> Self {
        Self {
            conversation_id,
            conversation_history,
            user_details,
            messages,
            selected_procedure: None,
            hops: Vec::new(),
            validate: Vec::new(),
            evidence: EvidenceStore::default(),
            limits,
            outcome: None,
            started_at: Utc::now(),
        }
    }

    pub fn limits(&self) -> RunLimits {
        self.limits
    }

    /// First write wins. Returns `false` (and leaves the existing selection
    /// untouched) if a procedure was already selected this run.
    pub fn set_procedure(&mut self, procedure: Procedure) -> bool {
        if self.selected_procedure.is_some() {
            return false;
        }
        self.selected_procedure = Some(procedure);
        true
    }

    pub fn procedure(&self) -> Option<&Procedure> {
        self.selected_procedure.as_ref()
    }

    pub fn hops(&self) -> &[HopRecord] {
        &self.hops
    }

    /// Number of the hop currently being executed (1-based).
    pub fn current_hop_number(&self) -> u32 {
        self.hops.len() as u32 + 1
    }

    pub fn validation_attempts(&self) -> &[ValidationAttempt] {
        &self.validate
    }

    /// 0-based index the next validation attempt will occupy.
    pub fn current_retry_count(&self) -> u32 {
        self.validate.len() as u32
    }

    /// Append a finalized hop. Enforces sequential numbering and the
    /// `max_hops` budget.
    pub fn record_hop(&mut self, hop: HopRecord) -> Result<(), StateError> {
        if self.outcome.is_some() {
            return Err(StateError::AlreadyCompleted);
        }
        if self.hops.len() as u32 >= self.limits.max_hops {
            return Err(StateError::HopBudgetExhausted { max_hops: self.limits.max_hops });
        }
        let expected = self.hops.len() as u32 + 1;
        if hop.hop_number != expected {
            return Err(StateError::NonSequentialHop { expected, got: hop.hop_number });
        }
        self.hops.push(hop);
        Ok(())
    }

    /// Append a validation attempt. Enforces the `retry_count == index`
    /// invariant and the `max_validation_retries + 1` attempt budget.
    pub fn record_validation(&mut self, attempt: ValidationAttempt) -> Result<(), StateError> {
        if self.outcome.is_some() {
            return Err(StateError::AlreadyCompleted);
        }
        let max_attempts = self.limits.max_validation_retries + 1;
        if self.validate.len() as u32 >= max_attempts {
            return Err(StateError::ValidationBudgetExhausted { max_attempts });
        }
        let expected = self.validate.len() as u32;
        if attempt.retry_count != expected {
            return Err(StateError::RetryCountMismatch { expected, got: attempt.retry_count });
        }
        self.validate.push(attempt);
        Ok(())
    }

    /// One-time terminal set; the state is read-only afterwards.
    pub fn complete(&mut self, outcome: RunOutcome) -> Result<(), StateError> {
        if self.outcome.is_some() {
            return Err(StateError::AlreadyCompleted);
        }
        self.outcome = Some(outcome);
        Ok(())
    }

    pub fn outcome(&self) -> Option<&RunOutcome> {
        self.outcome.as_ref()
    }

    /// Feedback for a Draft retry: the most recent validation attempt, but
    /// only when it routed back to Draft.
    pub fn retry_feedback(&self) -> Option<&ValidationAttempt> {
        self.validate.last().filter(|attempt| attempt.next_action == ValidationAction::Draft)
    }

    /// Coverage reasoning from the most recent finalized hop, if any.
    pub fn latest_coverage_analysis(&self) -> Option<&str> {
        self.hops.last().map(|hop| hop.coverage.analysis.as_str())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::{
        ConversationId, ConversationState, CoverageAction, CoverageRecord, EvidenceStore,
        GatherRecord, HopRecord, PlanRecord, PlannedCall, Procedure, RunLimits, RunOutcome,
        StateError, ValidationAction, ValidationAttempt,
    };

    fn state_fixture(limits: RunLimits) -> ConversationState {
        ConversationState::new(
            ConversationId("conv-1".to_string()),
            "Conversation:\n1. User: where is my application?".to_string(),
            "Name: Dana Reyes\nEmail: dana@example.com".to_string(),
            Vec::new(),
            limits,
        )
    }

    fn hop_fixture(hop_number: u32, next_action: CoverageAction) -> HopRecord {
        HopRecord {
            hop_number,
            plan: PlanRecord {
                reasoning: "look up the application".to_string(),
                tool_calls: vec![PlannedCall {
                    tool_name: "get_applications".to_string(),
                    arguments: json!({"email": "dana@example.com"}),
                    reasoning: "need application status".to_string(),
                }],
            },
            gather: GatherRecord { successful_tools: 1, failed_tools: 0 },
            coverage: CoverageRecord { analysis: "status found".to_string(), next_action },
        }
    }

    fn attempt_fixture(retry_count: u32, next_action: ValidationAction) -> ValidationAttempt {
        ValidationAttempt {
            validation_response: json!({"overall_passed": next_action == ValidationAction::Respond}),
            overall_passed: next_action == ValidationAction::Respond,
            validation_note_added: false,
            escalation_reason: None,
            next_action,
            retry_count,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn procedure_selection_is_first_write_wins() {
        let mut state = state_fixture(RunLimits::default());
        let first = Procedure {
            title: "Application status".to_string(),
            reasoning: "matches the inquiry".to_string(),
            content: "Check applications, then referrals.".to_string(),
        };
        let second = Procedure {
            title: "Referral payouts".to_string(),
            reasoning: "should not win".to_string(),
            content: "irrelevant".to_string(),
        };

        assert!(state.set_procedure(first.clone()));
        assert!(!state.set_procedure(second));
        assert_eq!(state.procedure(), Some(&first));
    }

    #[test]
    fn hop_appends_enforce_sequence_and_budget() {
        let mut state = state_fixture(RunLimits { max_hops: 2, max_validation_retries: 1 });

        state.record_hop(hop_fixture(1, CoverageAction::Continue)).expect("first hop");
        let out_of_order = state.record_hop(hop_fixture(3, CoverageAction::Proceed));
        assert_eq!(out_of_order, Err(StateError::NonSequentialHop { expected: 2, got: 3 }));

        state.record_hop(hop_fixture(2, CoverageAction::Proceed)).expect("second hop");
        let over_budget = state.record_hop(hop_fixture(3, CoverageAction::Proceed));
        assert_eq!(over_budget, Err(StateError::HopBudgetExhausted { max_hops: 2 }));
        assert_eq!(state.hops().len(), 2);
    }

    #[test]
    fn validation_appends_enforce_retry_count_invariant() {
        let mut state = state_fixture(RunLimits { max_hops: 2, max_validation_retries: 1 });

        state.record_validation(attempt_fixture(0, ValidationAction::Draft)).expect("attempt 0");
        let mismatch = state.record_validation(attempt_fixture(0, ValidationAction::Escalate));
        assert_eq!(mismatch, Err(StateError::RetryCountMismatch { expected: 1, got: 0 }));

        state.record_validation(attempt_fixture(1, ValidationAction::Escalate)).expect("attempt 1");
        let over_budget = state.record_validation(attempt_fixture(2, ValidationAction::Escalate));
        assert_eq!(over_budget, Err(StateError::ValidationBudgetExhausted { max_attempts: 2 }));

        let retry_counts: Vec<u32> =
            state.validation_attempts().iter().map(|attempt| attempt.retry_count).collect();
        assert_eq!(retry_counts, vec![0, 1]);
    }

    #[test]
    fn earlier_attempts_are_untouched_by_later_appends() {
        let mut state = state_fixture(RunLimits { max_hops: 2, max_validation_retries: 1 });

        state.record_validation(attempt_fixture(0, ValidationAction::Draft)).expect("attempt 0");
        let before = state.validation_attempts()[0].clone();

        state.record_validation(attempt_fixture(1, ValidationAction::Escalate)).expect("attempt 1");
        assert_eq!(state.validation_attempts()[0], before);
    }

    #[test]
    fn terminal_outcome_is_set_exactly_once() {
        let mut state = state_fixture(RunLimits::default());
        state
            .complete(RunOutcome::Delivered { response: "Your application is in review.".into() })
            .expect("first completion");

        let again = state.complete(RunOutcome::Escalated { reason: "should fail".into() });
        assert_eq!(again, Err(StateError::AlreadyCompleted));
        assert!(state.outcome().is_some_and(RunOutcome::is_delivered));

        let late_hop = state.record_hop(hop_fixture(1, CoverageAction::Proceed));
        assert_eq!(late_hop, Err(StateError::AlreadyCompleted));
    }

    #[test]
    fn retry_feedback_only_surfaces_draft_routed_attempts() {
        let mut state = state_fixture(RunLimits::default());
        assert!(state.retry_feedback().is_none());

        state.record_validation(attempt_fixture(0, ValidationAction::Draft)).expect("attempt 0");
        assert!(state.retry_feedback().is_some());

        state.record_validation(attempt_fixture(1, ValidationAction::Respond)).expect("attempt 1");
        assert!(state.retry_feedback().is_none());
    }

    #[test]
    fn evidence_merge_is_last_write_wins_per_key() {
        let mut evidence = EvidenceStore::default();
        evidence.merge_tool("get_applications", json!({"hop": 1}));
        evidence.merge_tool("get_applications", json!({"hop": 2}));
        evidence.merge_docs("visa policy (hop 1)", json!({"results": []}));

        assert_eq!(evidence.tool_count(), 1);
        assert_eq!(evidence.docs_count(), 1);
        assert_eq!(evidence.tool_data["get_applications"], json!({"hop": 2}));
    }

    #[test]
    fn state_round_trips_through_json() {
        let mut state = state_fixture(RunLimits { max_hops: 2, max_validation_retries: 1 });
        state.record_hop(hop_fixture(1, CoverageAction::Proceed)).expect("hop");
        state.record_validation(attempt_fixture(0, ValidationAction::Respond)).expect("attempt");
        state.complete(RunOutcome::Delivered { response: "done".into() }).expect("complete");

        let encoded = serde_json::to_string(&state).expect("serialize");
        let decoded: ConversationState = serde_json::from_str(&encoded).expect("deserialize");
        assert_eq!(decoded, state);
    }
}
