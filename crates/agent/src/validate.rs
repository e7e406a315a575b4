//! Validate stage: check the candidate response against policy and route
//! respond / draft / escalate.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use caseflow_core::state::{ConversationId, ValidationAction, ValidationAttempt};
use caseflow_ticketing::TicketingClient;
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationServiceError {
    #[error("validation request failed: {message}")]
    Http { message: String },
    #[error("validation request timed out")]
    Timeout,
    #[error("validation response could not be decoded: {message}")]
    Decode { message: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct ValidationVerdict {
    pub overall_passed: bool,
    pub raw: Value,
}

#[async_trait]
pub trait ResponseValidator: Send + Sync {
    async fn validate(&self, reply: &str) -> Result<ValidationVerdict, ValidationServiceError>;
}

/// HTTP validator posting `{"reply": ...}` to the configured endpoint. The
/// response JSON must carry an `overall_passed` boolean; the rest is kept
/// raw for the attempt log and the ticketing note.
pub struct HttpResponseValidator {
    http: reqwest::Client,
    endpoint: String,
    auth_token: Option<SecretString>,
}

impl HttpResponseValidator {
    pub fn new(
        endpoint: impl Into<String>,
        auth_token: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, ValidationServiceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| ValidationServiceError::Http { message: error.to_string() })?;
        Ok(Self { http, endpoint: endpoint.into(), auth_token })
    }
}

#[async_trait]
impl ResponseValidator for HttpResponseValidator {
    async fn validate(&self, reply: &str) -> Result<ValidationVerdict, ValidationServiceError> {
        let mut request = self.http.post(&self.endpoint).json(&json!({"reply": reply}));
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    ValidationServiceError::Timeout
                } else {
                    ValidationServiceError::Http { message: error.to_string() }
                }
            })?
            .error_for_status()
            .map_err(|error| ValidationServiceError::Http { message: error.to_string() })?;

        let raw: Value = response
            .json()
            .await
            .map_err(|error| ValidationServiceError::Decode { message: error.to_string() })?;
        let overall_passed = raw
            .get("overall_passed")
            .and_then(Value::as_bool)
            .ok_or_else(|| ValidationServiceError::Decode {
                message: "response is missing `overall_passed`".to_string(),
            })?;
        Ok(ValidationVerdict { overall_passed, raw })
    }
}

pub struct ValidateStage {
    validator: Arc<dyn ResponseValidator>,
    ticketing: Arc<dyn TicketingClient>,
}

impl ValidateStage {
    pub fn new(validator: Arc<dyn ResponseValidator>, ticketing: Arc<dyn TicketingClient>) -> Self {
        Self { validator, ticketing }
    }

    /// Run one validation attempt. Never fails: service errors become an
    /// escalating attempt, and the best-effort ticketing note never blocks
    /// the routing decision.
    pub async fn validate(
        &self,
        conversation_id: &ConversationId,
        candidate: &str,
        current_retry_count: u32,
        max_validation_retries: u32,
    ) -> ValidationAttempt {
        let mut attempt = ValidationAttempt {
            validation_response: Value::Null,
            overall_passed: false,
            validation_note_added: false,
            escalation_reason: None,
            next_action: ValidationAction::Escalate,
            retry_count: current_retry_count,
            timestamp: Utc::now(),
        };
        debug!(
            attempt = current_retry_count + 1,
            budget = max_validation_retries + 1,
            "validating candidate response"
        );

        match self.validator.validate(candidate).await {
            Ok(verdict) => {
                attempt.overall_passed = verdict.overall_passed;
                attempt.validation_response = verdict.raw;
                attempt.validation_note_added =
                    self.post_note(conversation_id, &attempt).await;

                if attempt.overall_passed {
                    attempt.next_action = ValidationAction::Respond;
                } else if current_retry_count < max_validation_retries {
                    attempt.next_action = ValidationAction::Draft;
                } else {
                    attempt.next_action = ValidationAction::Escalate;
                    attempt.escalation_reason = Some(format!(
                        "Validation failed after {} attempts - see validation notes for details",
                        max_validation_retries + 1
                    ));
                }
            }
            Err(error) => {
                warn!(error = %error, "validation service call failed; escalating");
                attempt.validation_response = json!({"error": error.to_string()});
                attempt.next_action = ValidationAction::Escalate;
                attempt.escalation_reason = Some(format!("Validation error: {error}"));
            }
        }

        attempt
    }

    async fn post_note(&self, conversation_id: &ConversationId, attempt: &ValidationAttempt) -> bool {
        let status = if attempt.overall_passed { "PASSED" } else { "FAILED" };
        let raw = serde_json::to_string_pretty(&attempt.validation_response)
            .unwrap_or_else(|_| attempt.validation_response.to_string());
        let note = format!(
            "Response validation results\n\nStatus: {status}\nAttempt: {}\n\n```json\n{raw}\n```",
            attempt.retry_count + 1
        );

        match self.ticketing.add_note(&conversation_id.0, &note).await {
            Ok(()) => true,
            Err(error) => {
                warn!(error = %error, "failed to post validation note; continuing");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use caseflow_core::state::{ConversationId, ValidationAction};
    use caseflow_ticketing::{ConversationData, InMemoryTicketing, TicketUser};
    use serde_json::json;

    use super::ValidateStage;
    use crate::testkit::ScriptedValidator;

    fn ticketing() -> InMemoryTicketing {
        InMemoryTicketing::new().with_conversation(ConversationData {
            id: "conv-1".to_string(),
            subject: None,
            messages: Vec::new(),
            user: TicketUser::default(),
        })
    }

    #[tokio::test]
    async fn pass_routes_to_respond_and_posts_note() {
        let validator = ScriptedValidator::new();
        validator.push_pass();
        let ticketing = Arc::new(ticketing());
        let stage = ValidateStage::new(
            Arc::new(validator),
            Arc::clone(&ticketing) as Arc<dyn caseflow_ticketing::TicketingClient>,
        );

        let attempt =
            stage.validate(&ConversationId("conv-1".to_string()), "candidate", 0, 1).await;

        assert!(attempt.overall_passed);
        assert_eq!(attempt.next_action, ValidationAction::Respond);
        assert!(attempt.validation_note_added);
        assert_eq!(attempt.retry_count, 0);

        let notes = ticketing.notes();
        assert_eq!(notes.len(), 1);
        assert!(notes[0].1.contains("Status: PASSED"));
    }

    #[tokio::test]
    async fn failure_with_retries_left_routes_to_draft() {
        let validator = ScriptedValidator::new();
        validator.push_fail(json!({"overall_passed": false, "issues": ["tone"]}));
        let stage = ValidateStage::new(Arc::new(validator), Arc::new(ticketing()));

        let attempt =
            stage.validate(&ConversationId("conv-1".to_string()), "candidate", 0, 1).await;

        assert!(!attempt.overall_passed);
        assert_eq!(attempt.next_action, ValidationAction::Draft);
        assert!(attempt.escalation_reason.is_none());
    }

    #[tokio::test]
    async fn exhausted_retries_escalate_with_attempt_count() {
        let validator = ScriptedValidator::new();
        validator.push_fail(json!({"overall_passed": false}));
        let stage = ValidateStage::new(Arc::new(validator), Arc::new(ticketing()));

        let attempt =
            stage.validate(&ConversationId("conv-1".to_string()), "candidate", 1, 1).await;

        assert_eq!(attempt.next_action, ValidationAction::Escalate);
        let reason = attempt.escalation_reason.expect("escalation reason set");
        assert!(reason.contains("2 attempts"));
    }

    #[tokio::test]
    async fn note_failure_never_blocks_routing() {
        let validator = ScriptedValidator::new();
        validator.push_pass();
        let stage = ValidateStage::new(
            Arc::new(validator),
            Arc::new(InMemoryTicketing::new().failing_notes()),
        );

        let attempt =
            stage.validate(&ConversationId("conv-1".to_string()), "candidate", 0, 1).await;

        assert_eq!(attempt.next_action, ValidationAction::Respond);
        assert!(!attempt.validation_note_added);
    }

    #[tokio::test]
    async fn service_error_escalates() {
        let validator = ScriptedValidator::new();
        validator.push_error("connection refused");
        let stage = ValidateStage::new(Arc::new(validator), Arc::new(ticketing()));

        let attempt =
            stage.validate(&ConversationId("conv-1".to_string()), "candidate", 0, 1).await;

        assert_eq!(attempt.next_action, ValidationAction::Escalate);
        assert!(attempt.escalation_reason.expect("reason").contains("Validation error"));
    }
}
