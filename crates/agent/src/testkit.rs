//! Scripted fakes for the LLM and the validation service, used by this
//! crate's tests and by downstream integration tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::llm::{GenerationError, LlmClient};
use crate::validate::{ResponseValidator, ValidationServiceError, ValidationVerdict};

/// LLM fake returning queued responses per mode, with an optional repeating
/// default per mode once the queue drains. Prompts are recorded for
/// assertions.
#[derive(Default)]
pub struct ScriptedLlm {
    queues: Mutex<HashMap<String, VecDeque<Result<String, GenerationError>>>>,
    defaults: Mutex<HashMap<String, String>>,
    prompts: Mutex<Vec<(String, String)>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, mode: &str, response: impl Into<String>) {
        self.lock_queues().entry(mode.to_string()).or_default().push_back(Ok(response.into()));
    }

    pub fn enqueue_error(&self, mode: &str, error: GenerationError) {
        self.lock_queues().entry(mode.to_string()).or_default().push_back(Err(error));
    }

    /// Response returned whenever the queue for `mode` is empty.
    pub fn set_default(&self, mode: &str, response: impl Into<String>) {
        match self.defaults.lock() {
            Ok(mut defaults) => defaults.insert(mode.to_string(), response.into()),
            Err(poisoned) => poisoned.into_inner().insert(mode.to_string(), response.into()),
        };
    }

    /// `(mode, prompt)` pairs observed so far, in call order.
    pub fn prompts(&self) -> Vec<(String, String)> {
        match self.prompts.lock() {
            Ok(prompts) => prompts.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn lock_queues(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, VecDeque<Result<String, GenerationError>>>> {
        match self.queues.lock() {
            Ok(queues) => queues,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn generate(&self, prompt: &str, mode: &str) -> Result<String, GenerationError> {
        match self.prompts.lock() {
            Ok(mut prompts) => prompts.push((mode.to_string(), prompt.to_string())),
            Err(poisoned) => poisoned.into_inner().push((mode.to_string(), prompt.to_string())),
        }

        if let Some(queued) = self.lock_queues().get_mut(mode).and_then(VecDeque::pop_front) {
            return queued;
        }

        let fallback = match self.defaults.lock() {
            Ok(defaults) => defaults.get(mode).cloned(),
            Err(poisoned) => poisoned.into_inner().get(mode).cloned(),
        };
        fallback.ok_or_else(|| GenerationError::UpstreamFailure {
            message: format!("no scripted response for mode `{mode}`"),
        })
    }
}

/// Validator fake returning queued verdicts or errors.
#[derive(Default)]
pub struct ScriptedValidator {
    verdicts: Mutex<VecDeque<Result<ValidationVerdict, ValidationServiceError>>>,
}

impl ScriptedValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_pass(&self) {
        self.push(Ok(ValidationVerdict {
            overall_passed: true,
            raw: json!({"overall_passed": true}),
        }));
    }

    pub fn push_fail(&self, raw: Value) {
        self.push(Ok(ValidationVerdict { overall_passed: false, raw }));
    }

    pub fn push_error(&self, message: &str) {
        self.push(Err(ValidationServiceError::Http { message: message.to_string() }));
    }

    fn push(&self, verdict: Result<ValidationVerdict, ValidationServiceError>) {
        match self.verdicts.lock() {
            Ok(mut verdicts) => verdicts.push_back(verdict),
            Err(poisoned) => poisoned.into_inner().push_back(verdict),
        }
    }
}

#[async_trait]
impl ResponseValidator for ScriptedValidator {
    async fn validate(&self, _reply: &str) -> Result<ValidationVerdict, ValidationServiceError> {
        let queued = match self.verdicts.lock() {
            Ok(mut verdicts) => verdicts.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };
        queued.unwrap_or_else(|| {
            Err(ValidationServiceError::Http {
                message: "no scripted verdict queued".to_string(),
            })
        })
    }
}
