//! Draft stage: compose the generation prompt and produce a candidate
//! response.

use std::sync::Arc;

use caseflow_core::state::ConversationState;
use caseflow_core::templates::{ResponseMode, TemplateError, TemplateStore};
use thiserror::Error;
use tracing::debug;

use crate::llm::{generate_with_retry, GenerationError, LlmClient, RetryPolicy};
use crate::prompts::{render_procedure_section, summarize_evidence};

#[derive(Debug, Error)]
pub enum DraftError {
    /// A template/placeholder mismatch. Fatal configuration error for the
    /// run; never silently dropped.
    #[error(transparent)]
    Template(#[from] TemplateError),
    /// Generation failed even after bounded call-site retries.
    #[error(transparent)]
    Generation(#[from] GenerationError),
}

/// Observability payload returned alongside the candidate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DraftDebug {
    pub prompt_chars: usize,
    pub has_feedback: bool,
    pub has_procedure: bool,
    pub has_coverage_reasoning: bool,
    pub tool_count: usize,
    pub docs_count: usize,
}

#[derive(Clone, Debug)]
pub struct DraftOutcome {
    pub response: String,
    pub debug: DraftDebug,
}

pub struct DraftStage {
    llm: Arc<dyn LlmClient>,
    templates: Arc<TemplateStore>,
    mode: ResponseMode,
    retry: RetryPolicy,
}

impl DraftStage {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        templates: Arc<TemplateStore>,
        mode: ResponseMode,
        retry: RetryPolicy,
    ) -> Self {
        Self { llm, templates, mode, retry }
    }

    pub async fn draft(&self, state: &ConversationState) -> Result<DraftOutcome, DraftError> {
        let feedback = state.retry_feedback();
        let coverage_reasoning = state.latest_coverage_analysis();

        let mut summary_lines = Vec::new();
        if let Some(analysis) = coverage_reasoning {
            summary_lines.push(format!("Coverage analysis: {analysis}"));
        }
        if let Some(attempt) = feedback {
            let raw = serde_json::to_string_pretty(&attempt.validation_response)
                .unwrap_or_else(|_| attempt.validation_response.to_string());
            summary_lines.push(format!(
                "VALIDATION FEEDBACK (RETRY ATTEMPT): your previous response failed validation. \
                 Address these issues before anything else:\n{raw}"
            ));
        }
        summary_lines.push(format!(
            "Evidence: {} tool results, {} docs results",
            state.evidence.tool_count(),
            state.evidence.docs_count()
        ));

        let data_summary =
            format!("{}\n\n{}", summary_lines.join("\n"), summarize_evidence(&state.evidence));

        let bindings = [
            ("conversation_history".to_string(), state.conversation_history.clone()),
            ("user_details".to_string(), state.user_details.clone()),
            ("procedure".to_string(), render_procedure_section(state.procedure())),
            ("data_summary".to_string(), data_summary),
        ]
        .into_iter()
        .collect();
        let prompt = self.templates.render(self.mode.template_name(), &bindings)?;

        let draft_debug = DraftDebug {
            prompt_chars: prompt.chars().count(),
            has_feedback: feedback.is_some(),
            has_procedure: state.procedure().is_some(),
            has_coverage_reasoning: coverage_reasoning.is_some(),
            tool_count: state.evidence.tool_count(),
            docs_count: state.evidence.docs_count(),
        };
        debug!(
            prompt_chars = draft_debug.prompt_chars,
            has_feedback = draft_debug.has_feedback,
            has_procedure = draft_debug.has_procedure,
            "draft prompt composed"
        );

        let response =
            generate_with_retry(self.llm.as_ref(), &prompt, self.mode.as_str(), &self.retry).await?;
        Ok(DraftOutcome { response, debug: draft_debug })
    }
}
