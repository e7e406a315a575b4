//! Coverage stage: judge whether the evidence suffices to draft an answer.

use std::sync::Arc;

use caseflow_core::state::{ConversationState, CoverageAction, CoverageRecord};
use caseflow_core::templates::{names, TemplateError, TemplateStore};
use serde_json::Value;
use tracing::{debug, warn};

use crate::llm::LlmClient;
use crate::prompts::{extract_json, render_procedure_section, summarize_evidence};

pub struct CoverageStage {
    llm: Arc<dyn LlmClient>,
    templates: Arc<TemplateStore>,
}

impl CoverageStage {
    pub fn new(llm: Arc<dyn LlmClient>, templates: Arc<TemplateStore>) -> Self {
        Self { llm, templates }
    }

    /// Assess coverage for the hop currently in progress.
    ///
    /// `Continue` is only legal while hops remain in the budget; on the
    /// final hop the verdict is forced to `Proceed` regardless of the
    /// judge's own view. Malformed judge output also degrades to `Proceed`,
    /// since the evidence on hand is all the run will get.
    pub async fn assess(
        &self,
        state: &ConversationState,
        plan_reasoning: &str,
    ) -> Result<CoverageRecord, TemplateError> {
        let hop_number = state.current_hop_number();
        let max_hops = state.limits().max_hops;

        let bindings = [
            ("conversation_history".to_string(), state.conversation_history.clone()),
            ("user_details".to_string(), state.user_details.clone()),
            ("procedure".to_string(), render_procedure_section(state.procedure())),
            (
                "available_data".to_string(),
                available_data(state, hop_number, max_hops, plan_reasoning),
            ),
        ]
        .into_iter()
        .collect();
        let prompt = self.templates.render(names::COVERAGE, &bindings)?;

        let mut record = match self.judge(&prompt).await {
            Some(record) => record,
            None => {
                warn!("coverage judgment unavailable; proceeding with gathered evidence");
                CoverageRecord {
                    analysis: "coverage judgment unavailable; proceeding with gathered evidence"
                        .to_string(),
                    next_action: CoverageAction::Proceed,
                }
            }
        };

        if record.next_action == CoverageAction::Continue && hop_number >= max_hops {
            debug!(hop_number, max_hops, "hop budget reached; forcing proceed");
            record.analysis.push_str(" [hop budget reached; proceeding with available evidence]");
            record.next_action = CoverageAction::Proceed;
        }

        Ok(record)
    }

    async fn judge(&self, prompt: &str) -> Option<CoverageRecord> {
        let raw = match self.llm.generate(prompt, "coverage").await {
            Ok(raw) => raw,
            Err(error) => {
                warn!(error = %error, "coverage generation failed");
                return None;
            }
        };
        parse_coverage(&raw)
    }
}

fn available_data(
    state: &ConversationState,
    hop_number: u32,
    max_hops: u32,
    plan_reasoning: &str,
) -> String {
    let mut parts = vec![format!("CURRENT HOP: {hop_number}/{max_hops}"), String::new()];
    if !plan_reasoning.is_empty() {
        parts.push("PLAN REASONING:".to_string());
        parts.push(format!("  {plan_reasoning}"));
        parts.push(String::new());
    }
    parts.push(summarize_evidence(&state.evidence));
    parts.join("\n")
}

fn parse_coverage(raw: &str) -> Option<CoverageRecord> {
    let parsed = extract_json(raw)?;
    let analysis = parsed
        .get("analysis")
        .or_else(|| parsed.get("reasoning"))
        .and_then(Value::as_str)?
        .to_string();
    let next_action = match parsed.get("next_action").and_then(Value::as_str)? {
        "continue" => CoverageAction::Continue,
        "proceed" => CoverageAction::Proceed,
        _ => return None,
    };
    Some(CoverageRecord { analysis, next_action })
}
