//! Plan stage: decide which tools to call this hop.

use std::collections::BTreeSet;
use std::sync::Arc;

use caseflow_core::state::{ConversationState, PlanRecord, PlannedCall};
use caseflow_core::templates::{names, TemplateError, TemplateStore};
use caseflow_mcp::ToolDescriptor;
use serde_json::Value;
use tracing::{debug, warn};

use crate::llm::LlmClient;
use crate::prompts::{
    extract_json, render_procedure_section, summarize_evidence, summarize_tool_listing,
};

pub struct PlanStage {
    llm: Arc<dyn LlmClient>,
    templates: Arc<TemplateStore>,
}

impl PlanStage {
    pub fn new(llm: Arc<dyn LlmClient>, templates: Arc<TemplateStore>) -> Self {
        Self { llm, templates }
    }

    /// Produce the ordered tool-call list for the current hop.
    ///
    /// Malformed or failed LLM output is retried once locally; a second
    /// failure degrades to an empty call list so Coverage can decide from
    /// the evidence already gathered. Tools absent from the catalogue
    /// listing are dropped before Gather ever sees them. Template errors
    /// are fatal configuration errors and propagate.
    pub async fn plan(
        &self,
        state: &ConversationState,
        tools: &[ToolDescriptor],
    ) -> Result<PlanRecord, TemplateError> {
        let bindings = [
            ("conversation_history".to_string(), state.conversation_history.clone()),
            ("user_details".to_string(), state.user_details.clone()),
            ("procedure".to_string(), render_procedure_section(state.procedure())),
            ("available_tools".to_string(), summarize_tool_listing(tools)),
            ("available_data".to_string(), summarize_evidence(&state.evidence)),
        ]
        .into_iter()
        .collect();
        let prompt = self.templates.render(names::PLAN, &bindings)?;

        let mut record = match self.attempt(&prompt).await {
            Some(record) => record,
            None => {
                warn!("plan output was unusable; retrying once");
                match self.attempt(&prompt).await {
                    Some(record) => record,
                    None => {
                        warn!("plan retry also failed; continuing with an empty tool list");
                        PlanRecord {
                            reasoning: "plan output was malformed twice; proceeding without new tool calls".to_string(),
                            tool_calls: Vec::new(),
                        }
                    }
                }
            }
        };

        let listed: BTreeSet<&str> = tools.iter().map(|tool| tool.name.as_str()).collect();
        record.tool_calls.retain(|call| {
            let known = listed.contains(call.tool_name.as_str());
            if !known {
                warn!(tool = %call.tool_name, "dropping planned call to unlisted tool");
            }
            known
        });

        debug!(tool_calls = record.tool_calls.len(), "plan produced");
        Ok(record)
    }

    async fn attempt(&self, prompt: &str) -> Option<PlanRecord> {
        let raw = match self.llm.generate(prompt, "plan").await {
            Ok(raw) => raw,
            Err(error) => {
                warn!(error = %error, "plan generation failed");
                return None;
            }
        };
        parse_plan(&raw)
    }
}

fn parse_plan(raw: &str) -> Option<PlanRecord> {
    let parsed = extract_json(raw)?;
    let reasoning = parsed.get("reasoning").and_then(Value::as_str).unwrap_or_default().to_string();
    let calls = parsed.get("tool_calls")?.as_array()?;

    let mut tool_calls = Vec::with_capacity(calls.len());
    for call in calls {
        let tool_name = call.get("tool_name").and_then(Value::as_str)?.to_string();
        // Some models emit "parameters" instead of "arguments".
        let arguments = call
            .get("arguments")
            .or_else(|| call.get("parameters"))
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()));
        let reasoning =
            call.get("reasoning").and_then(Value::as_str).unwrap_or_default().to_string();
        tool_calls.push(PlannedCall { tool_name, arguments, reasoning });
    }

    Some(PlanRecord { reasoning, tool_calls })
}

#[cfg(test)]
mod tests {
    use super::parse_plan;

    #[test]
    fn plan_json_parses_with_arguments_key() {
        let raw = r#"{"reasoning": "fetch status", "tool_calls": [
            {"tool_name": "get_applications", "arguments": {"email": "a@b.c"}, "reasoning": "status"}
        ]}"#;
        let record = parse_plan(raw).expect("parses");
        assert_eq!(record.tool_calls.len(), 1);
        assert_eq!(record.tool_calls[0].tool_name, "get_applications");
        assert_eq!(record.tool_calls[0].arguments["email"], "a@b.c");
    }

    #[test]
    fn plan_json_accepts_parameters_alias() {
        let raw = r#"{"reasoning": "r", "tool_calls": [
            {"tool_name": "search_docs", "parameters": {"query": "visa"}, "reasoning": "docs"}
        ]}"#;
        let record = parse_plan(raw).expect("parses");
        assert_eq!(record.tool_calls[0].arguments["query"], "visa");
    }

    #[test]
    fn missing_tool_calls_array_is_malformed() {
        assert!(parse_plan(r#"{"reasoning": "no calls"}"#).is_none());
        assert!(parse_plan("not json at all").is_none());
    }

    #[test]
    fn empty_tool_calls_is_a_valid_plan() {
        let record = parse_plan(r#"{"reasoning": "nothing needed", "tool_calls": []}"#).expect("parses");
        assert!(record.tool_calls.is_empty());
    }
}
