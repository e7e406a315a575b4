//! Procedure selection.
//!
//! Runs once per conversation, before the first Plan. Three steps: generate
//! a search query from the conversation, fetch top-k candidates from the
//! procedure index through the tool catalogue, and have the LLM judge
//! whether one of them applies. Any failure degrades to "no procedure" -
//! selection is optional and never fatal to the run.

use std::sync::Arc;

use caseflow_core::state::Procedure;
use caseflow_core::templates::{names, TemplateError, TemplateStore};
use caseflow_mcp::{ToolCatalogue, ToolError};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::llm::{GenerationError, LlmClient};
use crate::prompts::extract_json;

#[derive(Debug, Error)]
enum SelectionError {
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error("selector output was malformed: {0}")]
    Malformed(String),
}

#[derive(Debug, Deserialize)]
struct CandidateProcedure {
    #[serde(default)]
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
}

pub struct ProcedureSelector {
    llm: Arc<dyn LlmClient>,
    catalogue: Arc<dyn ToolCatalogue>,
    templates: Arc<TemplateStore>,
    procedure_tool: String,
    top_k: u32,
}

impl ProcedureSelector {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        catalogue: Arc<dyn ToolCatalogue>,
        templates: Arc<TemplateStore>,
        procedure_tool: impl Into<String>,
        top_k: u32,
    ) -> Self {
        Self { llm, catalogue, templates, procedure_tool: procedure_tool.into(), top_k }
    }

    /// Select a procedure for this conversation, or none.
    pub async fn select(&self, conversation_history: &str) -> Option<Procedure> {
        match self.try_select(conversation_history).await {
            Ok(selection) => selection,
            Err(error) => {
                warn!(error = %error, "procedure selection failed; continuing without one");
                None
            }
        }
    }

    async fn try_select(
        &self,
        conversation_history: &str,
    ) -> Result<Option<Procedure>, SelectionError> {
        let query = self.generate_query(conversation_history).await?;
        debug!(query = %query, "procedure search query generated");

        let candidates = self.fetch_candidates(&query).await?;
        if candidates.is_empty() {
            debug!("procedure index returned no candidates");
            return Ok(None);
        }

        self.evaluate_candidates(conversation_history, candidates).await
    }

    async fn generate_query(&self, conversation_history: &str) -> Result<String, SelectionError> {
        let bindings = [("conversation_history".to_string(), conversation_history.to_string())]
            .into_iter()
            .collect();
        let prompt = self.templates.render(names::PROCEDURE_QUERY, &bindings)?;
        let raw = self.llm.generate(&prompt, "procedure").await?;

        let parsed = extract_json(&raw)
            .ok_or_else(|| SelectionError::Malformed("query output is not JSON".to_string()))?;
        parsed
            .get("query")
            .and_then(Value::as_str)
            .filter(|query| !query.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| SelectionError::Malformed("query field missing or empty".to_string()))
    }

    async fn fetch_candidates(&self, query: &str) -> Result<Vec<CandidateProcedure>, SelectionError> {
        let result = self
            .catalogue
            .call_tool(&self.procedure_tool, &json!({"query": query, "top_k": self.top_k}))
            .await?;

        let from_field = result.get("procedures").and_then(Value::as_array).cloned();
        let raw_candidates = match from_field {
            Some(items) => items,
            None => match result {
                Value::Array(items) => items,
                _ => Vec::new(),
            },
        };

        let candidates = raw_candidates
            .into_iter()
            .filter_map(|item| serde_json::from_value::<CandidateProcedure>(item).ok())
            .filter(|candidate| !candidate.content.is_empty())
            .collect();
        Ok(candidates)
    }

    async fn evaluate_candidates(
        &self,
        conversation_history: &str,
        candidates: Vec<CandidateProcedure>,
    ) -> Result<Option<Procedure>, SelectionError> {
        let candidates_text = candidates
            .iter()
            .enumerate()
            .map(|(index, candidate)| {
                format!(
                    "[{index}] {} ({})\n{}",
                    candidate.title, candidate.id, candidate.content
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let bindings = [
            ("conversation_history".to_string(), conversation_history.to_string()),
            ("candidates".to_string(), candidates_text),
        ]
        .into_iter()
        .collect();
        let prompt = self.templates.render(names::PROCEDURE_MATCH, &bindings)?;
        let raw = self.llm.generate(&prompt, "procedure").await?;

        let parsed = extract_json(&raw)
            .ok_or_else(|| SelectionError::Malformed("match output is not JSON".to_string()))?;
        let is_match = parsed.get("is_match").and_then(Value::as_bool).unwrap_or(false);
        let index = parsed.get("selected_index").and_then(Value::as_i64).unwrap_or(-1);
        let reasoning =
            parsed.get("reasoning").and_then(Value::as_str).unwrap_or_default().to_string();

        if !is_match || index < 0 || index as usize >= candidates.len() {
            debug!(is_match, index, "no procedure matched the conversation");
            return Ok(None);
        }

        let selected = &candidates[index as usize];
        Ok(Some(Procedure {
            title: if selected.title.is_empty() {
                selected.id.clone()
            } else {
                selected.title.clone()
            },
            reasoning,
            content: selected.content.clone(),
        }))
    }
}
