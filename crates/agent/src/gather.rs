//! Gather stage: execute the planned tool calls.
//!
//! Calls fan out concurrently and settle independently; one slow or failed
//! tool never blocks collection of the others. Results are merged into the
//! evidence store in a deterministic order (tool name, then plan position)
//! after every call has settled or timed out.

use std::sync::Arc;
use std::time::Duration;

use caseflow_core::state::{EvidenceStore, GatherRecord, PlanRecord, PlannedCall};
use caseflow_mcp::{ToolCatalogue, ToolError};
use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, warn};

pub struct GatherStage {
    catalogue: Arc<dyn ToolCatalogue>,
    call_timeout: Duration,
    docs_tool: String,
}

impl GatherStage {
    pub fn new(
        catalogue: Arc<dyn ToolCatalogue>,
        call_timeout: Duration,
        docs_tool: impl Into<String>,
    ) -> Self {
        Self { catalogue, call_timeout, docs_tool: docs_tool.into() }
    }

    pub async fn gather(
        &self,
        plan: &PlanRecord,
        hop_number: u32,
        evidence: &mut EvidenceStore,
    ) -> GatherRecord {
        if plan.tool_calls.is_empty() {
            debug!("no tool calls planned this hop");
            return GatherRecord { successful_tools: 0, failed_tools: 0 };
        }

        let mut join_set = JoinSet::new();
        for (position, call) in plan.tool_calls.iter().cloned().enumerate() {
            let catalogue = Arc::clone(&self.catalogue);
            let call_timeout = self.call_timeout;
            join_set.spawn(async move {
                let result = match tokio::time::timeout(
                    call_timeout,
                    catalogue.call_tool(&call.tool_name, &call.arguments),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ToolError::Timeout { tool: call.tool_name.clone() }),
                };
                (position, call, result)
            });
        }

        let planned = plan.tool_calls.len();
        let mut settled: Vec<(usize, PlannedCall, Result<Value, ToolError>)> = Vec::with_capacity(planned);
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(entry) => settled.push(entry),
                Err(error) => warn!(error = %error, "gather task failed to join"),
            }
        }

        // Join order is completion order; sort for a deterministic merge.
        settled.sort_by(|a, b| a.1.tool_name.cmp(&b.1.tool_name).then(a.0.cmp(&b.0)));

        let mut successful_tools = 0;
        let mut failed_tools = (planned - settled.len()) as u32;
        for (_, call, result) in settled {
            match result {
                Ok(data) => {
                    successful_tools += 1;
                    self.merge(evidence, &call, data, hop_number);
                }
                Err(error) => {
                    failed_tools += 1;
                    warn!(tool = %call.tool_name, kind = error.kind(), error = %error, "tool call failed");
                }
            }
        }

        debug!(successful_tools, failed_tools, hop_number, "gather complete");
        GatherRecord { successful_tools, failed_tools }
    }

    fn merge(&self, evidence: &mut EvidenceStore, call: &PlannedCall, data: Value, hop_number: u32) {
        if call.tool_name == self.docs_tool {
            // Docs results for the same query in later hops get their own
            // key instead of clobbering the earlier hop's results.
            let query = call
                .arguments
                .get("query")
                .and_then(Value::as_str)
                .or_else(|| data.get("query").and_then(Value::as_str))
                .unwrap_or("unknown_query")
                .to_string();
            evidence.merge_docs(format!("{query} (hop {hop_number})"), data);
        } else {
            evidence.merge_tool(call.tool_name.clone(), data);
        }
    }
}
