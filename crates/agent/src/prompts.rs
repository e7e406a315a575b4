//! Shared prompt-section builders.
//!
//! Every prompt-constructing stage renders the optional procedure and the
//! accumulated evidence the same way, so the formatting lives here rather
//! than in each stage.

use caseflow_core::state::{EvidenceStore, Procedure};
use caseflow_mcp::ToolDescriptor;
use serde_json::Value;

/// Render the procedure block for a prompt. Empty string when no procedure
/// was selected, so templates can interpolate it unconditionally.
pub fn render_procedure_section(procedure: Option<&Procedure>) -> String {
    let Some(procedure) = procedure else { return String::new() };

    let mut text = String::from("INTERNAL PROCEDURE GUIDANCE:\n");
    text.push_str("An internal procedure applies to this scenario.\n\n");
    text.push_str(&format!("Title: {}\n\n", procedure.title));
    if !procedure.reasoning.is_empty() {
        text.push_str(&format!("Why this procedure was selected: {}\n\n", procedure.reasoning));
    }
    text.push_str(&format!("Procedure details:\n{}\n\n", procedure.content));
    text.push_str("Follow the procedure's steps and use all tools it requires.");
    text
}

/// Tool listing for the plan prompt: name, description, and parameters from
/// the declared input schema.
pub fn summarize_tool_listing(tools: &[ToolDescriptor]) -> String {
    if tools.is_empty() {
        return "No tools available.".to_string();
    }

    let mut lines = Vec::new();
    for tool in tools {
        lines.push(format!("- {}: {}", tool.name, tool.description));
        let properties = tool.input_schema.get("properties").and_then(Value::as_object);
        let required: Vec<&str> = tool
            .input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|entries| entries.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        if let Some(properties) = properties {
            for (name, schema) in properties {
                let kind = schema.get("type").and_then(Value::as_str).unwrap_or("any");
                let requirement =
                    if required.contains(&name.as_str()) { "required" } else { "optional" };
                lines.push(format!("    {name} ({kind}, {requirement})"));
            }
        }
    }
    lines.join("\n")
}

/// Evidence sections shared by the coverage and draft prompts.
pub fn summarize_evidence(evidence: &EvidenceStore) -> String {
    let mut parts = Vec::new();

    if evidence.tool_data.is_empty() {
        parts.push("TOOL DATA: None available".to_string());
    } else {
        parts.push("TOOL DATA:".to_string());
        for (tool_name, data) in &evidence.tool_data {
            parts.push(format!("\n{tool_name}:"));
            parts.push(pretty(data));
        }
    }

    if evidence.docs_data.is_empty() {
        parts.push("\nDOCS DATA: None available".to_string());
    } else {
        parts.push("\nDOCS DATA:".to_string());
        for (key, data) in &evidence.docs_data {
            parts.push(format!("\nQuery: '{key}'"));
            parts.push(pretty(data));
        }
    }

    parts.join("\n")
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Extract the first JSON object from LLM output. Tolerates code fences and
/// prose around the object; returns `None` when nothing parses.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    let without_fence = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim);
    if let Some(body) = without_fence {
        if let Ok(value) = serde_json::from_str::<Value>(body) {
            return Some(value);
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use caseflow_core::state::{EvidenceStore, Procedure};
    use caseflow_mcp::ToolDescriptor;
    use serde_json::json;

    use super::{extract_json, render_procedure_section, summarize_evidence, summarize_tool_listing};

    #[test]
    fn procedure_section_is_empty_without_selection() {
        assert_eq!(render_procedure_section(None), "");
    }

    #[test]
    fn procedure_section_carries_title_reasoning_and_content() {
        let procedure = Procedure {
            title: "Referral bonus payout".to_string(),
            reasoning: "conversation asks about a referral bonus".to_string(),
            content: "1. Look up referrals. 2. Check payout schedule.".to_string(),
        };
        let section = render_procedure_section(Some(&procedure));
        assert!(section.contains("Title: Referral bonus payout"));
        assert!(section.contains("conversation asks about a referral bonus"));
        assert!(section.contains("Check payout schedule"));
    }

    #[test]
    fn tool_listing_shows_parameters_with_requirement() {
        let tools = vec![ToolDescriptor {
            name: "get_applications".to_string(),
            description: "List a user's applications".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {"email": {"type": "string"}, "limit": {"type": "integer"}},
                "required": ["email"]
            }),
        }];
        let listing = summarize_tool_listing(&tools);
        assert!(listing.contains("- get_applications: List a user's applications"));
        assert!(listing.contains("email (string, required)"));
        assert!(listing.contains("limit (integer, optional)"));
    }

    #[test]
    fn evidence_summary_marks_missing_sections() {
        let summary = summarize_evidence(&EvidenceStore::default());
        assert!(summary.contains("TOOL DATA: None available"));
        assert!(summary.contains("DOCS DATA: None available"));
    }

    #[test]
    fn evidence_summary_includes_keys_and_content() {
        let mut evidence = EvidenceStore::default();
        evidence.merge_tool("get_applications", json!({"applications": []}));
        evidence.merge_docs("visa policy (hop 1)", json!({"results": [{"title": "Visas"}]}));

        let summary = summarize_evidence(&evidence);
        assert!(summary.contains("get_applications:"));
        assert!(summary.contains("Query: 'visa policy (hop 1)'"));
        assert!(summary.contains("Visas"));
    }

    #[test]
    fn json_is_extracted_from_fences_and_prose() {
        let fenced = "```json\n{\"query\": \"status\"}\n```";
        assert_eq!(extract_json(fenced), Some(json!({"query": "status"})));

        let prose = "Here is my plan:\n{\"tool_calls\": []}\nDone.";
        assert_eq!(extract_json(prose), Some(json!({"tool_calls": []})));

        assert_eq!(extract_json("no json here"), None);
    }
}
