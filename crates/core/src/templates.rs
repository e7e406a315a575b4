//! Prompt template store with a strict placeholder contract.
//!
//! Every template declares its placeholders (parsed from the body), and
//! rendering enforces the contract both ways: a declared placeholder with
//! no supplied binding fails, and a supplied binding with no matching
//! placeholder fails. Stage prompt contracts are validated once at engine
//! construction so a broken template surfaces at startup, not mid-run.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unknown template `{name}`")]
    UnknownTemplate { name: String },
    #[error("template `{template}` declares placeholder `{placeholder}` but no binding was supplied")]
    MissingPlaceholderBinding { template: String, placeholder: String },
    #[error("binding `{binding}` has no matching placeholder in template `{template}`")]
    UndeclaredPlaceholder { template: String, binding: String },
    #[error("template `{template}` failed to render: {message}")]
    Render { template: String, message: String },
    #[error("template override file is not valid TOML: {0}")]
    InvalidOverrideFile(String),
}

/// Response channel for the drafted reply. Closed enumeration: every mode
/// maps to a draft template by a total function, so an unknown mode is a
/// configuration error at parse time, never a runtime branch miss.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    #[default]
    Ticket,
    Slack,
}

impl ResponseMode {
    pub fn template_name(self) -> &'static str {
        match self {
            Self::Ticket => names::DRAFT_TICKET,
            Self::Slack => names::DRAFT_SLACK,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ticket => "ticket",
            Self::Slack => "slack",
        }
    }
}

impl std::str::FromStr for ResponseMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ticket" => Ok(Self::Ticket),
            "slack" => Ok(Self::Slack),
            other => Err(format!("unsupported response mode `{other}` (expected ticket|slack)")),
        }
    }
}

/// Well-known template names.
pub mod names {
    pub const PLAN: &str = "plan";
    pub const COVERAGE: &str = "coverage";
    pub const DRAFT_TICKET: &str = "draft_ticket";
    pub const DRAFT_SLACK: &str = "draft_slack";
    pub const PROCEDURE_QUERY: &str = "procedure_query";
    pub const PROCEDURE_MATCH: &str = "procedure_match";
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptTemplate {
    name: String,
    body: String,
    placeholders: BTreeSet<String>,
}

impl PromptTemplate {
    pub fn parse(name: impl Into<String>, body: impl Into<String>) -> Self {
        let name = name.into();
        let body = body.into();
        let placeholders = extract_placeholders(&body);
        Self { name, body, placeholders }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn placeholders(&self) -> &BTreeSet<String> {
        &self.placeholders
    }
}

#[derive(Clone, Debug)]
pub struct TemplateStore {
    templates: BTreeMap<String, PromptTemplate>,
}

impl TemplateStore {
    pub fn empty() -> Self {
        Self { templates: BTreeMap::new() }
    }

    /// Store pre-loaded with the default template set for every stage.
    pub fn builtin() -> Self {
        let mut store = Self::empty();
        store.set(names::PLAN, PLAN_TEMPLATE);
        store.set(names::COVERAGE, COVERAGE_TEMPLATE);
        store.set(names::DRAFT_TICKET, DRAFT_TICKET_TEMPLATE);
        store.set(names::DRAFT_SLACK, DRAFT_SLACK_TEMPLATE);
        store.set(names::PROCEDURE_QUERY, PROCEDURE_QUERY_TEMPLATE);
        store.set(names::PROCEDURE_MATCH, PROCEDURE_MATCH_TEMPLATE);
        store
    }

    /// Insert or replace a template; placeholders are re-parsed from the body.
    pub fn set(&mut self, name: impl Into<String>, body: impl Into<String>) {
        let name = name.into();
        let template = PromptTemplate::parse(name.clone(), body);
        self.templates.insert(name, template);
    }

    /// Apply operator overrides from a TOML document of `name = "body"` pairs.
    pub fn apply_overrides_toml(&mut self, raw: &str) -> Result<(), TemplateError> {
        let overrides: BTreeMap<String, String> =
            toml::from_str(raw).map_err(|error| TemplateError::InvalidOverrideFile(error.to_string()))?;
        for (name, body) in overrides {
            self.set(name, body);
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&PromptTemplate, TemplateError> {
        self.templates
            .get(name)
            .ok_or_else(|| TemplateError::UnknownTemplate { name: name.to_string() })
    }

    /// Render with the strict two-way contract.
    pub fn render(
        &self,
        name: &str,
        bindings: &BTreeMap<String, String>,
    ) -> Result<String, TemplateError> {
        let template = self.get(name)?;

        for placeholder in &template.placeholders {
            if !bindings.contains_key(placeholder) {
                return Err(TemplateError::MissingPlaceholderBinding {
                    template: template.name.clone(),
                    placeholder: placeholder.clone(),
                });
            }
        }
        for binding in bindings.keys() {
            if !template.placeholders.contains(binding) {
                return Err(TemplateError::UndeclaredPlaceholder {
                    template: template.name.clone(),
                    binding: binding.clone(),
                });
            }
        }

        let mut context = tera::Context::new();
        for (key, value) in bindings {
            context.insert(key, value);
        }
        tera::Tera::one_off(&template.body, &context, false).map_err(|error| {
            TemplateError::Render { template: template.name.clone(), message: error.to_string() }
        })
    }

    /// Check that a template declares exactly the expected placeholders.
    /// Used at startup so a misconfigured template never fails first-use.
    pub fn validate_contract(&self, name: &str, expected: &[&str]) -> Result<(), TemplateError> {
        let template = self.get(name)?;
        let expected_set: BTreeSet<String> =
            expected.iter().map(|placeholder| placeholder.to_string()).collect();

        for placeholder in &expected_set {
            if !template.placeholders.contains(placeholder) {
                return Err(TemplateError::MissingPlaceholderBinding {
                    template: template.name.clone(),
                    placeholder: placeholder.clone(),
                });
            }
        }
        for placeholder in &template.placeholders {
            if !expected_set.contains(placeholder) {
                return Err(TemplateError::UndeclaredPlaceholder {
                    template: template.name.clone(),
                    binding: placeholder.clone(),
                });
            }
        }
        Ok(())
    }
}

impl Default for TemplateStore {
    fn default() -> Self {
        Self::builtin()
    }
}

fn extract_placeholders(body: &str) -> BTreeSet<String> {
    let mut placeholders = BTreeSet::new();
    let mut rest = body;
    while let Some(open) = rest.find("{{") {
        let after = &rest[open + 2..];
        let Some(close) = after.find("}}") else { break };
        let candidate = after[..close].trim();
        if !candidate.is_empty()
            && candidate.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        {
            placeholders.insert(candidate.to_string());
        }
        rest = &after[close + 2..];
    }
    placeholders
}

const PLAN_TEMPLATE: &str = "\
You are a support agent planning which tools to call to answer a job-application inquiry.

{{ procedure }}

CONVERSATION:
{{ conversation_history }}

USER DETAILS:
{{ user_details }}

AVAILABLE TOOLS:
{{ available_tools }}

DATA GATHERED SO FAR:
{{ available_data }}

Decide which tools to call this hop. Only use tools from the list above. Respond with a
single JSON object: {\"reasoning\": string, \"tool_calls\": [{\"tool_name\": string,
\"arguments\": object, \"reasoning\": string}]}. Return an empty tool_calls array if no
further data is needed.
";

const COVERAGE_TEMPLATE: &str = "\
You are judging whether the evidence gathered so far suffices to answer the user's
job-application inquiry.

{{ procedure }}

CONVERSATION:
{{ conversation_history }}

USER DETAILS:
{{ user_details }}

AVAILABLE DATA:
{{ available_data }}

Respond with a single JSON object: {\"analysis\": string, \"sufficient\": boolean,
\"next_action\": \"continue\" | \"proceed\"}. Use \"continue\" only when another round of
tool calls is likely to surface data you are missing; otherwise \"proceed\".
";

const DRAFT_TICKET_TEMPLATE: &str = "\
You are a support agent replying to a job-application inquiry in the ticketing system.
Write a complete, polite reply grounded strictly in the data below. Do not invent
application details.

{{ procedure }}

CONVERSATION:
{{ conversation_history }}

USER DETAILS:
{{ user_details }}

AVAILABLE DATA:
{{ data_summary }}
";

const DRAFT_SLACK_TEMPLATE: &str = "\
You are a support agent replying to a job-application inquiry in a Slack thread. Keep the
reply short and conversational, grounded strictly in the data below. Do not invent
application details.

{{ procedure }}

CONVERSATION:
{{ conversation_history }}

USER DETAILS:
{{ user_details }}

AVAILABLE DATA:
{{ data_summary }}
";

const PROCEDURE_QUERY_TEMPLATE: &str = "\
Generate a short search query for the internal procedure index that would surface guidance
for handling this conversation.

CONVERSATION:
{{ conversation_history }}

Respond with a single JSON object: {\"query\": string, \"reasoning\": string}.
";

const PROCEDURE_MATCH_TEMPLATE: &str = "\
Decide whether one of the candidate procedures below applies to this conversation.

CONVERSATION:
{{ conversation_history }}

CANDIDATE PROCEDURES:
{{ candidates }}

Respond with a single JSON object: {\"is_match\": boolean, \"selected_index\": integer,
\"reasoning\": string}. Use selected_index -1 when nothing applies.
";
