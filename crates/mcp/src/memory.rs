use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::{validate_arguments, ToolCatalogue, ToolDescriptor, ToolError};

type ToolHandler = Box<dyn Fn(&Value) -> Result<Value, ToolError> + Send + Sync>;

/// In-memory catalogue for tests and offline runs. Registered handlers are
/// invoked with schema-validated arguments; calls are recorded for
/// assertions.
#[derive(Default)]
pub struct InMemoryToolCatalogue {
    tools: Vec<ToolDescriptor>,
    handlers: HashMap<String, ToolHandler>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl InMemoryToolCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, descriptor: ToolDescriptor, handler: F)
    where
        F: Fn(&Value) -> Result<Value, ToolError> + Send + Sync + 'static,
    {
        self.handlers.insert(descriptor.name.clone(), Box::new(handler));
        self.tools.push(descriptor);
    }

    /// Calls observed so far, in invocation order.
    pub fn calls(&self) -> Vec<(String, Value)> {
        match self.calls.lock() {
            Ok(calls) => calls.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn record(&self, name: &str, arguments: &Value) {
        let entry = (name.to_string(), arguments.clone());
        match self.calls.lock() {
            Ok(mut calls) => calls.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }
}

#[async_trait]
impl ToolCatalogue for InMemoryToolCatalogue {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError> {
        Ok(self.tools.clone())
    }

    async fn call_tool(&self, name: &str, arguments: &Value) -> Result<Value, ToolError> {
        self.record(name, arguments);

        let descriptor = self
            .tools
            .iter()
            .find(|tool| tool.name == name)
            .ok_or_else(|| ToolError::NotFound { tool: name.to_string() })?;
        validate_arguments(descriptor, arguments)?;

        let handler = self
            .handlers
            .get(name)
            .ok_or_else(|| ToolError::NotFound { tool: name.to_string() })?;
        handler(arguments)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::InMemoryToolCatalogue;
    use crate::{ToolCatalogue, ToolDescriptor, ToolError};

    fn catalogue_with_lookup() -> InMemoryToolCatalogue {
        let mut catalogue = InMemoryToolCatalogue::new();
        catalogue.register(
            ToolDescriptor {
                name: "get_applications".to_string(),
                description: "List applications".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {"email": {"type": "string"}},
                    "required": ["email"]
                }),
            },
            |arguments| {
                Ok(json!({
                    "applications": [{"role": "Backend Engineer", "status": "in_review"}],
                    "email": arguments["email"],
                }))
            },
        );
        catalogue
    }

    #[tokio::test]
    async fn registered_tool_executes_with_valid_arguments() {
        let catalogue = catalogue_with_lookup();
        let result = catalogue
            .call_tool("get_applications", &json!({"email": "dana@example.com"}))
            .await
            .expect("call succeeds");
        assert_eq!(result["applications"][0]["status"], "in_review");
        assert_eq!(catalogue.calls().len(), 1);
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let catalogue = catalogue_with_lookup();
        let error = catalogue.call_tool("missing_tool", &json!({})).await.expect_err("must fail");
        assert!(matches!(error, ToolError::NotFound { .. }));
    }

    #[tokio::test]
    async fn schema_mismatch_is_rejected_before_the_handler_runs() {
        let catalogue = catalogue_with_lookup();
        let error = catalogue
            .call_tool("get_applications", &json!({"email": 12}))
            .await
            .expect_err("must fail");
        assert!(matches!(error, ToolError::InvalidArguments { .. }));
    }
}
