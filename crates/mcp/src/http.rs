use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::{unwrap_text_content, validate_arguments, ToolCatalogue, ToolDescriptor, ToolError};

/// HTTP-backed tool catalogue.
///
/// Expects a server exposing `POST {base}/tools/list` and
/// `POST {base}/tools/call`; call errors come back as
/// `{"error": {"kind": ..., "message": ...}}`.
pub struct HttpToolCatalogue {
    http: reqwest::Client,
    base_url: String,
    auth_token: Option<SecretString>,
}

impl HttpToolCatalogue {
    pub fn new(
        base_url: impl Into<String>,
        auth_token: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, ToolError> {
        let http = reqwest::Client::builder().timeout(timeout).build().map_err(|error| {
            ToolError::UpstreamFailure { tool: "<client>".to_string(), message: error.to_string() }
        })?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { http, base_url, auth_token })
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.post(format!("{}{path}", self.base_url));
        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token.expose_secret());
        }
        builder
    }

    fn classify(tool: &str, error: reqwest::Error) -> ToolError {
        if error.is_timeout() {
            ToolError::Timeout { tool: tool.to_string() }
        } else {
            ToolError::UpstreamFailure { tool: tool.to_string(), message: error.to_string() }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListToolsResponse {
    tools: Vec<ToolDescriptor>,
}

#[derive(Debug, Deserialize)]
struct CallToolResponse {
    #[serde(default)]
    content: Option<Value>,
    #[serde(default)]
    error: Option<WireError>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    message: String,
}

impl WireError {
    fn into_tool_error(self, tool: &str) -> ToolError {
        let tool = tool.to_string();
        match self.kind.as_str() {
            "not_found" => ToolError::NotFound { tool },
            "invalid_arguments" => ToolError::InvalidArguments { tool, message: self.message },
            "timeout" => ToolError::Timeout { tool },
            _ => ToolError::UpstreamFailure { tool, message: self.message },
        }
    }
}

#[async_trait]
impl ToolCatalogue for HttpToolCatalogue {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError> {
        let response = self
            .request("/tools/list")
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|error| Self::classify("<list>", error))?
            .error_for_status()
            .map_err(|error| Self::classify("<list>", error))?;

        let listing: ListToolsResponse = response.json().await.map_err(|error| {
            ToolError::UpstreamFailure { tool: "<list>".to_string(), message: error.to_string() }
        })?;
        debug!(tool_count = listing.tools.len(), "tool listing fetched");
        Ok(listing.tools)
    }

    async fn call_tool(&self, name: &str, arguments: &Value) -> Result<Value, ToolError> {
        let listing = self.list_tools().await?;
        let descriptor = listing
            .iter()
            .find(|tool| tool.name == name)
            .ok_or_else(|| ToolError::NotFound { tool: name.to_string() })?;
        validate_arguments(descriptor, arguments)?;

        let response = self
            .request("/tools/call")
            .json(&serde_json::json!({"name": name, "arguments": arguments}))
            .send()
            .await
            .map_err(|error| Self::classify(name, error))?
            .error_for_status()
            .map_err(|error| Self::classify(name, error))?;

        let payload: CallToolResponse = response.json().await.map_err(|error| {
            ToolError::UpstreamFailure { tool: name.to_string(), message: error.to_string() }
        })?;

        if let Some(error) = payload.error {
            return Err(error.into_tool_error(name));
        }
        Ok(unwrap_text_content(payload.content.unwrap_or(Value::Null)))
    }
}
