use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

use crate::{ConversationData, TicketingClient, TicketingError};

/// HTTP ticketing client (Intercom-style REST surface).
///
/// With `dry_run` set, all write operations are skipped and reported as
/// successful, so test runs never touch the live conversation.
pub struct HttpTicketingClient {
    http: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    admin_id: Option<String>,
    dry_run: bool,
}

impl HttpTicketingClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: SecretString,
        admin_id: Option<String>,
        timeout: Duration,
        dry_run: bool,
    ) -> Result<Self, TicketingError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| TicketingError::Http { message: error.to_string() })?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { http, base_url, api_key, admin_id, dry_run })
    }

    fn classify(error: reqwest::Error) -> TicketingError {
        if error.is_timeout() {
            TicketingError::Timeout
        } else {
            TicketingError::Http { message: error.to_string() }
        }
    }
}

#[async_trait]
impl TicketingClient for HttpTicketingClient {
    async fn get_conversation(
        &self,
        conversation_id: &str,
        full: bool,
    ) -> Result<ConversationData, TicketingError> {
        let url = format!("{}/conversations/{conversation_id}", self.base_url);
        let response = self
            .http
            .get(url)
            .bearer_auth(self.api_key.expose_secret())
            .query(&[("full", full)])
            .send()
            .await
            .map_err(Self::classify)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(TicketingError::NotFound { conversation_id: conversation_id.to_string() });
        }
        let response = response.error_for_status().map_err(Self::classify)?;

        let conversation: ConversationData = response
            .json()
            .await
            .map_err(|error| TicketingError::Decode { message: error.to_string() })?;
        debug!(
            conversation_id,
            message_count = conversation.messages.len(),
            "conversation fetched"
        );
        Ok(conversation)
    }

    async fn add_note(&self, conversation_id: &str, text: &str) -> Result<(), TicketingError> {
        if self.dry_run {
            info!(conversation_id, "dry run: skipping ticketing note");
            return Ok(());
        }

        let url = format!("{}/conversations/{conversation_id}/notes", self.base_url);
        let body = serde_json::json!({
            "body": text,
            "admin_id": self.admin_id,
        });

        self.http
            .post(url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(Self::classify)?
            .error_for_status()
            .map_err(Self::classify)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::HttpTicketingClient;
    use crate::TicketingClient;

    #[tokio::test]
    async fn dry_run_skips_note_writes() {
        let client = HttpTicketingClient::new(
            "http://localhost:1", // unroutable on purpose
            "tok-test".to_string().into(),
            Some("admin-1".to_string()),
            Duration::from_millis(200),
            true,
        )
        .expect("client builds");

        // Would fail against the unroutable endpoint if the write happened.
        client.add_note("conv-1", "validation results").await.expect("dry run note is a no-op");
    }
}
