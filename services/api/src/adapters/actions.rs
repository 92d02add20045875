//! services/api/src/adapters/actions.rs
//!
//! Completion actions: external consumers notified once a submission completes.
//! They implement the `CompletionAction` port from the `core` crate.

use async_trait::async_trait;
use form_submission_core::domain::CompletionEvent;
use form_submission_core::ports::{CompletionAction, PortError, PortResult};
use tracing::info;

/// Writes every completion to the service log.
#[derive(Clone, Default)]
pub struct LogAction;

#[async_trait]
impl CompletionAction for LogAction {
    fn name(&self) -> &str {
        "log"
    }

    async fn on_completed(&self, event: &CompletionEvent) -> PortResult<()> {
        info!(
            submission_id = %event.submission_id,
            form_id = %event.form_id,
            completed_at = %event.completed_at,
            "Form submission completed."
        );
        Ok(())
    }
}

/// POSTs the completion event as JSON to a configured URL.
#[derive(Clone)]
pub struct WebhookAction {
    client: reqwest::Client,
    url: String,
}

impl WebhookAction {
    /// Creates a new `WebhookAction`.
    pub fn new(client: reqwest::Client, url: String) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl CompletionAction for WebhookAction {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn on_completed(&self, event: &CompletionEvent) -> PortResult<()> {
        self.client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PortError::Unexpected(format!("Webhook delivery failed: {}", e)))?;
        Ok(())
    }
}
