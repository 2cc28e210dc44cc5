use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::{Notifier, NotifyError};

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    recipient: &'a str,
    subject: &'a str,
    body: &'a str,
}

/// Pushes alerts as JSON to a configured webhook
pub struct WebhookNotifier {
    client: Client,
    url: url::Url,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, NotifyError> {
        let url = url::Url::parse(url)
            .map_err(|e| NotifyError::InvalidConfiguration(format!("invalid webhook URL: {e}")))?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        let payload = WebhookPayload { recipient, subject, body };
        let response = self.client.post(self.url.clone()).json(&payload).send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_body =
                response.text().await.unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(NotifyError::Rejected(format!(
                "webhook returned non-success status: {status}. Body: {error_body}"
            )));
        }

        Ok(())
    }
}
