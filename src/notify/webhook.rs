use alloy::primitives::Address;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Url};
use serde::Serialize;
use std::time::Duration;

use crate::events::types::EventKind;
use crate::handler::{Notifier, Payload};

#[derive(Debug, Serialize)]
struct WebhookBody<'a> {
    user: String,
    event: &'static str,
    data: &'a Payload,
    sent_at: DateTime<Utc>,
}

/// POSTs each notification as JSON to a fixed URL.
///
/// Non-2xx responses and timeouts count as failures.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: Url,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout: Duration) -> eyre::Result<Self> {
        let url = Url::parse(url).map_err(|e| eyre::eyre!("Invalid webhook URL '{}': {}", url, e))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| eyre::eyre!("Failed to build HTTP client: {}", e))?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, user: Address, kind: EventKind, payload: &Payload) -> eyre::Result<()> {
        let body = WebhookBody {
            user: user.to_string(),
            event: kind.as_str(),
            data: payload,
            sent_at: Utc::now(),
        };

        self.client
            .post(self.url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| eyre::eyre!("Webhook request failed: {}", e))?
            .error_for_status()
            .map_err(|e| eyre::eyre!("Webhook rejected notification: {}", e))?;

        tracing::debug!(%user, event = kind.as_str(), "Webhook notification delivered");
        Ok(())
    }
}
