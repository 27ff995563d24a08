pub mod webhook;

use alloy::primitives::Address;
use async_trait::async_trait;

use crate::events::types::EventKind;
use crate::handler::{Notifier, Payload};

pub use webhook::WebhookNotifier;

/// Notifier that only writes the notification to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, user: Address, kind: EventKind, payload: &Payload) -> eyre::Result<()> {
        tracing::info!(
            %user,
            event = kind.as_str(),
            payload = %serde_json::Value::Object(payload.clone()),
            "Sending notification"
        );
        Ok(())
    }
}
