//! Per-event side effects: update the lending ledger, then notify the user.

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;

use crate::error::HandlerError;
use crate::events::types::{EventKind, LendingEvent, LogEntry};

/// Payload handed to the notifier alongside the event type.
pub type Payload = Map<String, JsonValue>;

/// Domain state keyed by user, updated once per event.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Staked: add to the user's collateral balance.
    async fn increase_stake(&self, user: Address, amount: U256) -> eyre::Result<()>;

    /// Borrowed: open a new loan for the user.
    async fn create_loan(&self, user: Address, amount: U256) -> eyre::Result<()>;

    /// Repaid: pay down the user's open loans, closing the ones fully repaid.
    async fn record_repayment(&self, user: Address, amount: U256) -> eyre::Result<()>;

    /// Withdrawn: subtract from the user's collateral balance.
    async fn decrease_stake(&self, user: Address, amount: U256) -> eyre::Result<()>;
}

/// Delivers a user-facing event (email, push, webhook...).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user: Address, kind: EventKind, payload: &Payload) -> eyre::Result<()>;
}

/// Runs the persistence and notification effects for one event.
///
/// The effects are independent: a failed ledger update still gets a
/// notification attempt, and both failures are reported together.
pub struct LendingHandler {
    ledger: Arc<dyn LedgerStore>,
    notifier: Arc<dyn Notifier>,
}

impl LendingHandler {
    pub fn new(ledger: Arc<dyn LedgerStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { ledger, notifier }
    }

    pub async fn handle(&self, event: &LendingEvent) -> Result<(), HandlerError> {
        let kind = event.kind();
        let entry = event.entry();

        let persisted = self.persist(event).await;

        let payload = notification_payload(entry);
        let notified = self.notifier.notify(entry.user, kind, &payload).await;

        match (persisted, notified) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(p), Ok(())) => Err(HandlerError::Persistence {
                kind,
                user: entry.user,
                amount: entry.amount,
                reason: error_chain(&p),
            }),
            (Ok(()), Err(n)) => Err(HandlerError::Notification {
                kind,
                user: entry.user,
                amount: entry.amount,
                reason: error_chain(&n),
            }),
            (Err(p), Err(n)) => Err(HandlerError::Both {
                kind,
                user: entry.user,
                amount: entry.amount,
                persistence: error_chain(&p),
                notification: error_chain(&n),
            }),
        }
    }

    async fn persist(&self, event: &LendingEvent) -> eyre::Result<()> {
        match event {
            LendingEvent::Staked(e) => {
                tracing::info!(user = %e.user, amount = %e.amount, "User staked ETH");
                self.ledger.increase_stake(e.user, e.amount).await
            }
            LendingEvent::Borrowed(e) => {
                tracing::info!(user = %e.user, amount = %e.amount, "User borrowed USD");
                self.ledger.create_loan(e.user, e.amount).await
            }
            LendingEvent::Repaid(e) => {
                tracing::info!(user = %e.user, amount = %e.amount, "User repaid USD");
                self.ledger.record_repayment(e.user, e.amount).await
            }
            LendingEvent::Withdrawn(e) => {
                tracing::info!(user = %e.user, amount = %e.amount, "User withdrew ETH collateral");
                self.ledger.decrease_stake(e.user, e.amount).await
            }
        }
    }
}

/// `{"amount": "<decimal>"}`. Amounts are strings so 256-bit values survive JSON.
pub fn notification_payload(entry: &LogEntry) -> Payload {
    let mut payload = Map::new();
    payload.insert(
        "amount".to_string(),
        JsonValue::String(entry.amount.to_string()),
    );
    payload
}

fn error_chain(report: &eyre::Report) -> String {
    report
        .chain()
        .map(|cause| cause.to_string())
        .collect::<Vec<_>>()
        .join(": ")
}
