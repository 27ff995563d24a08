//! Hand-written collaborators shared by the unit tests.

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use crate::error::SubscriptionError;
use crate::events::types::{EventKind, LogEntry};
use crate::handler::{LedgerStore, Notifier, Payload};
use crate::source::{BatchCallback, ChainEventSource, SubscriptionHandle};

pub type LedgerCall = (&'static str, Address, U256);
pub type NotifyCall = (Address, EventKind, Payload);

/// Records every ledger call; fails or panics on calls for one chosen user.
#[derive(Default)]
pub struct RecordingLedger {
    calls: Mutex<Vec<LedgerCall>>,
    fail_user: Option<Address>,
    panic_user: Option<Address>,
}

impl RecordingLedger {
    pub fn failing_for(user: Address) -> Self {
        Self {
            fail_user: Some(user),
            ..Self::default()
        }
    }

    pub fn panicking_for(user: Address) -> Self {
        Self {
            panic_user: Some(user),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<LedgerCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, action: &'static str, user: Address, amount: U256) -> eyre::Result<()> {
        self.calls.lock().unwrap().push((action, user, amount));
        if self.panic_user == Some(user) {
            panic!("ledger bug for {}", user);
        }
        if self.fail_user == Some(user) {
            return Err(eyre::eyre!("ledger unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for RecordingLedger {
    async fn increase_stake(&self, user: Address, amount: U256) -> eyre::Result<()> {
        self.record("increase_stake", user, amount)
    }

    async fn create_loan(&self, user: Address, amount: U256) -> eyre::Result<()> {
        self.record("create_loan", user, amount)
    }

    async fn record_repayment(&self, user: Address, amount: U256) -> eyre::Result<()> {
        self.record("record_repayment", user, amount)
    }

    async fn decrease_stake(&self, user: Address, amount: U256) -> eyre::Result<()> {
        self.record("decrease_stake", user, amount)
    }
}

/// Records notifications. Can fail every call, or hold calls for one user
/// until [`RecordingNotifier::release`] is called.
#[derive(Default)]
pub struct RecordingNotifier {
    calls: Mutex<Vec<NotifyCall>>,
    fail: bool,
    held_user: Option<Address>,
    gate: Option<Arc<Semaphore>>,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn holding(user: Address) -> Self {
        Self {
            held_user: Some(user),
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        }
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1024);
        }
    }

    pub fn calls(&self) -> Vec<NotifyCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, user: Address, kind: EventKind, payload: &Payload) -> eyre::Result<()> {
        if self.held_user == Some(user) {
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await?;
            }
        }

        self.calls
            .lock()
            .unwrap()
            .push((user, kind, payload.clone()));

        if self.fail {
            return Err(eyre::eyre!("notification channel down"));
        }
        Ok(())
    }
}

/// In-process event source. Batches are pushed by the test with [`MockSource::deliver`].
#[derive(Default)]
pub struct MockSource {
    next_id: AtomicU64,
    live: Mutex<HashMap<u64, (EventKind, BatchCallback)>>,
    /// Every callback ever registered, including cancelled ones.
    history: Mutex<Vec<(EventKind, BatchCallback)>>,
    subscribe_calls: AtomicUsize,
    cancel_calls: AtomicUsize,
    /// 1-based subscribe call that fails.
    fail_subscribe_on: Option<usize>,
    fail_cancel: bool,
}

impl MockSource {
    pub fn failing_subscribe_on(call: usize) -> Self {
        Self {
            fail_subscribe_on: Some(call),
            ..Self::default()
        }
    }

    pub fn failing_cancel() -> Self {
        Self {
            fail_cancel: true,
            ..Self::default()
        }
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    pub fn live_kinds(&self) -> Vec<EventKind> {
        self.live.lock().unwrap().values().map(|(k, _)| *k).collect()
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    /// Push a batch to every live subscription for `kind`.
    pub fn deliver(&self, kind: EventKind, batch: Vec<LogEntry>) {
        let callbacks: Vec<BatchCallback> = self
            .live
            .lock()
            .unwrap()
            .values()
            .filter(|(k, _)| *k == kind)
            .map(|(_, cb)| cb.clone())
            .collect();
        for cb in callbacks {
            cb(batch.clone());
        }
    }

    /// Push a batch through every callback ever registered for `kind`,
    /// simulating a source that keeps delivering after cancellation.
    pub fn deliver_stale(&self, kind: EventKind, batch: Vec<LogEntry>) {
        let callbacks: Vec<BatchCallback> = self
            .history
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, cb)| cb.clone())
            .collect();
        for cb in callbacks {
            cb(batch.clone());
        }
    }
}

#[async_trait]
impl ChainEventSource for MockSource {
    async fn subscribe(
        &self,
        _contract: Address,
        kind: EventKind,
        on_batch: BatchCallback,
    ) -> Result<SubscriptionHandle, SubscriptionError> {
        let call = self.subscribe_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_subscribe_on == Some(call) {
            return Err(SubscriptionError::Register {
                kind,
                reason: "provider rejected filter".to_string(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.live.lock().unwrap().insert(id, (kind, on_batch.clone()));
        self.history.lock().unwrap().push((kind, on_batch));
        Ok(SubscriptionHandle::new(id))
    }

    async fn cancel(&self, handle: SubscriptionHandle) -> Result<(), SubscriptionError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        // The registration is torn down even when reporting failure
        let removed = self.live.lock().unwrap().remove(&handle.id());
        if self.fail_cancel {
            return Err(SubscriptionError::Cancel {
                id: handle.id(),
                reason: "connection reset".to_string(),
            });
        }
        removed
            .map(|_| ())
            .ok_or(SubscriptionError::UnknownHandle { id: handle.id() })
    }
}
