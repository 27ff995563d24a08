//! Subscription lifecycle and per-entry dispatch.

pub mod dedup;

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::ConnectionParams;
use crate::error::SubscriptionError;
use crate::events::types::{EventKind, LendingEvent, LogEntry};
use crate::handler::LendingHandler;
use crate::source::{BatchCallback, ChainEventSource, SubscriptionHandle};

use self::dedup::DedupWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Idle,
    Listening,
}

/// A live registration for one event kind.
#[derive(Debug, Clone, Copy)]
pub struct Subscription {
    pub kind: EventKind,
    pub handle: SubscriptionHandle,
}

struct Session {
    state: DispatcherState,
    subscriptions: Vec<Subscription>,
    /// Cancelled on stop; callbacks of this session drop late batches.
    shutdown: Option<CancellationToken>,
}

/// Owns the four MiniLend subscriptions and fans delivered entries out to
/// the handler.
///
/// `start`/`stop` are serialized by an internal lock. Each entry is handled
/// on its own task, so one slow handler never holds up the others; those
/// tasks outlive `stop` and can be awaited with [`EventDispatcher::wait_in_flight`].
pub struct EventDispatcher {
    params: ConnectionParams,
    source: Arc<dyn ChainEventSource>,
    handler: Arc<LendingHandler>,
    dedup: Arc<DedupWindow>,
    in_flight: TaskTracker,
    session: Mutex<Session>,
}

impl EventDispatcher {
    pub fn new(
        params: ConnectionParams,
        source: Arc<dyn ChainEventSource>,
        handler: Arc<LendingHandler>,
    ) -> Self {
        Self {
            params,
            source,
            handler,
            dedup: Arc::new(DedupWindow::new(0)),
            in_flight: TaskTracker::new(),
            session: Mutex::new(Session {
                state: DispatcherState::Idle,
                subscriptions: Vec::new(),
                shutdown: None,
            }),
        }
    }

    /// Suppress re-delivered logs, remembering the last `capacity` origins.
    pub fn with_dedup_capacity(mut self, capacity: usize) -> Self {
        self.dedup = Arc::new(DedupWindow::new(capacity));
        self
    }

    /// Subscribe to all four event kinds. No-op when already listening.
    ///
    /// If any registration fails, the ones already made are cancelled and the
    /// dispatcher stays idle.
    pub async fn start(&self) -> Result<(), SubscriptionError> {
        let mut session = self.session.lock().await;
        if session.state == DispatcherState::Listening {
            tracing::warn!("Event listener already running");
            return Ok(());
        }

        tracing::info!(
            contract = %self.params.contract,
            network = %self.params.network.name,
            chain_id = self.params.network.chain_id,
            "Starting MiniLend event listener"
        );

        let shutdown = CancellationToken::new();
        let mut subscriptions = Vec::with_capacity(EventKind::ALL.len());

        for kind in EventKind::ALL {
            let on_batch = self.batch_callback(kind, shutdown.clone());
            match self
                .source
                .subscribe(self.params.contract, kind, on_batch)
                .await
            {
                Ok(handle) => subscriptions.push(Subscription { kind, handle }),
                Err(e) => {
                    tracing::error!(
                        %kind,
                        error = %e,
                        registered = subscriptions.len(),
                        "Subscription failed, rolling back"
                    );
                    shutdown.cancel();
                    self.cancel_all(subscriptions).await;
                    return Err(e);
                }
            }
        }

        session.state = DispatcherState::Listening;
        session.subscriptions = subscriptions;
        session.shutdown = Some(shutdown);

        tracing::info!(
            events = ?EventKind::ALL.map(|k| k.event_name()),
            "Listening to all MiniLend events"
        );
        Ok(())
    }

    /// Cancel every subscription and go idle. No-op when idle.
    ///
    /// Handlers already running are left to finish.
    pub async fn stop(&self) {
        let mut session = self.session.lock().await;
        if session.state == DispatcherState::Idle {
            return;
        }

        if let Some(shutdown) = session.shutdown.take() {
            shutdown.cancel();
        }
        let subscriptions = std::mem::take(&mut session.subscriptions);
        self.cancel_all(subscriptions).await;
        session.state = DispatcherState::Idle;

        tracing::info!(
            in_flight = self.in_flight.len(),
            "MiniLend event listener stopped"
        );
    }

    pub async fn state(&self) -> DispatcherState {
        self.session.lock().await.state
    }

    pub async fn subscriptions(&self) -> Vec<Subscription> {
        self.session.lock().await.subscriptions.clone()
    }

    /// Number of handler tasks still running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Wait until every handler task spawned so far has finished.
    pub async fn wait_in_flight(&self) {
        self.in_flight.close();
        self.in_flight.wait().await;
        self.in_flight.reopen();
    }

    async fn cancel_all(&self, subscriptions: Vec<Subscription>) {
        for sub in subscriptions {
            if let Err(e) = self.source.cancel(sub.handle).await {
                tracing::warn!(
                    kind = %sub.kind,
                    subscription = %sub.handle,
                    error = %e,
                    "Failed to cancel subscription, continuing"
                );
            }
        }
    }

    fn batch_callback(&self, kind: EventKind, shutdown: CancellationToken) -> BatchCallback {
        let handler = self.handler.clone();
        let dedup = self.dedup.clone();
        let in_flight = self.in_flight.clone();
        let runtime = Handle::current();

        Arc::new(move |batch: Vec<LogEntry>| {
            if shutdown.is_cancelled() {
                tracing::debug!(%kind, entries = batch.len(), "Listener stopped, dropping batch");
                return;
            }

            tracing::debug!(%kind, entries = batch.len(), "Dispatching batch");
            for entry in batch {
                if !dedup.first_delivery(&entry) {
                    tracing::debug!(
                        %kind,
                        user = %entry.user,
                        origin = ?entry.origin,
                        "Skipping duplicate log"
                    );
                    continue;
                }

                let event = LendingEvent::new(kind, entry);
                in_flight.spawn_on(dispatch_entry(handler.clone(), event), &runtime);
            }
        })
    }
}

/// How a single entry's handler run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchOutcome {
    Handled,
    Failed,
    Panicked,
}

async fn dispatch_entry(handler: Arc<LendingHandler>, event: LendingEvent) -> DispatchOutcome {
    let outcome = AssertUnwindSafe(handler.handle(&event)).catch_unwind().await;
    let entry = event.entry();

    match outcome {
        Ok(Ok(())) => DispatchOutcome::Handled,
        Ok(Err(e)) => {
            tracing::error!(
                kind = %event.kind(),
                user = %entry.user,
                amount = %entry.amount,
                effects = ?e.failed_effects(),
                error = %e,
                "Handler failed"
            );
            DispatchOutcome::Failed
        }
        Err(panic) => {
            tracing::error!(
                kind = %event.kind(),
                user = %entry.user,
                amount = %entry.amount,
                panic = panic_message(&*panic),
                "Handler panicked"
            );
            DispatchOutcome::Panicked
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
