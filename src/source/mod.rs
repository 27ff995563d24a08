//! Log-streaming capability the dispatcher subscribes through.
//!
//! A source delivers decoded batches for one contract and one event kind per
//! subscription. It makes no exactly-once guarantee (the same log may show up
//! twice around a reorg) and no ordering guarantee across kinds.

pub mod rpc;

use alloy::primitives::Address;
use async_trait::async_trait;
use std::sync::Arc;

use crate::error::SubscriptionError;
use crate::events::types::{EventKind, LogEntry};

pub use rpc::RpcEventSource;

/// Receives each delivered batch, in delivery order. Must not block.
pub type BatchCallback = Arc<dyn Fn(Vec<LogEntry>) + Send + Sync>;

/// Opaque token identifying a live registration with a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
}

impl SubscriptionHandle {
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl std::fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.id)
    }
}

#[async_trait]
pub trait ChainEventSource: Send + Sync {
    /// Start delivering `kind` logs emitted by `contract` to `on_batch`.
    async fn subscribe(
        &self,
        contract: Address,
        kind: EventKind,
        on_batch: BatchCallback,
    ) -> Result<SubscriptionHandle, SubscriptionError>;

    /// Stop deliveries for a handle returned by [`ChainEventSource::subscribe`].
    async fn cancel(&self, handle: SubscriptionHandle) -> Result<(), SubscriptionError>;
}
