use alloy::primitives::Address;
use alloy::providers::{DynProvider, Provider, ProviderBuilder, WsConnect};
use alloy::rpc::types::{Filter, Log};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{BatchCallback, ChainEventSource, SubscriptionHandle};
use crate::config::ConnectionParams;
use crate::error::SubscriptionError;
use crate::events::decoder;
use crate::events::types::{EventKind, LogEntry};

/// Upper bound on logs coalesced into one pub/sub batch.
const MAX_PUBSUB_BATCH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transport {
    PubSub,
    Polling,
}

struct Watcher {
    kind: EventKind,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

/// [`ChainEventSource`] backed by an Ethereum JSON-RPC endpoint.
///
/// Uses `eth_subscribe("logs")` when a WebSocket endpoint is reachable and
/// falls back to polling `eth_getLogs` over HTTP otherwise. Every
/// subscription runs as its own task.
pub struct RpcEventSource {
    provider: DynProvider,
    transport: Transport,
    poll_interval: Duration,
    max_block_range: u64,
    next_id: AtomicU64,
    watchers: Mutex<HashMap<u64, Watcher>>,
}

impl RpcEventSource {
    /// Connect to the configured endpoint and check it serves the expected chain.
    pub async fn connect(params: &ConnectionParams) -> eyre::Result<Self> {
        let (provider, transport) = connect_provider(params).await?;
        Self::with_provider(provider, transport, params).await
    }

    async fn with_provider(
        provider: DynProvider,
        transport: Transport,
        params: &ConnectionParams,
    ) -> eyre::Result<Self> {
        let chain_id = retry_rpc(|| provider.get_chain_id()).await?;
        if chain_id != params.network.chain_id {
            return Err(eyre::eyre!(
                "Endpoint serves chain id {} but network '{}' expects {}",
                chain_id,
                params.network.name,
                params.network.chain_id
            ));
        }

        tracing::info!(
            network = %params.network.name,
            chain_id,
            transport = ?transport,
            "Connected to RPC endpoint"
        );

        Ok(Self {
            provider,
            transport,
            poll_interval: params.poll_interval,
            max_block_range: params.max_block_range,
            next_id: AtomicU64::new(1),
            watchers: Mutex::new(HashMap::new()),
        })
    }
}

async fn connect_provider(params: &ConnectionParams) -> eyre::Result<(DynProvider, Transport)> {
    if let Some(ws_url) = params.pubsub_endpoint() {
        match ProviderBuilder::new()
            .connect_ws(WsConnect::new(ws_url.as_str()))
            .await
        {
            Ok(provider) => return Ok((provider.erased(), Transport::PubSub)),
            Err(e) if params.polling_endpoint().is_some() => {
                tracing::warn!(
                    endpoint = %ws_url,
                    error = %e,
                    "WebSocket connection failed, falling back to HTTP polling"
                );
            }
            Err(e) => {
                return Err(eyre::eyre!("Failed to connect to {}: {}", ws_url, e));
            }
        }
    }

    let http_url = params
        .polling_endpoint()
        .ok_or_else(|| eyre::eyre!("No HTTP endpoint configured for polling"))?;
    let provider = ProviderBuilder::new().connect_http(http_url.clone());
    Ok((provider.erased(), Transport::Polling))
}

#[async_trait]
impl ChainEventSource for RpcEventSource {
    async fn subscribe(
        &self,
        contract: Address,
        kind: EventKind,
        on_batch: BatchCallback,
    ) -> Result<SubscriptionHandle, SubscriptionError> {
        let filter = Filter::new().address(contract).event(kind.signature());
        let shutdown = CancellationToken::new();

        let task = match self.transport {
            Transport::PubSub => {
                let sub = self
                    .provider
                    .subscribe_logs(&filter)
                    .await
                    .map_err(|e| SubscriptionError::Register {
                        kind,
                        reason: e.to_string(),
                    })?;

                tokio::spawn(run_pubsub(
                    sub.into_stream(),
                    kind,
                    contract,
                    on_batch,
                    shutdown.clone(),
                ))
            }
            Transport::Polling => {
                let last_block = retry_rpc(|| self.provider.get_block_number())
                    .await
                    .map_err(|e| SubscriptionError::Register {
                        kind,
                        reason: e.to_string(),
                    })?;

                let poller = LogPoller {
                    provider: self.provider.clone(),
                    filter,
                    kind,
                    contract,
                    max_block_range: self.max_block_range,
                    last_block,
                };
                tokio::spawn(run_polling(
                    poller,
                    self.poll_interval,
                    on_batch,
                    shutdown.clone(),
                ))
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.watchers.lock().await.insert(
            id,
            Watcher {
                kind,
                shutdown,
                task,
            },
        );

        tracing::debug!(%kind, subscription = id, "Log subscription registered");
        Ok(SubscriptionHandle::new(id))
    }

    async fn cancel(&self, handle: SubscriptionHandle) -> Result<(), SubscriptionError> {
        let watcher = self
            .watchers
            .lock()
            .await
            .remove(&handle.id())
            .ok_or(SubscriptionError::UnknownHandle { id: handle.id() })?;

        watcher.shutdown.cancel();
        watcher.task.await.map_err(|e| SubscriptionError::Cancel {
            id: handle.id(),
            reason: e.to_string(),
        })?;

        tracing::debug!(kind = %watcher.kind, subscription = handle.id(), "Log subscription cancelled");
        Ok(())
    }
}

impl Drop for RpcEventSource {
    fn drop(&mut self) {
        for watcher in self.watchers.get_mut().values() {
            watcher.shutdown.cancel();
        }
    }
}

/// Deliver pushed logs, coalescing whatever is ready into one batch.
async fn run_pubsub<S>(
    stream: S,
    kind: EventKind,
    contract: Address,
    on_batch: BatchCallback,
    shutdown: CancellationToken,
) where
    S: futures::Stream<Item = Log>,
{
    let mut stream = Box::pin(stream.ready_chunks(MAX_PUBSUB_BATCH));

    loop {
        tokio::select! {
            maybe_logs = stream.next() => {
                match maybe_logs {
                    Some(logs) => deliver(kind, contract, &logs, &on_batch),
                    None => {
                        tracing::warn!(%kind, "Log stream ended");
                        break;
                    }
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
}

/// Cursor over the chain for one polled subscription.
struct LogPoller {
    provider: DynProvider,
    filter: Filter,
    kind: EventKind,
    contract: Address,
    max_block_range: u64,
    /// Highest block whose logs have been delivered.
    last_block: u64,
}

impl LogPoller {
    /// Fetch logs from the cursor up to the current head in chunks of at most
    /// `max_block_range` blocks. The cursor advances after each delivered
    /// chunk, so a failure leaves it at the first range still owed.
    async fn poll(&mut self, on_batch: &BatchCallback) -> eyre::Result<()> {
        let head = retry_rpc(|| self.provider.get_block_number()).await?;

        while self.last_block < head {
            let from = self.last_block + 1;
            let to = std::cmp::min(from.saturating_add(self.max_block_range.saturating_sub(1)), head);
            let range = self.filter.clone().from_block(from).to_block(to);

            let logs = retry_rpc(|| self.provider.get_logs(&range))
                .await
                .map_err(|e| eyre::eyre!("eth_getLogs for blocks {}..={} failed: {}", from, to, e))?;

            deliver(self.kind, self.contract, &logs, on_batch);
            self.last_block = to;
        }

        Ok(())
    }
}

/// Poll for new logs every `poll_interval` until shut down.
async fn run_polling(
    mut poller: LogPoller,
    poll_interval: Duration,
    on_batch: BatchCallback,
    shutdown: CancellationToken,
) {
    let kind = poller.kind;
    tracing::debug!(%kind, last_block = poller.last_block, "HTTP log polling active");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = shutdown.cancelled() => break,
        }

        let outcome = tokio::select! {
            result = poller.poll(&on_batch) => result,
            _ = shutdown.cancelled() => break,
        };

        if let Err(e) = outcome {
            // Range is retried on the next tick
            tracing::error!(
                %kind,
                next_block = poller.last_block + 1,
                error = %e,
                "Log polling failed"
            );
        }
    }
}

fn deliver(kind: EventKind, contract: Address, logs: &[Log], on_batch: &BatchCallback) {
    let batch = decode_batch(kind, contract, logs);
    if !batch.is_empty() {
        on_batch(batch);
    }
}

/// Decode raw logs into a batch ordered by (block number, log index).
/// Undecodable logs are skipped.
pub fn decode_batch(kind: EventKind, contract: Address, logs: &[Log]) -> Vec<LogEntry> {
    let mut ordered: Vec<&Log> = logs.iter().collect();
    ordered.sort_by_key(|log| (log.block_number, log.log_index));

    ordered
        .into_iter()
        .filter_map(|log| {
            let entry = decoder::decode_entry(kind, log, contract);
            if entry.is_none() {
                tracing::warn!(
                    %kind,
                    tx_hash = ?log.transaction_hash,
                    log_index = ?log.log_index,
                    removed = log.removed,
                    "Skipping undecodable log"
                );
            }
            entry
        })
        .collect()
}

/// Retry an async operation with exponential backoff.
/// Handles transient RPC errors (rate limits, network issues).
pub async fn retry_rpc<F, Fut, T, E>(mut f: F) -> eyre::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = Duration::from_millis(500);
    let max_retries = 5;

    for attempt in 0..max_retries {
        match f().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                tracing::warn!(
                    attempt = attempt + 1,
                    max_retries,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "RPC call failed, retrying..."
                );
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, Duration::from_secs(30));
            }
        }
    }

    f().await.map_err(|e| eyre::eyre!("RPC call failed after {} retries: {}", max_retries, e))
}
