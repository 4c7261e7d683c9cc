//! Chain registry and typed event dispatch.
//!
//! Adapters are keyed by [`ChainId`]. Consumers subscribe per [`EventKind`]
//! with an [`EventHandler`]; every scanner of every chain feeds the same
//! [`EventDispatcher`], so one handler sees the events of all chains.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use paygate_store::CheckpointStore;
use paygate_types::{ChainEvent, ChainId, EventKind, PaygateError, Result};

use crate::adapter::{ChainAdapter, TxStatus};
use crate::scanner::EventScanner;
use crate::tracker::{TrackedTransaction, TransactionTracker};

/// Consumer of one or more event kinds.
///
/// Returning an error aborts the scan window the event belongs to, so the
/// event is delivered again on the next cycle. Handlers must therefore be
/// idempotent.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &ChainEvent) -> Result<()>;
}

/// Fan-out of events to the handlers subscribed to their kind.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: RwLock<HashMap<EventKind, Vec<Arc<dyn EventHandler>>>>,
}

impl EventDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `handler` to `kind`. Handlers run in subscription order.
    pub async fn on(&self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .await
            .entry(kind)
            .or_default()
            .push(handler);
    }

    pub async fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.read().await.get(&kind).map_or(0, Vec::len)
    }

    /// Deliver `event` to every subscriber of its kind; stops at the first error.
    pub async fn dispatch(&self, event: &ChainEvent) -> Result<()> {
        let handlers = self
            .handlers
            .read()
            .await
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();
        if handlers.is_empty() {
            debug!(chain = %event.chain, event = %event.kind(), "no handler subscribed");
        }
        for handler in handlers {
            handler.handle(event).await?;
        }
        Ok(())
    }
}

/// All configured ledgers plus the background tasks watching them.
pub struct ChainRegistry {
    adapters: HashMap<ChainId, Arc<dyn ChainAdapter>>,
    dispatcher: Arc<EventDispatcher>,
    checkpoints: Arc<dyn CheckpointStore>,
    cancel: CancellationToken,
}

impl ChainRegistry {
    pub fn new(checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            adapters: HashMap::new(),
            dispatcher: Arc::new(EventDispatcher::new()),
            checkpoints,
            cancel: CancellationToken::new(),
        }
    }

    /// Add an adapter. Each chain id may be registered once.
    pub fn register(&mut self, adapter: Arc<dyn ChainAdapter>) -> Result<()> {
        let chain = adapter.chain_id().clone();
        if self.adapters.contains_key(&chain) {
            return Err(PaygateError::Configuration(format!(
                "chain {chain} registered twice"
            )));
        }
        info!(chain = %chain, "chain adapter registered");
        self.adapters.insert(chain, adapter);
        Ok(())
    }

    /// The adapter for `chain`.
    pub fn get(&self, chain: &ChainId) -> Result<Arc<dyn ChainAdapter>> {
        self.adapters
            .get(chain)
            .cloned()
            .ok_or_else(|| PaygateError::UnknownChain(chain.clone()))
    }

    pub fn chains(&self) -> impl Iterator<Item = &ChainId> {
        self.adapters.keys()
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    /// Subscribe to `kind` on every chain.
    pub async fn on(&self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        self.dispatcher.on(kind, handler).await;
    }

    /// Spawn one scanner per `(chain, watched event)`.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();
        for adapter in self.adapters.values() {
            for kind in adapter.watched_events() {
                let scanner = EventScanner::new(
                    Arc::clone(adapter),
                    kind,
                    Arc::clone(&self.checkpoints),
                    Arc::clone(&self.dispatcher),
                );
                tasks.push(tokio::spawn(scanner.run(self.cancel.child_token())));
            }
        }
        info!(scanners = tasks.len(), "event scanners started");
        tasks
    }

    /// Poll the receipt of `tracked.tx` on `chain` until it is definitive.
    /// A failed receipt is dispatched as a `TransactionFailed` event.
    pub fn track_transaction(
        &self,
        chain: &ChainId,
        tracked: TrackedTransaction,
    ) -> Result<JoinHandle<Option<TxStatus>>> {
        let adapter = self.get(chain)?;
        let tracker = TransactionTracker::new(adapter, Arc::clone(&self.dispatcher));
        Ok(tokio::spawn(tracker.run(tracked, self.cancel.child_token())))
    }

    /// Stop every scanner and tracker spawned by this registry.
    pub fn shutdown(&self) {
        info!("chain registry shutting down");
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockChain;
    use paygate_store::MemoryStore;
    use paygate_types::{EventPayload, PaymentEvent, TransactionId, U256};
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<u64>>);

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, event: &ChainEvent) -> Result<()> {
            self.0.lock().unwrap().push(event.cursor);
            Ok(())
        }
    }

    fn payment_event(chain: &str, cursor: u64) -> ChainEvent {
        ChainEvent::new(
            ChainId::new(chain),
            cursor,
            EventPayload::Payment(PaymentEvent {
                payment_id: "x".into(),
                transaction_hash: TransactionId::new(format!("0x{cursor:x}")),
                block_number: cursor,
                reward_credit: U256::ZERO,
            }),
        )
    }

    #[tokio::test]
    async fn dispatch_reaches_only_subscribers_of_the_kind() {
        let dispatcher = EventDispatcher::new();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        dispatcher.on(EventKind::Payment, recorder.clone()).await;
        assert_eq!(dispatcher.handler_count(EventKind::Payment).await, 1);
        assert_eq!(dispatcher.handler_count(EventKind::DividendWithdrawal).await, 0);

        dispatcher.dispatch(&payment_event("eth", 5)).await.unwrap();
        dispatcher.dispatch(&payment_event("bsc", 6)).await.unwrap();
        assert_eq!(*recorder.0.lock().unwrap(), vec![5, 6]);
    }

    #[tokio::test]
    async fn registry_lookup() {
        let mut registry = ChainRegistry::new(Arc::new(MemoryStore::new()));
        registry.register(Arc::new(MockChain::new("eth"))).unwrap();
        assert!(registry.register(Arc::new(MockChain::new("eth"))).is_err());
        assert!(registry.get(&ChainId::new("eth")).is_ok());
        assert!(matches!(
            registry.get(&ChainId::new("tron")),
            Err(PaygateError::UnknownChain(_))
        ));
        assert_eq!(registry.chains().count(), 1);
    }

    #[tokio::test]
    async fn shutdown_stops_scanners() {
        let mut registry = ChainRegistry::new(Arc::new(MemoryStore::new()));
        registry.register(Arc::new(MockChain::new("eth"))).unwrap();
        let tasks = registry.start();
        assert_eq!(tasks.len(), 3);
        registry.shutdown();
        for task in tasks {
            tokio::time::timeout(std::time::Duration::from_secs(5), task)
                .await
                .unwrap()
                .unwrap();
        }
        assert!(registry.is_shut_down());
    }
}
