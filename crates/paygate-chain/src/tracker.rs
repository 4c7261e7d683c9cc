//! Receipt polling for submitted transactions.
//!
//! A tracker polls at one fixed interval with no retry limit. It ends when
//! the receipt is definitive or its cancellation token fires. A failed
//! receipt becomes a `TransactionFailed` event on the dispatcher; nothing is
//! dispatched for success because the contract's own event covers it.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use paygate_types::{
    ChainEvent, ChainId, EventPayload, TransactionFailedEvent, TransactionId, UserId,
};

use crate::adapter::{ChainAdapter, TxStatus};
use crate::registry::EventDispatcher;

/// A transaction handed to a tracker, with the context that travels in its
/// `TransactionFailed` event.
#[derive(Debug, Clone)]
pub struct TrackedTransaction {
    pub tx: TransactionId,
    /// Contract the transaction calls; lets consumers tell payments from
    /// withdrawals.
    pub contract_address: String,
    pub user_id: Option<UserId>,
    pub payload: serde_json::Value,
}

pub struct TransactionTracker {
    adapter: Arc<dyn ChainAdapter>,
    dispatcher: Arc<EventDispatcher>,
    poll_interval: Duration,
}

impl TransactionTracker {
    pub fn new(adapter: Arc<dyn ChainAdapter>, dispatcher: Arc<EventDispatcher>) -> Self {
        let poll_interval = adapter.scan_settings().receipt_poll_interval;
        Self {
            adapter,
            dispatcher,
            poll_interval,
        }
    }

    /// Poll until the receipt is definitive. Returns `None` if cancelled first.
    pub async fn run(
        self,
        tracked: TrackedTransaction,
        cancel: CancellationToken,
    ) -> Option<TxStatus> {
        let chain = self.adapter.chain_id().clone();
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(chain = %chain, tx = %tracked.tx, "tracking transaction");

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!(chain = %chain, tx = %tracked.tx, "tracker cancelled");
                    return None;
                }
                _ = interval.tick() => {}
            }

            match self.adapter.transaction_status(&tracked.tx).await {
                Ok(TxStatus::Unknown) => {}
                Ok(TxStatus::Succeeded) => {
                    info!(chain = %chain, tx = %tracked.tx, "transaction confirmed");
                    return Some(TxStatus::Succeeded);
                }
                Ok(TxStatus::Failed { reason }) => {
                    warn!(chain = %chain, tx = %tracked.tx, reason = %reason, "transaction failed");
                    if self.report_failure(&chain, &tracked, &reason).await {
                        return Some(TxStatus::Failed { reason });
                    }
                }
                Err(e) => {
                    warn!(chain = %chain, tx = %tracked.tx, error = %e, "receipt lookup failed");
                }
            }
        }
    }

    /// Dispatch the failure. `false` means a handler failed and the next
    /// poll should try again.
    async fn report_failure(
        &self,
        chain: &ChainId,
        tracked: &TrackedTransaction,
        reason: &str,
    ) -> bool {
        let event = ChainEvent::new(
            chain.clone(),
            0,
            EventPayload::TransactionFailed(TransactionFailedEvent {
                transaction_id: tracked.tx.clone(),
                payload: tracked.payload.clone(),
                user_id: tracked.user_id,
                reason: reason.to_string(),
                contract_address: tracked.contract_address.clone(),
            }),
        );
        match self.dispatcher.dispatch(&event).await {
            Ok(()) => true,
            Err(e) => {
                warn!(chain = %chain, tx = %tracked.tx, error = %e, "failure handler errored, retrying");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockChain;
    use crate::registry::EventHandler;
    use async_trait::async_trait;
    use paygate_types::{EventKind, Result};
    use std::sync::Mutex;

    struct Failures(Mutex<Vec<TransactionFailedEvent>>);

    #[async_trait]
    impl EventHandler for Failures {
        async fn handle(&self, event: &ChainEvent) -> Result<()> {
            if let EventPayload::TransactionFailed(e) = &event.payload {
                self.0.lock().unwrap().push(e.clone());
            }
            Ok(())
        }
    }

    fn fast_chain() -> Arc<MockChain> {
        let chain = MockChain::new("eth");
        chain.configure_scan(|s| s.receipt_poll_interval = Duration::from_millis(2));
        Arc::new(chain)
    }

    fn tracked(tx: &TransactionId) -> TrackedTransaction {
        TrackedTransaction {
            tx: tx.clone(),
            contract_address: "0xtoken".into(),
            user_id: Some(UserId::new()),
            payload: serde_json::json!({"withdrawalId": "w1"}),
        }
    }

    #[tokio::test]
    async fn failed_receipt_dispatches_transaction_failed() {
        let chain = fast_chain();
        let tx = TransactionId::new("0x01");
        chain.set_tx_status_sequence(
            &tx,
            vec![
                TxStatus::Unknown,
                TxStatus::Unknown,
                TxStatus::Failed {
                    reason: "reverted".into(),
                },
            ],
        );
        let dispatcher = Arc::new(EventDispatcher::new());
        let failures = Arc::new(Failures(Mutex::new(Vec::new())));
        dispatcher
            .on(EventKind::TransactionFailed, failures.clone())
            .await;

        let status = TransactionTracker::new(chain.clone(), dispatcher)
            .run(tracked(&tx), CancellationToken::new())
            .await;
        assert!(matches!(status, Some(TxStatus::Failed { .. })));
        let seen = failures.0.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].transaction_id, tx);
        assert_eq!(seen[0].contract_address, "0xtoken");
        assert_eq!(seen[0].payload["withdrawalId"], "w1");
        assert!(chain.receipt_polls(&tx) >= 3);
    }

    #[tokio::test]
    async fn success_dispatches_nothing() {
        let chain = fast_chain();
        let tx = TransactionId::new("0x02");
        chain.set_tx_status_sequence(&tx, vec![TxStatus::Succeeded]);
        let dispatcher = Arc::new(EventDispatcher::new());
        let failures = Arc::new(Failures(Mutex::new(Vec::new())));
        dispatcher
            .on(EventKind::TransactionFailed, failures.clone())
            .await;

        let status = TransactionTracker::new(chain, dispatcher)
            .run(tracked(&tx), CancellationToken::new())
            .await;
        assert_eq!(status, Some(TxStatus::Succeeded));
        assert!(failures.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_forever_until_cancelled() {
        let chain = fast_chain();
        let tx = TransactionId::new("0x03");
        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            TransactionTracker::new(chain.clone(), Arc::new(EventDispatcher::new()))
                .run(tracked(&tx), cancel.clone()),
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!task.is_finished());
        cancel.cancel();
        assert_eq!(task.await.unwrap(), None);
        assert!(chain.receipt_polls(&tx) > 1);
    }
}
