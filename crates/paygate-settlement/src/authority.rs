//! Payment authority: signed purchase authorizations and their settlement.
//!
//! ```text
//!  request_payment ──▶ WAITING_FOR_TX ──attach_transaction──▶ PENDING
//!        │                   │                                  │
//!        │                   └──────── Payment event ───────────┤
//!        │                                                      ▼
//!        │                                        SUCCESS (claimed = false)
//!        │                                                      │ fulfil once
//!        ▼                                                      ▼
//!  signed payload to client                       SUCCESS (claimed = true) + notify
//! ```
//!
//! Workers sharing one store race for a fulfillment lease before running an
//! action, so a settled payment is fulfilled by one worker at a time; the
//! in-process guard only keeps local deliveries from contending for it.
//!
//! Reconciliation never returns an error for bad data: an event naming an
//! unknown or dead request goes to the settlement error log and is dropped.
//! Only store failures propagate, which makes the scanner redeliver.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde_json::json;
use tracing::{debug, info, warn};

use paygate_chain::{ChainAdapter, ChainRegistry, EventHandler, SignValue, TrackedTransaction};
use paygate_store::{ErrorLogEntry, SettleOutcome, Store};
use paygate_types::constants::PAYMENT_FAILED_EVENT;
use paygate_types::{
    ChainEvent, ChainId, EventKind, EventPayload, PaygateError, PaymentAuthorization,
    PaymentConfig, PaymentEvent, PaymentId, PaymentKey, PaymentOrder, PaymentRequest,
    RequestStatus, Result, TransactionFailedEvent, TransactionId, U256, UserId,
};

use crate::actions::{ActionRegistry, Fulfillment};
use crate::collaborators::{PriceOracle, ProductCatalog};
use crate::guard::{FulfillmentGuard, KeyedLocks};
use crate::session::Notifier;

/// Outcome of [`PaymentAuthority::recover`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecoveryReport {
    /// Receipt trackers re-attached to `PENDING` requests.
    pub trackers: usize,
    /// Settled-but-unclaimed requests whose fulfillment completed.
    pub replayed: usize,
}

pub struct PaymentAuthority {
    chains: Arc<ChainRegistry>,
    store: Arc<dyn Store>,
    actions: Arc<ActionRegistry>,
    notifier: Arc<dyn Notifier>,
    catalog: Arc<dyn ProductCatalog>,
    oracle: Arc<dyn PriceOracle>,
    config: PaymentConfig,
    request_locks: KeyedLocks<PaymentKey>,
    fulfillment: FulfillmentGuard,
    worker_id: String,
}

impl PaymentAuthority {
    pub fn new(
        chains: Arc<ChainRegistry>,
        store: Arc<dyn Store>,
        actions: Arc<ActionRegistry>,
        notifier: Arc<dyn Notifier>,
        catalog: Arc<dyn ProductCatalog>,
        oracle: Arc<dyn PriceOracle>,
        config: PaymentConfig,
    ) -> Self {
        Self {
            chains,
            store,
            actions,
            notifier,
            catalog,
            oracle,
            config,
            request_locks: KeyedLocks::new(),
            fulfillment: FulfillmentGuard::new(),
            worker_id: uuid::Uuid::now_v7().to_string(),
        }
    }

    /// Name this worker in fulfillment leases (defaults to a random id).
    #[must_use]
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    #[must_use]
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    fn lease_expiry(&self) -> DateTime<Utc> {
        let ttl = i64::try_from(self.config.fulfillment_lease_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX);
        Utc::now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Subscribe to `Payment` and `TransactionFailed` on every chain.
    pub async fn subscribe(self: &Arc<Self>) {
        let handler: Arc<dyn EventHandler> = Arc::clone(self) as Arc<dyn EventHandler>;
        self.chains.on(EventKind::Payment, Arc::clone(&handler)).await;
        self.chains.on(EventKind::TransactionFailed, handler).await;
    }

    // =================================================================
    // Requests
    // =================================================================

    /// Issue a signed authorization for `order`.
    ///
    /// # Errors
    /// - `UnknownChain` / `UnknownProduct` / `InvalidAddress` for bad input
    /// - `PaymentAlreadyPending` if `(user, tag, context)` has a live request
    /// - chain errors from the nonce lookup or signer
    pub async fn request_payment(&self, order: PaymentOrder) -> Result<PaymentAuthorization> {
        let adapter = self.chains.get(&order.chain)?;
        if !self.actions.contains(&order.product_id) {
            return Err(PaygateError::UnknownProduct(order.product_id));
        }
        if !adapter.is_address(&order.address) {
            return Err(PaygateError::InvalidAddress(order.address));
        }
        let address = adapter.canonical_address(&order.address)?;

        let key = order.key();
        let _lock = self.request_locks.lock(key.clone()).await;
        if self.store.find_active_payment(&key).await?.is_some() {
            return Err(PaygateError::PaymentAlreadyPending {
                user_id: key.user_id,
                tag: key.tag,
            });
        }

        let cents = self.catalog.price_usd_cents(&order.product_id).await?;
        let native = self.oracle.usd_cents_to_native(&order.chain, cents).await?;
        let price = adapter.native_to_fixed_point(&native)?;
        if price.is_zero() {
            return Err(PaygateError::InvalidAmount {
                reason: format!("{} prices to zero on {}", order.product_id, order.chain),
            });
        }
        let nonce = adapter.payment_nonce(&address).await?;

        let now = Utc::now();
        let deadline = now
            .timestamp()
            .unsigned_abs()
            .saturating_add(self.config.deadline_secs);
        let mut request = PaymentRequest {
            id: PaymentId::new(),
            user_id: order.user_id,
            product_id: order.product_id,
            tag: key.tag,
            context: order.context,
            context_hash: key.context_hash,
            address,
            price,
            nonce,
            deadline,
            chain: order.chain,
            signature: String::new(),
            transaction_id: None,
            block_number: None,
            status: RequestStatus::WaitingForTx,
            claimed: false,
            fulfillment_lease: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_payment(request.clone()).await?;

        let signature = match self.sign_request(adapter.as_ref(), &request).await {
            Ok(signature) => signature,
            Err(e) => {
                // An unsigned request must not keep the key occupied.
                self.store
                    .transition_payment(
                        request.id,
                        &[RequestStatus::WaitingForTx],
                        RequestStatus::Failed,
                    )
                    .await?;
                return Err(e);
            }
        };
        self.store
            .set_payment_signature(request.id, &signature)
            .await?;
        request.signature = signature;

        info!(
            payment_id = %request.id,
            user_id = %request.user_id,
            product_id = %request.product_id,
            chain = %request.chain,
            price = %request.price,
            "payment authorized"
        );
        Ok(request.authorization())
    }

    async fn sign_request(
        &self,
        adapter: &dyn ChainAdapter,
        request: &PaymentRequest,
    ) -> Result<String> {
        adapter
            .sign(&[
                SignValue::from(adapter.gateway_address()),
                SignValue::from(request.product_id.as_str()),
                SignValue::from(request.id.to_string()),
                SignValue::from(request.price),
                SignValue::from(request.nonce),
                SignValue::from(request.deadline),
            ])
            .await
    }

    /// Record the transaction the client broadcast for `id` and start polling
    /// its receipt.
    pub async fn attach_transaction(
        &self,
        user_id: UserId,
        id: PaymentId,
        tx: TransactionId,
    ) -> Result<PaymentRequest> {
        let request = self.owned_payment(user_id, id).await?;
        if !self.store.attach_payment_transaction(id, &tx).await? {
            return Err(PaygateError::InvalidTransition {
                status: self.owned_payment(user_id, id).await?.status,
            });
        }
        self.track(&request.chain, id, user_id, tx.clone())?;
        info!(payment_id = %id, tx = %tx, "payment transaction attached");
        self.owned_payment(user_id, id).await
    }

    /// Cancel a request that has not settled.
    pub async fn cancel_payment(&self, user_id: UserId, id: PaymentId) -> Result<()> {
        self.owned_payment(user_id, id).await?;
        let cancelled = self
            .store
            .transition_payment(id, &RequestStatus::NON_TERMINAL, RequestStatus::Cancelled)
            .await?;
        if !cancelled {
            return Err(PaygateError::InvalidTransition {
                status: self.owned_payment(user_id, id).await?.status,
            });
        }
        info!(payment_id = %id, user_id = %user_id, "payment cancelled");
        Ok(())
    }

    pub async fn payment(&self, id: PaymentId) -> Result<Option<PaymentRequest>> {
        self.store.get_payment(id).await
    }

    async fn owned_payment(&self, user_id: UserId, id: PaymentId) -> Result<PaymentRequest> {
        self.store
            .get_payment(id)
            .await?
            .filter(|p| p.user_id == user_id)
            .ok_or(PaygateError::PaymentNotFound(id))
    }

    fn track(
        &self,
        chain: &ChainId,
        id: PaymentId,
        user_id: UserId,
        tx: TransactionId,
    ) -> Result<()> {
        let adapter = self.chains.get(chain)?;
        self.chains.track_transaction(
            chain,
            TrackedTransaction {
                tx,
                contract_address: adapter.gateway_address().to_string(),
                user_id: Some(user_id),
                payload: json!({ "paymentId": id.to_string() }),
            },
        )?;
        Ok(())
    }

    // =================================================================
    // Reconciliation
    // =================================================================

    async fn on_payment(&self, chain: &ChainId, event: &PaymentEvent) -> Result<()> {
        let Ok(id) = event.payment_id.parse::<PaymentId>() else {
            return self
                .inconsistency(
                    chain,
                    EventKind::Payment,
                    &event.payment_id,
                    &event.transaction_hash,
                    "malformed payment id",
                )
                .await;
        };

        let _guard = self.fulfillment.lock(id).await;
        let outcome = self
            .store
            .settle_payment(id, chain, &event.transaction_hash, event.block_number)
            .await?;
        match outcome {
            SettleOutcome::Settled(request) => {
                info!(
                    payment_id = %id,
                    chain = %chain,
                    tx = %event.transaction_hash,
                    block = event.block_number,
                    "payment settled"
                );
                self.fulfil(&request, Some(event.reward_credit)).await
            }
            SettleOutcome::AwaitingFulfillment(request) => {
                debug!(payment_id = %id, "settled payment still unclaimed, fulfilling");
                self.fulfil(&request, Some(event.reward_credit)).await
            }
            SettleOutcome::AlreadyClaimed => {
                debug!(payment_id = %id, "payment event redelivered, already claimed");
                Ok(())
            }
            SettleOutcome::Terminal(status) => {
                let reason = format!("payment event for {status} request");
                self.inconsistency(
                    chain,
                    EventKind::Payment,
                    &event.payment_id,
                    &event.transaction_hash,
                    &reason,
                )
                .await
            }
            SettleOutcome::NotFound => {
                self.inconsistency(
                    chain,
                    EventKind::Payment,
                    &event.payment_id,
                    &event.transaction_hash,
                    "unknown payment id",
                )
                .await
            }
        }
    }

    /// Run the fulfillment of a settled request and claim it. Caller holds
    /// the fulfillment guard for `request.id`.
    ///
    /// Nothing runs unless this worker wins the store's fulfillment lease. A
    /// failing action releases the lease and leaves the request unclaimed
    /// for [`replay_unclaimed`](Self::replay_unclaimed); it is not an error
    /// here.
    async fn fulfil(&self, request: &PaymentRequest, reward_credit: Option<U256>) -> Result<()> {
        let leased = self
            .store
            .acquire_fulfillment_lease(request.id, &self.worker_id, self.lease_expiry())
            .await?;
        if !leased {
            debug!(payment_id = %request.id, "fulfillment held elsewhere or done, skipped");
            return Ok(());
        }

        let fulfillment = Fulfillment::new(request, reward_credit);
        let result = match self
            .actions
            .execute_action(&request.product_id, fulfillment)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                warn!(payment_id = %request.id, error = %e, "fulfillment failed, left unclaimed");
                self.store
                    .release_fulfillment_lease(request.id, &self.worker_id)
                    .await?;
                self.store
                    .record(ErrorLogEntry::new(
                        request.chain.clone(),
                        EventKind::Payment,
                        request.id.to_string(),
                        request.transaction_id.clone(),
                        e.to_string(),
                    ))
                    .await?;
                return Ok(());
            }
        };

        if !self.store.claim_payment(request.id).await? {
            warn!(payment_id = %request.id, "payment was claimed concurrently");
            return Ok(());
        }
        info!(payment_id = %request.id, product_id = %request.product_id, "payment fulfilled");

        let event = self.actions.notification_event(&request.product_id);
        self.notifier
            .notify_user(
                request.user_id,
                event,
                json!({
                    "paymentId": request.id.to_string(),
                    "productId": request.product_id,
                    "result": result,
                }),
            )
            .await;
        Ok(())
    }

    async fn on_transaction_failed(
        &self,
        chain: &ChainId,
        event: &TransactionFailedEvent,
    ) -> Result<()> {
        let adapter = self.chains.get(chain)?;
        if !event
            .contract_address
            .eq_ignore_ascii_case(adapter.gateway_address())
        {
            return Ok(());
        }
        let Some(request) = self
            .store
            .find_payment_by_transaction(&event.transaction_id)
            .await?
        else {
            return self
                .inconsistency(
                    chain,
                    EventKind::TransactionFailed,
                    event.transaction_id.as_str(),
                    &event.transaction_id,
                    "failed transaction matches no payment",
                )
                .await;
        };

        let failed = self
            .store
            .transition_payment(request.id, &[RequestStatus::Pending], RequestStatus::Failed)
            .await?;
        if !failed {
            debug!(payment_id = %request.id, status = %request.status, "failure ignored");
            return Ok(());
        }
        warn!(
            payment_id = %request.id,
            tx = %event.transaction_id,
            reason = %event.reason,
            "payment transaction failed"
        );
        self.notifier
            .notify_user(
                request.user_id,
                PAYMENT_FAILED_EVENT,
                json!({
                    "paymentId": request.id.to_string(),
                    "productId": request.product_id,
                    "reason": event.reason,
                }),
            )
            .await;
        Ok(())
    }

    async fn inconsistency(
        &self,
        chain: &ChainId,
        kind: EventKind,
        reference: &str,
        tx: &TransactionId,
        reason: &str,
    ) -> Result<()> {
        warn!(chain = %chain, event = %kind, reference, reason, "settlement inconsistency");
        self.store
            .record(ErrorLogEntry::new(
                chain.clone(),
                kind,
                reference,
                Some(tx.clone()),
                reason,
            ))
            .await
    }

    // =================================================================
    // Recovery
    // =================================================================

    /// Retry fulfillment of every settled request that was never claimed.
    /// Returns how many completed.
    pub async fn replay_unclaimed(&self) -> Result<usize> {
        let mut replayed = 0;
        for request in self.store.unclaimed_payments().await? {
            let _guard = self.fulfillment.lock(request.id).await;
            let Some(current) = self.store.get_payment(request.id).await? else {
                continue;
            };
            if !current.awaits_fulfillment() {
                continue;
            }
            self.fulfil(&current, None).await?;
            if self
                .store
                .get_payment(current.id)
                .await?
                .is_some_and(|p| p.claimed)
            {
                replayed += 1;
            }
        }
        if replayed > 0 {
            info!(replayed, "unclaimed payments fulfilled");
        }
        Ok(replayed)
    }

    /// Startup recovery: re-attach receipt trackers for every `PENDING`
    /// request, then replay unclaimed settlements.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        for request in self.store.payments_with_status(RequestStatus::Pending).await? {
            let Some(tx) = request.transaction_id.clone() else {
                warn!(payment_id = %request.id, "pending payment has no transaction");
                continue;
            };
            match self.track(&request.chain, request.id, request.user_id, tx) {
                Ok(()) => report.trackers += 1,
                Err(e) => warn!(payment_id = %request.id, error = %e, "tracker not re-attached"),
            }
        }
        report.replayed = self.replay_unclaimed().await?;
        info!(
            trackers = report.trackers,
            replayed = report.replayed,
            "payment recovery complete"
        );
        Ok(report)
    }
}

#[async_trait]
impl EventHandler for PaymentAuthority {
    async fn handle(&self, event: &ChainEvent) -> Result<()> {
        match &event.payload {
            EventPayload::Payment(payment) => self.on_payment(&event.chain, payment).await,
            EventPayload::TransactionFailed(failed) => {
                self.on_transaction_failed(&event.chain, failed).await
            }
            EventPayload::DividendWithdrawal(_) | EventPayload::DividendTokenWithdrawal(_) => {
                Ok(())
            }
        }
    }
}
