//! Withdrawal ledger: game currency out to the reward token.
//!
//! The lifecycle for a withdrawal:
//! 1. `request_withdrawal` → balance debited, signed authorization issued
//!    (`WAITING_FOR_TX`)
//! 2. `accept_transaction` → client's signed transaction broadcast
//!    (`PENDING`), or broadcast rejected (`FAILED` + refund)
//! 3. withdrawal event / failed receipt → `SUCCESS`, or `FAILED` + refund
//!
//! Only the winner of the conditional transition into `FAILED` or
//! `CANCELLED` refunds, and the refund itself is reserved in the store before
//! the credit, so a redelivered event cannot refund twice. A credit that
//! fails is logged to the settlement error log and retried by
//! [`WithdrawalLedger::recover`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{debug, error, info, warn};

use paygate_chain::{ChainAdapter, ChainRegistry, EventHandler, SignValue, TrackedTransaction};
use paygate_store::{ErrorLogEntry, Store};
use paygate_types::amount;
use paygate_types::constants::{WITHDRAWAL_FAILED_EVENT, WITHDRAWAL_SUCCESS_EVENT};
use paygate_types::{
    ChainEvent, ChainId, EventKind, EventPayload, PaygateError, RequestStatus, Result,
    TransactionFailedEvent, TransactionId, UserId, WithdrawalAuthorization, WithdrawalConfig,
    WithdrawalId, WithdrawalRequest,
};

use crate::collaborators::CurrencyLedger;
use crate::guard::KeyedLocks;
use crate::session::Notifier;

/// Outcome of [`WithdrawalLedger::recover`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WithdrawalRecoveryReport {
    /// Receipt trackers re-attached to `PENDING` withdrawals.
    pub trackers: usize,
    /// Failed or cancelled withdrawals whose debit was returned now.
    pub refunds: usize,
}

pub struct WithdrawalLedger {
    chains: Arc<ChainRegistry>,
    store: Arc<dyn Store>,
    ledger: Arc<dyn CurrencyLedger>,
    notifier: Arc<dyn Notifier>,
    config: WithdrawalConfig,
    user_locks: KeyedLocks<UserId>,
}

impl WithdrawalLedger {
    pub fn new(
        chains: Arc<ChainRegistry>,
        store: Arc<dyn Store>,
        ledger: Arc<dyn CurrencyLedger>,
        notifier: Arc<dyn Notifier>,
        config: WithdrawalConfig,
    ) -> Self {
        Self {
            chains,
            store,
            ledger,
            notifier,
            config,
            user_locks: KeyedLocks::new(),
        }
    }

    /// Subscribe to both withdrawal events and `TransactionFailed`.
    pub async fn subscribe(self: &Arc<Self>) {
        let handler: Arc<dyn EventHandler> = Arc::clone(self) as Arc<dyn EventHandler>;
        for kind in [
            EventKind::DividendWithdrawal,
            EventKind::DividendTokenWithdrawal,
            EventKind::TransactionFailed,
        ] {
            self.chains.on(kind, Arc::clone(&handler)).await;
        }
    }

    #[must_use]
    pub fn currency(&self) -> &str {
        &self.config.currency
    }

    // =================================================================
    // Requests
    // =================================================================

    /// Debit `amount` and issue a signed withdrawal authorization to `address`.
    ///
    /// `amount` is truncated to the reward token's precision first; the
    /// truncated value is what gets debited and paid out.
    ///
    /// # Errors
    /// - `InvalidAddress` / `InvalidAmount` / `InsufficientBalance`
    /// - `WithdrawalAlreadyPending` if the user has a live withdrawal
    /// - chain errors from the nonce lookup or signer (the debit is refunded)
    pub async fn request_withdrawal(
        &self,
        user_id: UserId,
        address: &str,
        amount: Decimal,
    ) -> Result<WithdrawalAuthorization> {
        let adapter = self.chains.get(&self.config.chain)?;
        if !adapter.is_address(address) {
            return Err(PaygateError::InvalidAddress(address.to_string()));
        }
        let address = adapter.canonical_address(address)?;
        let amount = amount::truncate_decimal(amount, adapter.reward_decimals())?;
        if amount <= Decimal::ZERO {
            return Err(PaygateError::InvalidAmount {
                reason: "withdrawal amount must be positive".into(),
            });
        }
        if amount < self.config.min_amount {
            return Err(PaygateError::InvalidAmount {
                reason: format!("minimum withdrawal is {}", self.config.min_amount),
            });
        }

        let _lock = self.user_locks.lock(user_id).await;
        if self.store.active_withdrawal(user_id).await?.is_some() {
            return Err(PaygateError::WithdrawalAlreadyPending(user_id));
        }
        let available = self.ledger.balance(user_id, &self.config.currency).await?;
        if available < amount {
            return Err(PaygateError::InsufficientBalance {
                needed: amount,
                available,
            });
        }

        let remaining = self
            .ledger
            .debit(user_id, &self.config.currency, amount)
            .await?;
        debug!(user_id = %user_id, amount = %amount, remaining = %remaining, "withdrawal debited");

        match self
            .authorize(adapter.as_ref(), user_id, address, amount)
            .await
        {
            Ok(request) => {
                info!(
                    withdrawal_id = %request.id,
                    user_id = %user_id,
                    amount = %amount,
                    chain = %request.chain,
                    "withdrawal authorized"
                );
                Ok(request.authorization())
            }
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "withdrawal authorization failed");
                self.refund_unrecorded(user_id, amount).await?;
                Err(e)
            }
        }
    }

    async fn authorize(
        &self,
        adapter: &dyn ChainAdapter,
        user_id: UserId,
        address: String,
        amount: Decimal,
    ) -> Result<WithdrawalRequest> {
        let token_amount = amount::decimal_to_fixed_point(amount, adapter.reward_decimals())?;
        let nonce = adapter.dividend_token_nonce(&address).await?;
        let signature = adapter
            .sign(&[
                SignValue::from(address.as_str()),
                SignValue::from(token_amount),
                SignValue::from(nonce),
            ])
            .await?;
        let now = Utc::now();
        let request = WithdrawalRequest {
            id: WithdrawalId::new(),
            user_id,
            chain: adapter.chain_id().clone(),
            address,
            amount,
            token_amount,
            nonce,
            signature,
            status: RequestStatus::WaitingForTx,
            transaction_id: None,
            block_number: None,
            refunded: false,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_withdrawal(request.clone()).await?;
        Ok(request)
    }

    /// Broadcast the client's signed transaction for its waiting withdrawal.
    ///
    /// A rejected broadcast fails the withdrawal, refunds the debit, notifies
    /// the user and returns the broadcast error.
    pub async fn accept_transaction(
        &self,
        user_id: UserId,
        signed: &str,
    ) -> Result<WithdrawalRequest> {
        let _lock = self.user_locks.lock(user_id).await;
        let request = self
            .store
            .active_withdrawal(user_id)
            .await?
            .filter(|w| w.status == RequestStatus::WaitingForTx)
            .ok_or(PaygateError::NoWithdrawalAwaitingTx(user_id))?;
        let adapter = self.chains.get(&request.chain)?;

        let tx = match adapter.send_transaction(signed).await {
            Ok(tx) => tx,
            Err(e) => {
                warn!(withdrawal_id = %request.id, error = %e, "withdrawal broadcast rejected");
                self.fail(&request, &e.to_string()).await?;
                return Err(e);
            }
        };

        if !self
            .store
            .attach_withdrawal_transaction(request.id, &tx)
            .await?
        {
            let current = self.withdrawal(request.id).await?;
            return Err(PaygateError::InvalidTransition {
                status: current.status,
            });
        }
        self.track(adapter.as_ref(), &request, tx.clone())?;
        info!(withdrawal_id = %request.id, tx = %tx, "withdrawal transaction accepted");
        self.withdrawal(request.id).await
    }

    /// Cancel a withdrawal that was never broadcast and refund it.
    pub async fn cancel_withdrawal(&self, user_id: UserId) -> Result<WithdrawalRequest> {
        let _lock = self.user_locks.lock(user_id).await;
        let request = self
            .store
            .active_withdrawal(user_id)
            .await?
            .ok_or(PaygateError::NoWithdrawalAwaitingTx(user_id))?;
        let cancelled = self
            .store
            .transition_withdrawal(
                request.id,
                &[RequestStatus::WaitingForTx],
                RequestStatus::Cancelled,
                None,
            )
            .await?;
        if !cancelled {
            return Err(PaygateError::InvalidTransition {
                status: request.status,
            });
        }
        info!(withdrawal_id = %request.id, user_id = %user_id, "withdrawal cancelled");
        self.refund(&request).await?;
        self.withdrawal(request.id).await
    }

    pub async fn active_withdrawal(&self, user_id: UserId) -> Result<Option<WithdrawalRequest>> {
        self.store.active_withdrawal(user_id).await
    }

    async fn withdrawal(&self, id: WithdrawalId) -> Result<WithdrawalRequest> {
        self.store
            .get_withdrawal(id)
            .await?
            .ok_or(PaygateError::WithdrawalNotFound(id))
    }

    fn track(
        &self,
        adapter: &dyn ChainAdapter,
        request: &WithdrawalRequest,
        tx: TransactionId,
    ) -> Result<()> {
        self.chains.track_transaction(
            &request.chain,
            TrackedTransaction {
                tx,
                contract_address: adapter.reward_token_address().to_string(),
                user_id: Some(request.user_id),
                payload: json!({ "withdrawalId": request.id.to_string() }),
            },
        )?;
        Ok(())
    }

    // =================================================================
    // Compensation
    // =================================================================

    /// Move a live withdrawal to `FAILED`; the winner of that transition
    /// refunds and notifies. Returns whether this call won.
    async fn fail(&self, request: &WithdrawalRequest, reason: &str) -> Result<bool> {
        let failed = self
            .store
            .transition_withdrawal(
                request.id,
                &RequestStatus::NON_TERMINAL,
                RequestStatus::Failed,
                None,
            )
            .await?;
        if !failed {
            debug!(withdrawal_id = %request.id, "withdrawal already terminal");
            return Ok(false);
        }
        self.refund(request).await?;
        self.notifier
            .notify_user(
                request.user_id,
                WITHDRAWAL_FAILED_EVENT,
                json!({
                    "withdrawalId": request.id.to_string(),
                    "amount": request.amount,
                    "reason": reason,
                }),
            )
            .await;
        Ok(true)
    }

    /// Return the debit of a failed or cancelled withdrawal, once. A failing
    /// credit releases the reservation and goes to the error log; `recover`
    /// retries it. Returns whether the balance was credited.
    async fn refund(&self, request: &WithdrawalRequest) -> Result<bool> {
        if !self.store.begin_withdrawal_refund(request.id).await? {
            debug!(withdrawal_id = %request.id, "refund already done");
            return Ok(false);
        }
        match self
            .ledger
            .credit(request.user_id, &self.config.currency, request.amount)
            .await
        {
            Ok(balance) => {
                info!(
                    withdrawal_id = %request.id,
                    user_id = %request.user_id,
                    amount = %request.amount,
                    balance = %balance,
                    "withdrawal refunded"
                );
                Ok(true)
            }
            Err(e) => {
                error!(
                    withdrawal_id = %request.id,
                    user_id = %request.user_id,
                    amount = %request.amount,
                    error = %e,
                    "withdrawal refund failed"
                );
                self.store.abort_withdrawal_refund(request.id).await?;
                self.store
                    .record(ErrorLogEntry::new(
                        request.chain.clone(),
                        EventKind::DividendWithdrawal,
                        request.id.to_string(),
                        request.transaction_id.clone(),
                        format!("refund of {} failed: {e}", request.amount),
                    ))
                    .await?;
                Ok(false)
            }
        }
    }

    /// Credit back a debit that never became a withdrawal record.
    async fn refund_unrecorded(&self, user_id: UserId, amount: Decimal) -> Result<()> {
        if let Err(e) = self
            .ledger
            .credit(user_id, &self.config.currency, amount)
            .await
        {
            error!(user_id = %user_id, amount = %amount, error = %e, "debit refund failed");
            self.store
                .record(ErrorLogEntry::new(
                    self.config.chain.clone(),
                    EventKind::DividendWithdrawal,
                    user_id.to_string(),
                    None,
                    format!("refund of unauthorized debit {amount} failed: {e}"),
                ))
                .await?;
        }
        Ok(())
    }

    // =================================================================
    // Reconciliation
    // =================================================================

    async fn on_withdrawal_event(
        &self,
        chain: &ChainId,
        kind: EventKind,
        tx: &TransactionId,
        success: bool,
        block_number: Option<u64>,
    ) -> Result<()> {
        let Some(request) = self
            .store
            .find_withdrawal_by_transaction(tx)
            .await?
            .filter(|w| &w.chain == chain)
        else {
            warn!(chain = %chain, event = %kind, tx = %tx, "withdrawal event matches no request");
            return self
                .store
                .record(ErrorLogEntry::new(
                    chain.clone(),
                    kind,
                    tx.as_str(),
                    Some(tx.clone()),
                    "withdrawal event matches no request",
                ))
                .await;
        };

        if !success {
            if self.fail(&request, "withdrawal reverted on-chain").await? {
                warn!(withdrawal_id = %request.id, tx = %tx, "withdrawal failed on-chain");
            }
            return Ok(());
        }

        let settled = self
            .store
            .transition_withdrawal(
                request.id,
                &[RequestStatus::Pending],
                RequestStatus::Success,
                block_number,
            )
            .await?;
        if !settled {
            debug!(
                withdrawal_id = %request.id,
                status = %request.status,
                "withdrawal event redelivered"
            );
            return Ok(());
        }
        info!(withdrawal_id = %request.id, tx = %tx, "withdrawal confirmed");
        self.notifier
            .notify_user(
                request.user_id,
                WITHDRAWAL_SUCCESS_EVENT,
                json!({
                    "withdrawalId": request.id.to_string(),
                    "amount": request.amount,
                    "transactionId": tx,
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
            .eq_ignore_ascii_case(adapter.reward_token_address())
        {
            return Ok(());
        }
        let Some(request) = self
            .store
            .find_withdrawal_by_transaction(&event.transaction_id)
            .await?
        else {
            warn!(
                chain = %chain,
                tx = %event.transaction_id,
                "failed transaction matches no withdrawal"
            );
            return self
                .store
                .record(ErrorLogEntry::new(
                    chain.clone(),
                    EventKind::TransactionFailed,
                    event.transaction_id.as_str(),
                    Some(event.transaction_id.clone()),
                    "failed transaction matches no withdrawal",
                ))
                .await;
        };
        if request.status != RequestStatus::Pending {
            return Ok(());
        }
        if self.fail(&request, &event.reason).await? {
            warn!(
                withdrawal_id = %request.id,
                tx = %event.transaction_id,
                reason = %event.reason,
                "withdrawal transaction failed"
            );
        }
        Ok(())
    }

    // =================================================================
    // Recovery
    // =================================================================

    /// Startup recovery: re-attach receipt trackers for every `PENDING`
    /// withdrawal, then retry refunds that never went through.
    pub async fn recover(&self) -> Result<WithdrawalRecoveryReport> {
        let mut report = WithdrawalRecoveryReport::default();
        for request in self
            .store
            .withdrawals_with_status(RequestStatus::Pending)
            .await?
        {
            let Some(tx) = request.transaction_id.clone() else {
                warn!(withdrawal_id = %request.id, "pending withdrawal has no transaction");
                continue;
            };
            let tracked = self
                .chains
                .get(&request.chain)
                .and_then(|adapter| self.track(adapter.as_ref(), &request, tx));
            match tracked {
                Ok(()) => report.trackers += 1,
                Err(e) => warn!(withdrawal_id = %request.id, error = %e, "tracker not re-attached"),
            }
        }
        for request in self.store.unrefunded_withdrawals().await? {
            if self.refund(&request).await? {
                report.refunds += 1;
            }
        }
        info!(
            trackers = report.trackers,
            refunds = report.refunds,
            "withdrawal recovery complete"
        );
        Ok(report)
    }
}

#[async_trait]
impl EventHandler for WithdrawalLedger {
    async fn handle(&self, event: &ChainEvent) -> Result<()> {
        match &event.payload {
            EventPayload::DividendWithdrawal(e) => {
                self.on_withdrawal_event(
                    &event.chain,
                    EventKind::DividendWithdrawal,
                    &e.transaction_hash,
                    e.success,
                    Some(e.block_number),
                )
                .await
            }
            EventPayload::DividendTokenWithdrawal(e) => {
                self.on_withdrawal_event(
                    &event.chain,
                    EventKind::DividendTokenWithdrawal,
                    &e.tx,
                    e.success,
                    None,
                )
                .await
            }
            EventPayload::TransactionFailed(e) => self.on_transaction_failed(&event.chain, e).await,
            EventPayload::Payment(_) => Ok(()),
        }
    }
}
