//! In-memory store.
//!
//! All state sits behind one mutex, so every trait method is one atomic
//! step, the same guarantee a single conditional SQL statement gives.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use paygate_types::{
    ChainId, Checkpoint, EventKind, FulfillmentLease, PaygateError, PaymentId, PaymentKey, PaymentRequest,
    RequestStatus, Result, TransactionId, UserId, WithdrawalId, WithdrawalRequest,
};

use crate::traits::{
    CheckpointStore, ErrorLogEntry, PaymentStore, SettleOutcome, SettlementErrorLog,
    WithdrawalStore,
};

#[derive(Default)]
struct State {
    /// Keyed by UUIDv7, so iteration order is creation order.
    payments: BTreeMap<PaymentId, PaymentRequest>,
    withdrawals: BTreeMap<WithdrawalId, WithdrawalRequest>,
    checkpoints: HashMap<(ChainId, EventKind), Checkpoint>,
    errors: Vec<ErrorLogEntry>,
}

/// Process-local implementation of every store trait.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn payment_mut(state: &mut State, id: PaymentId) -> Result<&mut PaymentRequest> {
    state
        .payments
        .get_mut(&id)
        .ok_or(PaygateError::PaymentNotFound(id))
}

fn withdrawal_mut(state: &mut State, id: WithdrawalId) -> Result<&mut WithdrawalRequest> {
    state
        .withdrawals
        .get_mut(&id)
        .ok_or(PaygateError::WithdrawalNotFound(id))
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn insert_payment(&self, request: PaymentRequest) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.payments.contains_key(&request.id) {
            return Err(PaygateError::Store(format!(
                "payment {} already exists",
                request.id
            )));
        }
        let key = request.key();
        if state
            .payments
            .values()
            .any(|p| p.is_active() && p.key() == key)
        {
            return Err(PaygateError::PaymentAlreadyPending {
                user_id: key.user_id,
                tag: key.tag,
            });
        }
        debug!(payment_id = %request.id, "payment inserted");
        state.payments.insert(request.id, request);
        Ok(())
    }

    async fn find_active_payment(&self, key: &PaymentKey) -> Result<Option<PaymentRequest>> {
        let state = self.state.lock().await;
        Ok(state
            .payments
            .values()
            .find(|p| p.is_active() && &p.key() == key)
            .cloned())
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Option<PaymentRequest>> {
        Ok(self.state.lock().await.payments.get(&id).cloned())
    }

    async fn set_payment_signature(&self, id: PaymentId, signature: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let payment = payment_mut(&mut state, id)?;
        payment.signature = signature.to_string();
        payment.updated_at = Utc::now();
        Ok(())
    }

    async fn transition_payment(
        &self,
        id: PaymentId,
        from: &[RequestStatus],
        to: RequestStatus,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        let payment = payment_mut(&mut state, id)?;
        if !from.contains(&payment.status) || !payment.status.can_transition_to(to) {
            return Ok(false);
        }
        payment.status = to;
        payment.updated_at = Utc::now();
        Ok(true)
    }

    async fn attach_payment_transaction(&self, id: PaymentId, tx: &TransactionId) -> Result<bool> {
        let mut state = self.state.lock().await;
        let payment = payment_mut(&mut state, id)?;
        if payment.status != RequestStatus::WaitingForTx {
            return Ok(false);
        }
        payment.status = RequestStatus::Pending;
        payment.transaction_id = Some(tx.clone());
        payment.updated_at = Utc::now();
        Ok(true)
    }

    async fn settle_payment(
        &self,
        id: PaymentId,
        chain: &ChainId,
        tx: &TransactionId,
        block_number: u64,
    ) -> Result<SettleOutcome> {
        let mut state = self.state.lock().await;
        let Some(payment) = state.payments.get_mut(&id) else {
            return Ok(SettleOutcome::NotFound);
        };
        if &payment.chain != chain {
            return Ok(SettleOutcome::NotFound);
        }
        let outcome = match payment.status {
            RequestStatus::WaitingForTx | RequestStatus::Pending => {
                payment.status = RequestStatus::Success;
                payment.transaction_id = Some(tx.clone());
                payment.block_number = Some(block_number);
                payment.updated_at = Utc::now();
                SettleOutcome::Settled(payment.clone())
            }
            RequestStatus::Success if payment.claimed => SettleOutcome::AlreadyClaimed,
            RequestStatus::Success => SettleOutcome::AwaitingFulfillment(payment.clone()),
            status @ (RequestStatus::Failed | RequestStatus::Cancelled) => {
                SettleOutcome::Terminal(status)
            }
        };
        Ok(outcome)
    }

    async fn acquire_fulfillment_lease(
        &self,
        id: PaymentId,
        owner: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        let payment = payment_mut(&mut state, id)?;
        if !payment.awaits_fulfillment() {
            return Ok(false);
        }
        let now = Utc::now();
        if let Some(lease) = &payment.fulfillment_lease {
            if lease.owner != owner && lease.is_live(now) {
                return Ok(false);
            }
            if lease.owner != owner {
                warn!(
                    payment_id = %id,
                    previous = %lease.owner,
                    "expired fulfillment lease taken over"
                );
            }
        }
        payment.fulfillment_lease = Some(FulfillmentLease {
            owner: owner.to_string(),
            expires_at,
        });
        payment.updated_at = now;
        Ok(true)
    }

    async fn release_fulfillment_lease(&self, id: PaymentId, owner: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let payment = payment_mut(&mut state, id)?;
        if payment
            .fulfillment_lease
            .as_ref()
            .is_some_and(|lease| lease.owner == owner)
        {
            payment.fulfillment_lease = None;
            payment.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn claim_payment(&self, id: PaymentId) -> Result<bool> {
        let mut state = self.state.lock().await;
        let payment = payment_mut(&mut state, id)?;
        if payment.status != RequestStatus::Success || payment.claimed {
            return Ok(false);
        }
        payment.claimed = true;
        payment.fulfillment_lease = None;
        payment.updated_at = Utc::now();
        Ok(true)
    }

    async fn payments_with_status(&self, status: RequestStatus) -> Result<Vec<PaymentRequest>> {
        let state = self.state.lock().await;
        Ok(state
            .payments
            .values()
            .filter(|p| p.status == status)
            .cloned()
            .collect())
    }

    async fn find_payment_by_transaction(
        &self,
        tx: &TransactionId,
    ) -> Result<Option<PaymentRequest>> {
        let state = self.state.lock().await;
        Ok(state
            .payments
            .values()
            .find(|p| p.transaction_id.as_ref() == Some(tx))
            .cloned())
    }

    async fn unclaimed_payments(&self) -> Result<Vec<PaymentRequest>> {
        let state = self.state.lock().await;
        Ok(state
            .payments
            .values()
            .filter(|p| p.awaits_fulfillment())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl WithdrawalStore for MemoryStore {
    async fn insert_withdrawal(&self, request: WithdrawalRequest) -> Result<()> {
        let mut state = self.state.lock().await;
        if state
            .withdrawals
            .values()
            .any(|w| w.is_active() && w.user_id == request.user_id)
        {
            return Err(PaygateError::WithdrawalAlreadyPending(request.user_id));
        }
        debug!(withdrawal_id = %request.id, "withdrawal inserted");
        state.withdrawals.insert(request.id, request);
        Ok(())
    }

    async fn active_withdrawal(&self, user_id: UserId) -> Result<Option<WithdrawalRequest>> {
        let state = self.state.lock().await;
        Ok(state
            .withdrawals
            .values()
            .find(|w| w.is_active() && w.user_id == user_id)
            .cloned())
    }

    async fn get_withdrawal(&self, id: WithdrawalId) -> Result<Option<WithdrawalRequest>> {
        Ok(self.state.lock().await.withdrawals.get(&id).cloned())
    }

    async fn attach_withdrawal_transaction(
        &self,
        id: WithdrawalId,
        tx: &TransactionId,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        let withdrawal = withdrawal_mut(&mut state, id)?;
        if withdrawal.status != RequestStatus::WaitingForTx {
            return Ok(false);
        }
        withdrawal.status = RequestStatus::Pending;
        withdrawal.transaction_id = Some(tx.clone());
        withdrawal.updated_at = Utc::now();
        Ok(true)
    }

    async fn transition_withdrawal(
        &self,
        id: WithdrawalId,
        from: &[RequestStatus],
        to: RequestStatus,
        block_number: Option<u64>,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        let withdrawal = withdrawal_mut(&mut state, id)?;
        if !from.contains(&withdrawal.status) || !withdrawal.status.can_transition_to(to) {
            return Ok(false);
        }
        withdrawal.status = to;
        if block_number.is_some() {
            withdrawal.block_number = block_number;
        }
        withdrawal.updated_at = Utc::now();
        Ok(true)
    }

    async fn find_withdrawal_by_transaction(
        &self,
        tx: &TransactionId,
    ) -> Result<Option<WithdrawalRequest>> {
        let state = self.state.lock().await;
        Ok(state
            .withdrawals
            .values()
            .find(|w| w.transaction_id.as_ref() == Some(tx))
            .cloned())
    }

    async fn withdrawals_with_status(
        &self,
        status: RequestStatus,
    ) -> Result<Vec<WithdrawalRequest>> {
        let state = self.state.lock().await;
        Ok(state
            .withdrawals
            .values()
            .filter(|w| w.status == status)
            .cloned()
            .collect())
    }

    async fn begin_withdrawal_refund(&self, id: WithdrawalId) -> Result<bool> {
        let mut state = self.state.lock().await;
        let withdrawal = withdrawal_mut(&mut state, id)?;
        if !withdrawal.owes_refund() {
            return Ok(false);
        }
        withdrawal.refunded = true;
        withdrawal.updated_at = Utc::now();
        Ok(true)
    }

    async fn abort_withdrawal_refund(&self, id: WithdrawalId) -> Result<()> {
        let mut state = self.state.lock().await;
        let withdrawal = withdrawal_mut(&mut state, id)?;
        withdrawal.refunded = false;
        withdrawal.updated_at = Utc::now();
        Ok(())
    }

    async fn unrefunded_withdrawals(&self) -> Result<Vec<WithdrawalRequest>> {
        let state = self.state.lock().await;
        Ok(state
            .withdrawals
            .values()
            .filter(|w| w.owes_refund())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn load_checkpoint(
        &self,
        chain: &ChainId,
        event: EventKind,
    ) -> Result<Option<Checkpoint>> {
        let state = self.state.lock().await;
        Ok(state.checkpoints.get(&(chain.clone(), event)).cloned())
    }

    async fn save_checkpoint(
        &self,
        chain: &ChainId,
        event: EventKind,
        last_scan: u64,
    ) -> Result<u64> {
        let mut state = self.state.lock().await;
        let checkpoint = state
            .checkpoints
            .entry((chain.clone(), event))
            .or_insert_with(|| Checkpoint::new(chain.clone(), event, last_scan));
        if !checkpoint.advance(last_scan) {
            warn!(
                chain = %chain,
                event = %event,
                stored = checkpoint.last_scan,
                attempted = last_scan,
                "ignoring checkpoint regression"
            );
        }
        Ok(checkpoint.last_scan)
    }
}

#[async_trait]
impl SettlementErrorLog for MemoryStore {
    async fn record(&self, entry: ErrorLogEntry) -> Result<()> {
        self.state.lock().await.errors.push(entry);
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<ErrorLogEntry>> {
        Ok(self.state.lock().await.errors.clone())
    }
}
