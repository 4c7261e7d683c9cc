//! Store traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use paygate_types::{
    ChainId, Checkpoint, EventKind, PaymentId, PaymentKey, PaymentRequest, RequestStatus, Result,
    TransactionId, UserId, WithdrawalId, WithdrawalRequest,
};

/// Result of applying a confirmed `Payment` event to its request.
#[derive(Debug, Clone)]
pub enum SettleOutcome {
    /// This call moved the request to `Success`; fulfillment is due.
    Settled(PaymentRequest),
    /// Already `Success` but never claimed (an earlier fulfillment failed).
    AwaitingFulfillment(PaymentRequest),
    /// Already `Success` and claimed: nothing to do.
    AlreadyClaimed,
    /// The request ended `Failed` or `Cancelled` before the event arrived.
    Terminal(RequestStatus),
    /// No request with this id on this chain.
    NotFound,
}

/// Payment request persistence.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Insert a new request.
    ///
    /// Fails with `PaymentAlreadyPending` if a non-terminal request already
    /// occupies the same [`PaymentKey`]; the check and the insert are atomic.
    async fn insert_payment(&self, request: PaymentRequest) -> Result<()>;

    /// The non-terminal request occupying `key`, if any.
    async fn find_active_payment(&self, key: &PaymentKey) -> Result<Option<PaymentRequest>>;

    async fn get_payment(&self, id: PaymentId) -> Result<Option<PaymentRequest>>;

    /// Store the authorization signature of a freshly inserted request.
    async fn set_payment_signature(&self, id: PaymentId, signature: &str) -> Result<()>;

    /// Move `id` to `to` if its current status is one of `from`.
    /// Returns `false` when the condition did not hold.
    async fn transition_payment(
        &self,
        id: PaymentId,
        from: &[RequestStatus],
        to: RequestStatus,
    ) -> Result<bool>;

    /// `WaitingForTx -> Pending`, recording the submitted transaction.
    async fn attach_payment_transaction(&self, id: PaymentId, tx: &TransactionId) -> Result<bool>;

    /// Apply a confirmed payment: non-terminal -> `Success` with the
    /// transaction hash and block number recorded.
    async fn settle_payment(
        &self,
        id: PaymentId,
        chain: &ChainId,
        tx: &TransactionId,
        block_number: u64,
    ) -> Result<SettleOutcome>;

    /// Take the fulfillment lease of a `Success`, unclaimed request for
    /// `owner` until `expires_at`. Fails (`false`) while another owner holds
    /// a live lease or once the request is claimed.
    async fn acquire_fulfillment_lease(
        &self,
        id: PaymentId,
        owner: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Drop `owner`'s lease without claiming, e.g. after the action failed.
    async fn release_fulfillment_lease(&self, id: PaymentId, owner: &str) -> Result<()>;

    /// Flip `claimed` on a `Success` request and drop its lease. Returns
    /// `true` for exactly one caller.
    async fn claim_payment(&self, id: PaymentId) -> Result<bool>;

    /// Requests currently in `status`, oldest first.
    async fn payments_with_status(&self, status: RequestStatus) -> Result<Vec<PaymentRequest>>;

    async fn find_payment_by_transaction(
        &self,
        tx: &TransactionId,
    ) -> Result<Option<PaymentRequest>>;

    /// `Success` requests whose fulfillment never completed, oldest first.
    async fn unclaimed_payments(&self) -> Result<Vec<PaymentRequest>>;
}

/// Withdrawal request persistence.
#[async_trait]
pub trait WithdrawalStore: Send + Sync {
    /// Insert a new request. Fails with `WithdrawalAlreadyPending` if the
    /// user already has a non-terminal withdrawal; check and insert are atomic.
    async fn insert_withdrawal(&self, request: WithdrawalRequest) -> Result<()>;

    /// The user's non-terminal withdrawal, if any.
    async fn active_withdrawal(&self, user_id: UserId) -> Result<Option<WithdrawalRequest>>;

    async fn get_withdrawal(&self, id: WithdrawalId) -> Result<Option<WithdrawalRequest>>;

    /// `WaitingForTx -> Pending`, recording the broadcast transaction.
    async fn attach_withdrawal_transaction(
        &self,
        id: WithdrawalId,
        tx: &TransactionId,
    ) -> Result<bool>;

    /// Move `id` to `to` if its current status is one of `from`, recording
    /// the block number when one is given.
    async fn transition_withdrawal(
        &self,
        id: WithdrawalId,
        from: &[RequestStatus],
        to: RequestStatus,
        block_number: Option<u64>,
    ) -> Result<bool>;

    async fn find_withdrawal_by_transaction(
        &self,
        tx: &TransactionId,
    ) -> Result<Option<WithdrawalRequest>>;

    async fn withdrawals_with_status(
        &self,
        status: RequestStatus,
    ) -> Result<Vec<WithdrawalRequest>>;

    /// Reserve the refund of a failed or cancelled withdrawal. Returns `true`
    /// for exactly one caller, who must then credit the debit back.
    async fn begin_withdrawal_refund(&self, id: WithdrawalId) -> Result<bool>;

    /// Undo [`begin_withdrawal_refund`](Self::begin_withdrawal_refund) after
    /// the credit failed, so recovery retries it.
    async fn abort_withdrawal_refund(&self, id: WithdrawalId) -> Result<()>;

    /// Failed or cancelled withdrawals whose debit was never returned.
    async fn unrefunded_withdrawals(&self) -> Result<Vec<WithdrawalRequest>>;
}

/// Scanner cursor persistence.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load_checkpoint(&self, chain: &ChainId, event: EventKind)
    -> Result<Option<Checkpoint>>;

    /// Persist `last_scan` for `(chain, event)`. A value below the stored one
    /// is ignored; the returned value is what is stored afterwards.
    async fn save_checkpoint(&self, chain: &ChainId, event: EventKind, last_scan: u64)
    -> Result<u64>;
}

/// One unresolved reconciliation event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub chain: ChainId,
    pub event: EventKind,
    /// Raw request reference carried by the event (payment id, withdrawal id
    /// or transaction hash).
    pub reference: String,
    pub transaction_id: Option<TransactionId>,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

impl ErrorLogEntry {
    #[must_use]
    pub fn new(
        chain: ChainId,
        event: EventKind,
        reference: impl Into<String>,
        transaction_id: Option<TransactionId>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            chain,
            event,
            reference: reference.into(),
            transaction_id,
            reason: reason.into(),
            recorded_at: Utc::now(),
        }
    }
}

/// Append-only log of reconciliation events that could not be applied.
#[async_trait]
pub trait SettlementErrorLog: Send + Sync {
    async fn record(&self, entry: ErrorLogEntry) -> Result<()>;

    /// Every entry, in recording order.
    async fn entries(&self) -> Result<Vec<ErrorLogEntry>>;
}

/// Everything the engine persists.
pub trait Store: PaymentStore + WithdrawalStore + CheckpointStore + SettlementErrorLog {}

impl<T> Store for T where T: PaymentStore + WithdrawalStore + CheckpointStore + SettlementErrorLog {}
