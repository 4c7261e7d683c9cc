//! Domain events emitted by chain adapters.
//!
//! Each event name has exactly one payload schema. Consumers subscribe per
//! [`EventKind`] and receive a [`ChainEvent`] whose [`EventPayload`] variant
//! always matches that kind.

use serde::{Deserialize, Serialize};

use crate::{ChainId, TransactionId, U256, UserId};

/// The event names an adapter can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum EventKind {
    /// The gateway contract accepted a payment authorization.
    Payment,
    /// A tracked transaction was reverted or its receipt reports failure.
    TransactionFailed,
    /// Native dividend payout processed by the gateway.
    DividendWithdrawal,
    /// Reward-token withdrawal processed by the token contract.
    DividendTokenWithdrawal,
}

impl EventKind {
    /// Every kind, in dispatch order.
    pub const ALL: [Self; 4] = [
        Self::Payment,
        Self::TransactionFailed,
        Self::DividendWithdrawal,
        Self::DividendTokenWithdrawal,
    ];

    /// Event name as stored in checkpoints and logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Payment => "Payment",
            Self::TransactionFailed => "TransactionFailed",
            Self::DividendWithdrawal => "DividendWithdrawal",
            Self::DividendTokenWithdrawal => "DividendTokenWithdrawal",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// `Payment {paymentId, transactionHash, blockNumber, reward-credit}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentEvent {
    /// Raw id echoed by the contract; may not parse if the call was forged.
    pub payment_id: String,
    pub transaction_hash: TransactionId,
    pub block_number: u64,
    /// Reward credit ("divs") minted by the contract for this payment.
    pub reward_credit: U256,
}

/// `TransactionFailed {transactionId, payload, userId, reason, contractAddress}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionFailedEvent {
    pub transaction_id: TransactionId,
    /// Whatever context the submitter attached when tracking started.
    pub payload: serde_json::Value,
    pub user_id: Option<UserId>,
    pub reason: String,
    /// Contract the failed transaction was sent to.
    pub contract_address: String,
}

/// `DividendWithdrawal {success, to, withdrawalId, amount, blockNumber, transactionHash}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DividendWithdrawalEvent {
    pub success: bool,
    pub to: String,
    pub withdrawal_id: String,
    pub amount: U256,
    pub block_number: u64,
    pub transaction_hash: TransactionId,
}

/// `DividendTokenWithdrawal {success, to, amount, timestamp, tx}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DividendTokenWithdrawalEvent {
    pub success: bool,
    pub to: String,
    pub amount: U256,
    pub timestamp: u64,
    pub tx: TransactionId,
}

/// Typed payload of a [`ChainEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum EventPayload {
    Payment(PaymentEvent),
    TransactionFailed(TransactionFailedEvent),
    DividendWithdrawal(DividendWithdrawalEvent),
    DividendTokenWithdrawal(DividendTokenWithdrawalEvent),
}

impl EventPayload {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Payment(_) => EventKind::Payment,
            Self::TransactionFailed(_) => EventKind::TransactionFailed,
            Self::DividendWithdrawal(_) => EventKind::DividendWithdrawal,
            Self::DividendTokenWithdrawal(_) => EventKind::DividendTokenWithdrawal,
        }
    }

    /// Transaction the event refers to.
    #[must_use]
    pub fn transaction_id(&self) -> &TransactionId {
        match self {
            Self::Payment(e) => &e.transaction_hash,
            Self::TransactionFailed(e) => &e.transaction_id,
            Self::DividendWithdrawal(e) => &e.transaction_hash,
            Self::DividendTokenWithdrawal(e) => &e.tx,
        }
    }
}

/// An event observed on (or derived from) an external ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainEvent {
    pub chain: ChainId,
    /// Ledger-native position of the event (block number or timestamp).
    pub cursor: u64,
    pub payload: EventPayload,
}

impl ChainEvent {
    #[must_use]
    pub fn new(chain: ChainId, cursor: u64, payload: EventPayload) -> Self {
        Self {
            chain,
            cursor,
            payload,
        }
    }

    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}
