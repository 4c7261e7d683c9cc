//! Withdrawal request model.
//!
//! Withdrawals are single-flight per user: the game balance is debited when
//! the request is created and refunded if the transaction never succeeds.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{ChainId, RequestStatus, TransactionId, U256, UserId, WithdrawalId};

/// A persisted withdrawal request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub id: WithdrawalId,
    pub user_id: UserId,
    pub chain: ChainId,
    /// Receiving wallet (canonical form).
    pub address: String,
    /// Amount debited from the game currency.
    pub amount: Decimal,
    /// The same amount in the reward token's fixed-point unit.
    pub token_amount: U256,
    /// Anti-replay nonce read from the reward token contract.
    pub nonce: U256,
    pub signature: String,
    pub status: RequestStatus,
    pub transaction_id: Option<TransactionId>,
    pub block_number: Option<u64>,
    /// The debit was credited back after a failure or cancellation.
    #[serde(default)]
    pub refunded: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WithdrawalRequest {
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Ended without paying out, and the debit has not been returned yet.
    #[must_use]
    pub fn owes_refund(&self) -> bool {
        matches!(self.status, RequestStatus::Failed | RequestStatus::Cancelled) && !self.refunded
    }

    /// The signed payload returned to the client.
    #[must_use]
    pub fn authorization(&self) -> WithdrawalAuthorization {
        WithdrawalAuthorization {
            withdrawal_id: self.id,
            address: self.address.clone(),
            amount: self.token_amount,
            nonce: self.nonce,
            signature: self.signature.clone(),
        }
    }
}

/// Signed payload the client uses to build its withdrawal transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalAuthorization {
    pub withdrawal_id: WithdrawalId,
    pub address: String,
    pub amount: U256,
    pub nonce: U256,
    pub signature: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_carries_token_amount() {
        let now = Utc::now();
        let req = WithdrawalRequest {
            id: WithdrawalId::new(),
            user_id: UserId::new(),
            chain: ChainId::new("ethereum"),
            address: "0x0000000000000000000000000000000000000001".into(),
            amount: Decimal::new(100, 0),
            token_amount: U256::from(100_000_000u64),
            nonce: U256::from(3u64),
            signature: "0xsig".into(),
            status: RequestStatus::WaitingForTx,
            transaction_id: None,
            block_number: None,
            refunded: false,
            created_at: now,
            updated_at: now,
        };
        assert!(req.is_active());
        assert!(!req.owes_refund());
        let auth = req.authorization();
        assert_eq!(auth.amount, U256::from(100_000_000u64));
        assert_eq!(auth.withdrawal_id, req.id);
    }
}
