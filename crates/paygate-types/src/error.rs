//! Error types for the Paygate settlement engine.
//!
//! All errors use the `PG_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by how the caller is expected to react:
//! - 1xx: Validation errors (rejected synchronously)
//! - 2xx: Conflict errors (duplicate pending request)
//! - 3xx: Chain communication errors (logged, retried by background loops)
//! - 4xx: Settlement inconsistencies (logged to the error table, never thrown by reconciliation)
//! - 5xx: Transaction failures (trigger compensation)
//! - 6xx: Fulfillment errors
//! - 9xx: General / internal errors

use rust_decimal::Decimal;
use thiserror::Error;

use crate::{ChainId, PaymentId, ProductId, RequestStatus, UserId, WithdrawalId};

/// Central error enum for all Paygate operations.
#[derive(Debug, Error)]
pub enum PaygateError {
    // =================================================================
    // Validation Errors (1xx)
    // =================================================================
    /// No fulfillment or price is registered for this product.
    #[error("PG_ERR_100: Unknown product: {0}")]
    UnknownProduct(ProductId),

    /// No adapter is registered for this chain.
    #[error("PG_ERR_101: Unknown chain: {0}")]
    UnknownChain(ChainId),

    /// The string is not a valid address on the target ledger.
    #[error("PG_ERR_102: Invalid address: {0}")]
    InvalidAddress(String),

    /// An amount is zero, negative, malformed, or out of range.
    #[error("PG_ERR_103: Invalid amount: {reason}")]
    InvalidAmount { reason: String },

    /// Not enough game currency to perform the operation.
    #[error("PG_ERR_104: Insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: Decimal, available: Decimal },

    /// The payment request does not exist or belongs to another user.
    #[error("PG_ERR_105: Payment request not found: {0}")]
    PaymentNotFound(PaymentId),

    /// The withdrawal request does not exist or belongs to another user.
    #[error("PG_ERR_106: Withdrawal request not found: {0}")]
    WithdrawalNotFound(WithdrawalId),

    /// The user has no withdrawal waiting for a transaction.
    #[error("PG_ERR_107: No withdrawal awaiting a transaction for user {0}")]
    NoWithdrawalAwaitingTx(UserId),

    /// The request cannot move to the requested state from its current one.
    #[error("PG_ERR_108: Request is {status}, operation not allowed")]
    InvalidTransition { status: RequestStatus },

    // =================================================================
    // Conflict Errors (2xx)
    // =================================================================
    /// A non-terminal payment already exists for (user, tag, context).
    #[error("PG_ERR_200: Payment already pending for user {user_id} tag {tag}")]
    PaymentAlreadyPending { user_id: UserId, tag: String },

    /// The user already has a non-terminal withdrawal.
    #[error("PG_ERR_201: Withdrawal already pending for user {0}")]
    WithdrawalAlreadyPending(UserId),

    // =================================================================
    // Chain Communication Errors (3xx)
    // =================================================================
    /// An RPC / network call to the ledger failed.
    #[error("PG_ERR_300: Chain communication failed on {chain}: {reason}")]
    ChainCommunication { chain: ChainId, reason: String },

    /// A ledger log could not be decoded into a domain event.
    #[error("PG_ERR_301: Undecodable event on {chain}: {reason}")]
    EventDecode { chain: ChainId, reason: String },

    // =================================================================
    // Settlement Inconsistencies (4xx)
    // =================================================================
    /// An event references a request that does not exist or does not match.
    #[error("PG_ERR_400: Settlement inconsistency: {reason}")]
    SettlementInconsistency { reason: String },

    // =================================================================
    // Transaction Failures (5xx)
    // =================================================================
    /// The network rejected the broadcast outright.
    #[error("PG_ERR_500: Transaction rejected by {chain}: {reason}")]
    TransactionRejected { chain: ChainId, reason: String },

    /// The transaction was mined but its receipt reports failure.
    #[error("PG_ERR_501: Transaction failed on-chain: {reason}")]
    TransactionFailed { reason: String },

    // =================================================================
    // Fulfillment Errors (6xx)
    // =================================================================
    /// A registered fulfillment action returned an error.
    #[error("PG_ERR_600: Fulfillment of {product} failed: {reason}")]
    FulfillmentFailed { product: ProductId, reason: String },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("PG_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("PG_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config file, missing fields, etc.).
    #[error("PG_ERR_902: Configuration error: {0}")]
    Configuration(String),

    /// Persistence layer error.
    #[error("PG_ERR_903: Store error: {0}")]
    Store(String),

    /// Signing key or signature error.
    #[error("PG_ERR_904: Signing error: {0}")]
    Signing(String),

    /// I/O error (disk, network).
    #[error("PG_ERR_905: I/O error: {0}")]
    Io(String),
}

/// Coarse classification of a [`PaygateError`], used by outer layers to
/// decide between rejecting, retrying, and compensating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Conflict,
    ChainCommunication,
    SettlementInconsistency,
    TransactionFailure,
    Fulfillment,
    Internal,
}

impl PaygateError {
    /// The taxonomy bucket this error belongs to.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownProduct(_)
            | Self::UnknownChain(_)
            | Self::InvalidAddress(_)
            | Self::InvalidAmount { .. }
            | Self::InsufficientBalance { .. }
            | Self::PaymentNotFound(_)
            | Self::WithdrawalNotFound(_)
            | Self::NoWithdrawalAwaitingTx(_)
            | Self::InvalidTransition { .. } => ErrorKind::Validation,
            Self::PaymentAlreadyPending { .. } | Self::WithdrawalAlreadyPending(_) => {
                ErrorKind::Conflict
            }
            Self::ChainCommunication { .. } | Self::EventDecode { .. } => {
                ErrorKind::ChainCommunication
            }
            Self::SettlementInconsistency { .. } => ErrorKind::SettlementInconsistency,
            Self::TransactionRejected { .. } | Self::TransactionFailed { .. } => {
                ErrorKind::TransactionFailure
            }
            Self::FulfillmentFailed { .. } => ErrorKind::Fulfillment,
            Self::Internal(_)
            | Self::Serialization(_)
            | Self::Configuration(_)
            | Self::Store(_)
            | Self::Signing(_)
            | Self::Io(_) => ErrorKind::Internal,
        }
    }

    /// Shorthand for a [`PaygateError::ChainCommunication`] error.
    pub fn rpc(chain: &ChainId, reason: impl std::fmt::Display) -> Self {
        Self::ChainCommunication {
            chain: chain.clone(),
            reason: reason.to_string(),
        }
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, PaygateError>;

// Conversion from std::io::Error
impl From<std::io::Error> for PaygateError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for PaygateError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_contains_prefix() {
        let err = PaygateError::UnknownProduct(ProductId::new("gem_pack"));
        let msg = format!("{err}");
        assert!(msg.starts_with("PG_ERR_100"), "Got: {msg}");
        assert!(msg.contains("gem_pack"));
    }

    #[test]
    fn insufficient_balance_display() {
        let err = PaygateError::InsufficientBalance {
            needed: Decimal::new(100, 0),
            available: Decimal::new(50, 0),
        };
        let msg = format!("{err}");
        assert!(msg.contains("PG_ERR_104"));
        assert!(msg.contains("100"));
        assert!(msg.contains("50"));
    }

    #[test]
    fn invalid_transition_shows_status() {
        let err = PaygateError::InvalidTransition {
            status: RequestStatus::Success,
        };
        assert!(format!("{err}").contains("SUCCESS"));
    }

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(
            PaygateError::UnknownChain(ChainId::new("eth")).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            PaygateError::WithdrawalAlreadyPending(UserId::new()).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            PaygateError::rpc(&ChainId::new("eth"), "timeout").kind(),
            ErrorKind::ChainCommunication
        );
        assert_eq!(
            PaygateError::TransactionRejected {
                chain: ChainId::new("eth"),
                reason: "nonce too low".into(),
            }
            .kind(),
            ErrorKind::TransactionFailure
        );
        assert_eq!(
            PaygateError::Store("down".into()).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn all_errors_have_pg_err_prefix() {
        let errors: Vec<Box<dyn std::error::Error>> = vec![
            Box::new(PaygateError::PaymentNotFound(PaymentId::new())),
            Box::new(PaygateError::SettlementInconsistency {
                reason: "unknown id".into(),
            }),
            Box::new(PaygateError::TransactionFailed {
                reason: "reverted".into(),
            }),
            Box::new(PaygateError::Internal("test".into())),
            Box::new(PaygateError::FulfillmentFailed {
                product: ProductId::new("x"),
                reason: "boom".into(),
            }),
        ];
        for err in errors {
            let msg = format!("{err}");
            assert!(
                msg.starts_with("PG_ERR_"),
                "Error missing PG_ERR_ prefix: {msg}"
            );
        }
    }
}
