//! Request lifecycle shared by payments and withdrawals.
//!
//! ```text
//!   ┌──────────────┐  tx submitted  ┌─────────┐  event / receipt ok  ┌─────────┐
//!   │ WAITING_FOR_TX├──────────────▶│ PENDING ├─────────────────────▶│ SUCCESS │
//!   └──────┬───────┘                └────┬────┘                      └─────────┘
//!          │ cancel / reject             │ failure event / cancel
//!          ▼                             ▼
//!   ┌─────────────────────┐      ┌──────────────────────┐
//!   │ CANCELLED / FAILED  │      │ FAILED / CANCELLED   │
//!   └─────────────────────┘      └──────────────────────┘
//! ```
//!
//! A payment event may also settle a request directly from `WAITING_FOR_TX`:
//! the client is not required to report its transaction hash.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a payment or withdrawal request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    /// Authorization issued; no transaction reported yet.
    WaitingForTx,
    /// A transaction was broadcast; awaiting its confirmation event.
    Pending,
    /// Confirmed on-chain.
    Success,
    /// Rejected at broadcast or reverted on-chain.
    Failed,
    /// Withdrawn by the user before confirmation.
    Cancelled,
}

impl RequestStatus {
    /// Statuses that still block a new request for the same key.
    pub const NON_TERMINAL: [Self; 2] = [Self::WaitingForTx, Self::Pending];

    /// Returns `true` once the request can no longer change.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }

    /// Can a request in this state move to the given target state?
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        matches!(
            (self, target),
            (
                Self::WaitingForTx,
                Self::Pending | Self::Success | Self::Failed | Self::Cancelled
            ) | (Self::Pending, Self::Success | Self::Failed | Self::Cancelled)
        )
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WaitingForTx => write!(f, "WAITING_FOR_TX"),
            Self::Pending => write!(f, "PENDING"),
            Self::Success => write!(f, "SUCCESS"),
            Self::Failed => write!(f, "FAILED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}
