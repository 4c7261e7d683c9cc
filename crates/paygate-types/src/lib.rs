//! # paygate-types
//!
//! Shared types, errors, and configuration for **Paygate**, the payment
//! authority that lets a game server accept value transfers on external
//! ledgers without trusting the client.
//!
//! This crate is the leaf dependency of the workspace; every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`PaymentId`], [`WithdrawalId`], [`UserId`], [`ChainId`], [`ProductId`], [`TransactionId`]
//! - **Request model**: [`PaymentRequest`], [`PaymentKey`], [`PaymentAuthorization`], [`RequestStatus`]
//! - **Withdrawal model**: [`WithdrawalRequest`], [`WithdrawalAuthorization`]
//! - **Scanner model**: [`Checkpoint`], [`ScanRange`]
//! - **Domain events**: [`ChainEvent`], [`EventKind`] and one payload struct per event
//! - **Amounts**: fixed-point conversion in [`amount`]
//! - **Configuration**: [`PaygateConfig`], [`ChainConfig`], [`PaymentConfig`], [`WithdrawalConfig`]
//! - **Errors**: [`PaygateError`] with `PG_ERR_` prefix codes
//! - **Constants**: system-wide defaults

pub mod amount;
pub mod checkpoint;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod ids;
pub mod payment;
pub mod status;
pub mod withdrawal;

// Re-export all primary types at crate root for ergonomic imports:
//   use paygate_types::{PaymentRequest, RequestStatus, ChainEvent, ...};

pub use checkpoint::*;
pub use config::*;
pub use error::*;
pub use events::*;
pub use ids::*;
pub use payment::*;
pub use status::*;
pub use withdrawal::*;

/// Arbitrary-precision on-chain integer (amounts, nonces, deadlines).
pub use alloy_primitives::U256;

// Constants and amount helpers are accessed via `paygate_types::constants::FOO`
// and `paygate_types::amount::to_fixed_point` (not re-exported to avoid name collisions).
