//! # paygate-settlement
//!
//! Game-side settlement on top of the chain plumbing.
//!
//! ## Architecture
//!
//! ```text
//!  game feature ──request_payment──▶ PaymentAuthority ──sign──▶ ChainAdapter
//!                                         ▲      │
//!             Payment / TransactionFailed │      └─▶ ActionRegistry ─▶ fulfillment
//!                                         │      └─▶ Notifier (SessionRegistry)
//!  user ──request_withdrawal──▶ WithdrawalLedger ──debit / refund──▶ CurrencyLedger
//!                                         ▲
//!          DividendWithdrawal / DividendTokenWithdrawal / TransactionFailed
//! ```
//!
//! Both consumers are [`EventHandler`](paygate_chain::EventHandler)s fed by
//! the chain registry's scanners and trackers, and both are idempotent
//! against redelivery: every effect is gated by a conditional store write.

pub mod actions;
pub mod authority;
pub mod collaborators;
pub mod guard;
pub mod session;
pub mod withdrawal;

pub use actions::{ActionRegistry, Fulfillment};
pub use authority::{PaymentAuthority, RecoveryReport};
pub use collaborators::{
    CurrencyLedger, FixedRateOracle, MemoryLedger, PriceOracle, ProductCatalog, StaticCatalog,
};
pub use guard::{FulfillmentGuard, KeyedLocks};
pub use session::{Notification, Notifier, SessionRegistry};
pub use withdrawal::{WithdrawalLedger, WithdrawalRecoveryReport};
