//! # paygate-chain
//!
//! Ledger plumbing for Paygate.
//!
//! ## Architecture
//!
//! ```text
//!  ChainAdapter ──▶ EventScanner (one per watched event) ──┐
//!       │                                                  ├──▶ EventDispatcher ──▶ EventHandler(s)
//!       └─────────▶ TransactionTracker (one per tx) ───────┘
//!                     (failed receipt -> TransactionFailed)
//! ```
//!
//! - [`ChainAdapter`]: sign / verify / broadcast / nonces / history / receipts
//! - [`encoding`]: the canonical authorization payload every contract verifies
//! - [`EvmAdapter`]: alloy-backed implementation
//! - [`EventScanner`]: checkpointed at-least-once history walker
//! - [`TransactionTracker`]: unbounded fixed-interval receipt polling
//! - [`ChainRegistry`]: adapters by chain id, typed subscriptions, task ownership

pub mod adapter;
pub mod encoding;
pub mod evm;
#[cfg(any(test, feature = "test-helpers"))]
pub mod mock;
pub mod registry;
pub mod scanner;
pub mod tracker;

pub use adapter::{ChainAdapter, ScanSettings, TxStatus};
pub use encoding::{AuthoritySigner, SignValue};
pub use evm::{EvmAdapter, EvmAdapterBuilder};
#[cfg(any(test, feature = "test-helpers"))]
pub use mock::MockChain;
pub use registry::{ChainRegistry, EventDispatcher, EventHandler};
pub use scanner::{CycleReport, EventScanner};
pub use tracker::{TrackedTransaction, TransactionTracker};
