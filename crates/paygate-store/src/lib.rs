//! # paygate-store
//!
//! Persistence seam of Paygate.
//!
//! Every state change goes through one of the store traits below as a single
//! **conditional write** ("update where status = X"). Callers never read a
//! request, change it in memory and write it back: two workers racing on the
//! same request must see exactly one winner.
//!
//! - [`PaymentStore`]: payment requests and their settle/claim transitions
//! - [`WithdrawalStore`]: single-flight withdrawal requests
//! - [`CheckpointStore`]: monotonic scanner cursors
//! - [`SettlementErrorLog`]: append-only log of events that matched nothing
//!
//! [`MemoryStore`] implements all four behind one lock and is what the
//! engine's tests run against. A SQL backend implements the same traits,
//! with the payment uniqueness rule as a partial unique index on
//! `(user_id, tag, context_hash) WHERE status IN ('WAITING_FOR_TX', 'PENDING')`.

pub mod memory;
pub mod traits;

pub use memory::MemoryStore;
pub use traits::*;
