//! The capability set every ledger implementation provides.

use std::time::Duration;

use async_trait::async_trait;

use paygate_types::{
    ChainConfig, ChainEvent, ChainId, EventKind, Result, ScanMode, ScanRange, TransactionId, U256,
    amount,
};

use crate::encoding::SignValue;

/// What a receipt lookup says about a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    /// Mined and executed successfully.
    Succeeded,
    /// Mined with an explicit failure, or the receipt carries no result.
    Failed { reason: String },
    /// No receipt yet; keep polling.
    Unknown,
}

/// How the scanners of one chain walk its history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSettings {
    pub mode: ScanMode,
    /// Head minus this margin is the newest cursor ever acted on.
    pub confirmations: u64,
    /// Start cursor when no checkpoint exists.
    pub genesis: u64,
    /// Window length (block range) or page size (paged).
    pub window: u64,
    pub interval: Duration,
    pub receipt_poll_interval: Duration,
}

impl From<&ChainConfig> for ScanSettings {
    fn from(cfg: &ChainConfig) -> Self {
        Self {
            mode: cfg.scan_mode,
            confirmations: cfg.confirmations,
            genesis: cfg.genesis_cursor,
            window: cfg.scan_window,
            interval: Duration::from_millis(cfg.scan_interval_ms),
            receipt_poll_interval: Duration::from_millis(cfg.receipt_poll_interval_ms),
        }
    }
}

/// One external ledger.
///
/// Implementations are registered in a [`ChainRegistry`](crate::ChainRegistry)
/// under their [`ChainId`] and shared as `Arc<dyn ChainAdapter>`.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    fn chain_id(&self) -> &ChainId;

    /// Payment gateway contract; its address is the first signed argument of
    /// every payment authorization.
    fn gateway_address(&self) -> &str;

    /// Reward ("divs") token contract.
    fn reward_token_address(&self) -> &str;

    fn native_decimals(&self) -> u8;

    fn reward_decimals(&self) -> u8;

    fn scan_settings(&self) -> ScanSettings;

    /// Events this chain's scanners watch.
    fn watched_events(&self) -> Vec<EventKind> {
        vec![
            EventKind::Payment,
            EventKind::DividendWithdrawal,
            EventKind::DividendTokenWithdrawal,
        ]
    }

    /// Address of the authorization key.
    fn signer_address(&self) -> String;

    fn is_address(&self, value: &str) -> bool;

    /// Validated canonical form of an address.
    fn canonical_address(&self, value: &str) -> Result<String>;

    /// Sign the canonical encoding of `values`.
    async fn sign(&self, values: &[SignValue]) -> Result<String>;

    /// Off-chain check that `address` signed `nonce`. Never fails; malformed
    /// input is simply not a valid signature.
    fn verify_sign(&self, nonce: &str, signature: &str, address: &str) -> bool;

    /// Broadcast a client-signed transaction.
    ///
    /// A network rejection is reported as `TransactionRejected`.
    async fn send_transaction(&self, signed: &str) -> Result<TransactionId>;

    /// Anti-replay counter of the gateway contract for `address`.
    async fn payment_nonce(&self, address: &str) -> Result<U256>;

    /// Anti-replay counter of the reward token contract for `address`.
    async fn dividend_token_nonce(&self, address: &str) -> Result<U256>;

    /// Current head cursor of the ledger.
    async fn head(&self) -> Result<u64>;

    /// Events of `kind` inside `range`, in ledger order.
    async fn fetch_events(&self, kind: EventKind, range: ScanRange) -> Result<Vec<ChainEvent>>;

    async fn transaction_status(&self, tx: &TransactionId) -> Result<TxStatus>;

    /// Decimal string of native value -> fixed point (truncating).
    fn native_to_fixed_point(&self, value: &str) -> Result<U256> {
        amount::to_fixed_point(value, self.native_decimals())
    }

    fn fixed_point_to_native(&self, value: U256) -> String {
        amount::from_fixed_point(value, self.native_decimals())
    }

    /// Decimal string of reward-token value -> fixed point (truncating).
    fn reward_to_fixed_point(&self, value: &str) -> Result<U256> {
        amount::to_fixed_point(value, self.reward_decimals())
    }

    fn fixed_point_to_reward(&self, value: U256) -> String {
        amount::from_fixed_point(value, self.reward_decimals())
    }
}
