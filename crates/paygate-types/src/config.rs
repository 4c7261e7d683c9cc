//! Configuration types for Paygate chains, payments and withdrawals.

use std::collections::HashSet;
use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{ChainId, PaygateError, Result, constants};

/// Top-level configuration, usually loaded from a JSON file at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaygateConfig {
    /// One entry per external ledger the game accepts value on.
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub payment: PaymentConfig,
    pub withdrawal: WithdrawalConfig,
}

impl PaygateConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| PaygateError::Configuration(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    /// Look up a chain by id.
    #[must_use]
    pub fn chain(&self, id: &ChainId) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| &c.id == id)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.chains.is_empty() {
            return Err(PaygateError::Configuration("no chains configured".into()));
        }
        let mut seen = HashSet::new();
        for chain in &self.chains {
            if !seen.insert(&chain.id) {
                return Err(PaygateError::Configuration(format!(
                    "duplicate chain id {}",
                    chain.id
                )));
            }
            chain.validate()?;
        }
        if self.payment.deadline_secs == 0 {
            return Err(PaygateError::Configuration(
                "payment deadline must be positive".into(),
            ));
        }
        if self.payment.fulfillment_lease_secs == 0 {
            return Err(PaygateError::Configuration(
                "fulfillment lease must be positive".into(),
            ));
        }
        if self.chain(&self.withdrawal.chain).is_none() {
            return Err(PaygateError::Configuration(format!(
                "withdrawal chain {} is not configured",
                self.withdrawal.chain
            )));
        }
        if self.withdrawal.min_amount.is_sign_negative() {
            return Err(PaygateError::Configuration(
                "withdrawal minimum cannot be negative".into(),
            ));
        }
        Ok(())
    }
}

/// How a ledger's history API is queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// Fixed block-number windows (EVM `eth_getLogs`).
    #[default]
    BlockRange,
    /// Cursor + page size (timestamp-indexed history APIs).
    Paged,
}

/// Per-ledger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub id: ChainId,
    /// Numeric EVM network id used for transaction replay protection.
    pub network_id: u64,
    pub rpc_url: String,
    /// Environment variable holding the hex signing key. The key itself
    /// never appears in configuration files.
    pub signer_key_env: String,
    /// Payment gateway contract (also pays native dividends).
    pub gateway_address: String,
    /// Reward ("divs") token contract.
    pub reward_token_address: String,
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    /// Cursor scanning starts from when no checkpoint exists yet.
    #[serde(default)]
    pub genesis_cursor: u64,
    /// Block window (block-range mode) or page size (paged mode).
    #[serde(default = "default_scan_window")]
    pub scan_window: u64,
    #[serde(default)]
    pub scan_mode: ScanMode,
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,
    #[serde(default = "default_receipt_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,
    #[serde(default = "default_native_decimals")]
    pub native_decimals: u8,
    #[serde(default = "default_reward_decimals")]
    pub reward_decimals: u8,
}

fn default_confirmations() -> u64 {
    constants::DEFAULT_CONFIRMATIONS
}

fn default_scan_window() -> u64 {
    constants::DEFAULT_SCAN_WINDOW
}

fn default_scan_interval_ms() -> u64 {
    constants::DEFAULT_SCAN_INTERVAL_MS
}

fn default_receipt_poll_interval_ms() -> u64 {
    constants::DEFAULT_RECEIPT_POLL_INTERVAL_MS
}

fn default_native_decimals() -> u8 {
    constants::NATIVE_DECIMALS
}

fn default_reward_decimals() -> u8 {
    constants::REWARD_TOKEN_DECIMALS
}

impl ChainConfig {
    /// A chain config with every tunable at its default.
    #[must_use]
    pub fn new(
        id: ChainId,
        network_id: u64,
        rpc_url: impl Into<String>,
        gateway_address: impl Into<String>,
        reward_token_address: impl Into<String>,
    ) -> Self {
        Self {
            id,
            network_id,
            rpc_url: rpc_url.into(),
            signer_key_env: "PAYGATE_SIGNER_KEY".into(),
            gateway_address: gateway_address.into(),
            reward_token_address: reward_token_address.into(),
            confirmations: default_confirmations(),
            genesis_cursor: 0,
            scan_window: default_scan_window(),
            scan_mode: ScanMode::default(),
            scan_interval_ms: default_scan_interval_ms(),
            receipt_poll_interval_ms: default_receipt_poll_interval_ms(),
            native_decimals: default_native_decimals(),
            reward_decimals: default_reward_decimals(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |what: &str| {
            Err(PaygateError::Configuration(format!(
                "chain {}: {what}",
                self.id
            )))
        };
        if self.id.as_str().is_empty() {
            return Err(PaygateError::Configuration("empty chain id".into()));
        }
        if self.scan_window == 0 {
            return fail("scan_window must be positive");
        }
        if self.scan_interval_ms == 0 || self.receipt_poll_interval_ms == 0 {
            return fail("intervals must be positive");
        }
        if self.native_decimals > constants::MAX_DECIMALS
            || self.reward_decimals > constants::MAX_DECIMALS
        {
            return fail("decimals exceed 77");
        }
        Ok(())
    }
}

/// Payment authorization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfig {
    /// Seconds an authorization stays valid on-chain.
    pub deadline_secs: u64,
    /// Seconds a worker may hold a payment's fulfillment before another
    /// worker may take it over.
    #[serde(default = "default_fulfillment_lease_secs")]
    pub fulfillment_lease_secs: u64,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            deadline_secs: constants::DEFAULT_PAYMENT_DEADLINE_SECS,
            fulfillment_lease_secs: constants::DEFAULT_FULFILLMENT_LEASE_SECS,
        }
    }
}

fn default_fulfillment_lease_secs() -> u64 {
    constants::DEFAULT_FULFILLMENT_LEASE_SECS
}

/// Withdrawal settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalConfig {
    /// Game currency debited by withdrawals.
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Chain whose reward token pays withdrawals out.
    pub chain: ChainId,
    /// Smallest amount a user may withdraw.
    #[serde(default)]
    pub min_amount: Decimal,
}

fn default_currency() -> String {
    constants::DEFAULT_WITHDRAWAL_CURRENCY.to_string()
}

impl WithdrawalConfig {
    #[must_use]
    pub fn new(chain: ChainId) -> Self {
        Self {
            currency: default_currency(),
            chain,
            min_amount: Decimal::ZERO,
        }
    }
}
